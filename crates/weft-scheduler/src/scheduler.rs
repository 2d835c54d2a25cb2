//! Scheduler interface shared by the serial and parallel implementations
//!
//! A control thread adds batches and later asks for their results. Executor threads
//! pull [`TxnInformation`] either by polling [`Scheduler::next_transaction`] or by
//! iterating the schedule, and report back through
//! [`Scheduler::set_transaction_execution_result`].

use crate::error::SchedulerResult;
use crate::result::{BatchExecutionResult, TxnExecutionResult, TxnInformation, TxnReceipt};
use parking_lot::{Condvar, Mutex};
use weft_types::{Batch, BatchId, ContextId, StateHash, TxnId};

/// Operations every scheduler supports
///
/// Implementations are internally synchronized and shared between threads.
pub trait Scheduler: Send + Sync {
    /// Add a batch to the schedule
    ///
    /// `state_hash` asserts the state root expected after the batch. A `required`
    /// batch is never dropped by [`Scheduler::unschedule_incomplete_batches`].
    fn add_batch(&self, batch: Batch, state_hash: Option<StateHash>, required: bool) -> SchedulerResult<()>;

    /// Next transaction that is ready to execute, without blocking
    fn next_transaction(&self) -> SchedulerResult<Option<TxnInformation>>;

    /// Report the outcome of a dispatched transaction
    fn set_transaction_execution_result(
        &self,
        txn_id: &TxnId,
        is_valid: bool,
        context_id: Option<ContextId>,
        receipt: TxnReceipt,
    ) -> SchedulerResult<()>;

    /// Result of a batch, or `None` while the results it depends on are missing
    fn get_batch_execution_result(&self, batch_id: &BatchId) -> SchedulerResult<Option<BatchExecutionResult>>;

    /// Results recorded so far for a batch's transactions, in batch order
    fn get_transaction_execution_results(&self, batch_id: &BatchId) -> SchedulerResult<Vec<TxnExecutionResult>>;

    /// Drop every batch that is not preserved and still lacks a result
    fn unschedule_incomplete_batches(&self);

    /// Whether the transaction belongs to a batch in the schedule
    fn is_transaction_in_schedule(&self, txn_id: &TxnId) -> bool;

    /// Number of transactions that could be handed out right now
    fn available(&self) -> usize;

    /// Declare that no more batches will be added
    fn finalize(&self);

    /// Whether the schedule is finalized and every transaction has a result
    ///
    /// With `block` the call waits until that holds or the scheduler is cancelled.
    fn complete(&self, block: bool) -> SchedulerResult<bool>;

    /// Discard all uncommitted contexts and stop handing out work
    fn cancel(&self) -> SchedulerResult<()>;

    /// Whether [`Scheduler::cancel`] has been called
    fn is_cancelled(&self) -> bool;

    /// Number of transactions dispatched so far
    fn count(&self) -> usize;

    /// The `index`-th dispatched transaction
    fn get_transaction(&self, index: usize) -> Option<TxnInformation>;

    /// The `index`-th dispatched transaction, pulling new work and waiting as needed
    ///
    /// Returns `None` once the schedule is complete and fewer transactions were
    /// dispatched, or when the scheduler is cancelled.
    fn wait_for_transaction(&self, index: usize) -> Option<TxnInformation>;

    /// Iterate over dispatched transactions in dispatch order
    fn iter(&self) -> SchedulerIterator<'_, Self>
    where
        Self: Sized,
    {
        SchedulerIterator::new(self)
    }
}

impl<'a> dyn Scheduler + 'a {
    /// Iterate over dispatched transactions in dispatch order
    pub fn iter(&self) -> SchedulerIterator<'_, dyn Scheduler + 'a> {
        SchedulerIterator::new(self)
    }
}

/// Blocking, in-order iterator over a schedule
///
/// Transactions already dispatched are replayed first; after that the iterator pulls
/// new work itself and waits while none is ready. Several iterators over one
/// scheduler observe the same order.
pub struct SchedulerIterator<'a, S: ?Sized> {
    scheduler: &'a S,
    next_index: usize,
}

impl<'a, S: Scheduler + ?Sized> SchedulerIterator<'a, S> {
    /// Iterate from the first dispatched transaction
    pub fn new(scheduler: &'a S) -> Self {
        Self::starting_at(scheduler, 0)
    }

    /// Iterate from the given dispatch index
    pub fn starting_at(scheduler: &'a S, index: usize) -> Self {
        Self {
            scheduler,
            next_index: index,
        }
    }
}

impl<'a, S: Scheduler + ?Sized> Iterator for SchedulerIterator<'a, S> {
    type Item = TxnInformation;

    fn next(&mut self) -> Option<Self::Item> {
        let info = self.scheduler.wait_for_transaction(self.next_index)?;
        self.next_index += 1;
        Some(info)
    }
}

/// Outcome of one pull from a schedule's internal state
#[derive(Debug, Default)]
pub(crate) struct Pulled {
    /// Transaction handed out, if any
    pub info: Option<TxnInformation>,
    /// Transactions resolved as invalid without being handed out
    pub resolved: usize,
}

/// Lock-protected state of a scheduler, as seen by the blocking iterator
pub(crate) trait ScheduleState {
    /// Append-only log of dispatched transactions
    fn dispatched(&self) -> &[TxnInformation];

    fn is_cancelled(&self) -> bool;

    /// Finalized with every transaction resulted
    fn is_complete(&self) -> bool;

    /// Hand out the next ready transaction
    fn pull(&mut self) -> Pulled;
}

pub(crate) fn wait_for_transaction<S: ScheduleState>(
    state: &Mutex<S>,
    condition: &Condvar,
    index: usize,
) -> Option<TxnInformation> {
    let mut state = state.lock();
    loop {
        if let Some(info) = state.dispatched().get(index) {
            return Some(info.clone());
        }
        if state.is_cancelled() {
            return None;
        }

        let pulled = state.pull();
        if pulled.resolved > 0 {
            condition.notify_all();
        }
        if pulled.info.is_some() {
            continue;
        }
        if state.is_complete() && index >= state.dispatched().len() {
            return None;
        }
        condition.wait(&mut state);
    }
}

/// Block until the schedule is complete or cancelled
pub(crate) fn wait_for_complete<S: ScheduleState>(state: &Mutex<S>, condition: &Condvar, block: bool) -> bool {
    let mut state = state.lock();
    loop {
        if state.is_cancelled() {
            return false;
        }
        if state.is_complete() {
            return true;
        }
        if !block {
            return false;
        }
        condition.wait(&mut state);
    }
}
