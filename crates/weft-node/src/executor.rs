//! Executor pool
//!
//! A dispatcher thread walks the schedule in dispatch order and feeds a bounded
//! channel; worker threads execute each transaction in its own context and report
//! the result back to the scheduler.

use crate::context::{ContextError, ContextManager};
use crate::workload::TxnPayload;
use bytes::Bytes;
use crossbeam::channel;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use weft_scheduler::{Scheduler, SchedulerIterator, TxnInformation, TxnReceipt};
use weft_types::ContextId;

/// Why a transaction executed as invalid
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Payload is not a valid workload payload
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Context rejected a read or write
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Counter address holds something other than a decimal integer
    #[error("address {0} does not hold a counter")]
    NotACounter(String),

    /// Payload asked to fail
    #[error("transaction rejected by payload")]
    Rejected,
}

/// Counts of what the pool did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Transactions executed (a replayed transaction counts each time)
    pub executed: usize,
    /// Executions reported valid
    pub valid: usize,
    /// Executions reported invalid
    pub invalid: usize,
    /// Reports the scheduler refused
    pub rejected: usize,
}

#[derive(Default)]
struct Counters {
    executed: AtomicUsize,
    valid: AtomicUsize,
    invalid: AtomicUsize,
    rejected: AtomicUsize,
}

impl Counters {
    fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            executed: self.executed.load(Ordering::Relaxed),
            valid: self.valid.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Runs scheduled transactions on a fixed number of threads
pub struct Executor {
    scheduler: Arc<dyn Scheduler>,
    contexts: Arc<ContextManager>,
    workers: usize,
}

impl Executor {
    /// Create an executor with `workers` threads (at least one)
    pub fn new(scheduler: Arc<dyn Scheduler>, contexts: Arc<ContextManager>, workers: usize) -> Self {
        Self {
            scheduler,
            contexts,
            workers: workers.max(1),
        }
    }

    /// Execute until the schedule is complete or cancelled
    ///
    /// Returns only once the scheduler is finalized and every transaction has a
    /// result, so batches must be added and the scheduler finalized either before
    /// the call or from another thread.
    pub fn run(&self) -> ExecutionSummary {
        let (sender, receiver) = channel::bounded::<TxnInformation>(self.workers * 2);
        let counters = Counters::default();

        thread::scope(|scope| {
            let scheduler = self.scheduler.as_ref();
            scope.spawn(move || {
                for info in SchedulerIterator::new(scheduler) {
                    if sender.send(info).is_err() {
                        break;
                    }
                }
                tracing::debug!("Schedule exhausted after {} dispatches", scheduler.count());
            });

            for worker in 0..self.workers {
                let receiver = receiver.clone();
                let counters = &counters;
                scope.spawn(move || {
                    for info in receiver.iter() {
                        self.execute(worker, &info, counters);
                    }
                });
            }
            drop(receiver);
        });

        let summary = counters.summary();
        tracing::info!(
            "Executed {} transactions ({} valid, {} invalid, {} rejected)",
            summary.executed,
            summary.valid,
            summary.invalid,
            summary.rejected
        );
        summary
    }

    fn execute(&self, worker: usize, info: &TxnInformation, counters: &Counters) {
        let txn_id = info.txn_id();
        tracing::trace!("Worker {} executing {}", worker, txn_id);
        counters.executed.fetch_add(1, Ordering::Relaxed);

        let (is_valid, context_id, receipt) = match self.apply(info) {
            Ok((context_id, receipt)) => (true, Some(context_id), receipt),
            Err(err) => {
                tracing::debug!("Transaction {} is invalid: {}", txn_id, err);
                (false, None, TxnReceipt::error(err.to_string()))
            }
        };
        if is_valid {
            counters.valid.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.invalid.fetch_add(1, Ordering::Relaxed);
        }

        if let Err(err) =
            self.scheduler
                .set_transaction_execution_result(txn_id, is_valid, context_id.clone(), receipt)
        {
            tracing::warn!("Result for {} refused: {}", txn_id, err);
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            if let Some(context_id) = context_id {
                self.contexts.discard(&context_id);
            }
        }
    }

    /// Run the payload in a fresh context; the context is discarded on failure
    fn apply(&self, info: &TxnInformation) -> Result<(ContextId, TxnReceipt), ExecutionError> {
        let txn = &info.txn;
        let context_id =
            self.contexts
                .create_context(&info.state_hash, &info.base_context_ids, txn.inputs(), txn.outputs())?;

        match self.apply_payload(&context_id, txn.payload()) {
            Ok(()) => {
                let receipt = TxnReceipt {
                    state_changes: self.contexts.state_changes(&context_id)?,
                    ..Default::default()
                };
                Ok((context_id, receipt))
            }
            Err(err) => {
                self.contexts.discard(&context_id);
                Err(err)
            }
        }
    }

    /// Increments first, then writes
    fn apply_payload(&self, context_id: &ContextId, payload: &Bytes) -> Result<(), ExecutionError> {
        let payload = TxnPayload::decode(payload)?;
        if payload.fail {
            return Err(ExecutionError::Rejected);
        }

        for address in &payload.increments {
            let current = match self.contexts.get(context_id, address)? {
                Some(value) => std::str::from_utf8(&value)
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| ExecutionError::NotACounter(address.clone()))?,
                None => 0,
            };
            let next = current.wrapping_add(1).to_string();
            self.contexts.set(context_id, address, Bytes::from(next))?;
        }

        for (address, value) in payload.writes {
            match value {
                Some(value) => self.contexts.set(context_id, &address, Bytes::from(value))?,
                None => self.contexts.delete(context_id, &address)?,
            }
        }
        Ok(())
    }
}
