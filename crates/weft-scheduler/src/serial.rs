//! Serial scheduler
//!
//! Hands out one transaction at a time in exactly the order batches were added.
//! Each transaction builds on the context of the last valid one, so no conflict
//! analysis is needed. Useful as a reference when checking the parallel scheduler.

use crate::error::{SchedulerError, SchedulerResult};
use crate::result::{BatchExecutionResult, TxnExecutionResult, TxnInformation, TxnReceipt};
use crate::scheduler::{self, Pulled, ScheduleState, Scheduler};
use crate::squash::SquashHandler;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use weft_types::{Batch, BatchId, ContextId, StateHash, Transaction, TxnId};

struct SerialTxn {
    txn: Transaction,
    batch: BatchId,
}

struct SerialBatch {
    txn_ids: Vec<TxnId>,
    required: bool,
    preserve: bool,
    expected_state_hash: Option<StateHash>,
}

struct State {
    squash: Arc<dyn SquashHandler>,
    always_persist: bool,
    state_hash: StateHash,
    queue: VecDeque<TxnId>,
    txns: HashMap<TxnId, SerialTxn>,
    batch_order: Vec<BatchId>,
    batches: HashMap<BatchId, SerialBatch>,
    /// Batch results, present once a batch is decided
    statuses: HashMap<BatchId, BatchExecutionResult>,
    results: HashMap<TxnId, TxnExecutionResult>,
    in_progress: Option<TxnId>,
    previous_context: Option<ContextId>,
    previous_valid_batch_context: Option<ContextId>,
    dispatched: Vec<TxnInformation>,
    already_calculated: bool,
    retired: HashSet<TxnId>,
    cleaned: HashSet<ContextId>,
    is_final: bool,
    cancelled: bool,
}

impl State {
    fn is_last_in_batch(&self, txn_id: &TxnId) -> bool {
        self.txns
            .get(txn_id)
            .and_then(|t| self.batches.get(&t.batch))
            .and_then(|b| b.txn_ids.last())
            .is_some_and(|last| last == txn_id)
    }

    fn in_invalid_batch(&self, txn_id: &TxnId) -> bool {
        self.txns
            .get(txn_id)
            .and_then(|t| self.statuses.get(&t.batch))
            .is_some_and(|status| !status.is_valid)
    }

    /// Fail the transaction's batch and resolve everything left in it
    fn fail_batch_of(&mut self, txn_id: &TxnId, reason: &str) {
        let Some(batch_id) = self.txns.get(txn_id).map(|t| t.batch.clone()) else {
            return;
        };
        tracing::debug!("Failing batch {} at transaction {}: {}", batch_id, txn_id, reason);
        self.statuses.insert(batch_id.clone(), BatchExecutionResult::invalid());
        if let Some(batch) = self.batches.get(&batch_id) {
            for id in &batch.txn_ids {
                self.results
                    .entry(id.clone())
                    .or_insert_with(|| TxnExecutionResult::invalid(id.clone(), TxnReceipt::error(reason)));
            }
        }
        if self.is_last_in_batch(txn_id) {
            self.previous_context = self.previous_valid_batch_context.clone();
        }
    }

    fn record_result(&mut self, result: TxnExecutionResult) -> SchedulerResult<()> {
        let txn_id = result.signature.clone();
        let Some(batch_id) = self.txns.get(&txn_id).map(|t| t.batch.clone()) else {
            return Ok(());
        };
        if result.is_valid {
            if let Some(context_id) = &result.context_id {
                self.previous_context = Some(context_id.clone());
            }
        } else {
            self.statuses.insert(batch_id.clone(), BatchExecutionResult::invalid());
        }
        self.results.entry(txn_id.clone()).or_insert(result);

        if self.is_last_in_batch(&txn_id) {
            if self.statuses.contains_key(&batch_id) {
                self.previous_context = self.previous_valid_batch_context.clone();
            } else {
                self.previous_valid_batch_context = self.previous_context.clone();
                let state_hash = self.calculate_state_root_if_required(&batch_id)?;
                self.statuses
                    .insert(batch_id, BatchExecutionResult::valid(state_hash));
            }
        }
        Ok(())
    }

    fn calculate_state_root_if_required(&mut self, batch_id: &BatchId) -> SchedulerResult<Option<StateHash>> {
        let Some(required) = self.batches.get(batch_id).and_then(|b| b.expected_state_hash.clone()) else {
            return Ok(None);
        };
        let state_hash = self.compute_state_root(Some(&required))?;
        self.already_calculated = true;
        Ok(state_hash)
    }

    fn calculate_state_root_if_not_already_done(&mut self) -> SchedulerResult<()> {
        if self.already_calculated {
            return Ok(());
        }
        let Some(last_batch) = self.batch_order.last() else {
            return Ok(());
        };
        let required = self
            .batches
            .get(last_batch)
            .and_then(|b| b.expected_state_hash.clone());
        let state_hash = self.compute_state_root(required.as_ref())?;
        self.already_calculated = true;

        let last_valid = self
            .batch_order
            .iter()
            .rev()
            .find(|id| self.statuses.get(*id).is_some_and(|s| s.is_valid))
            .cloned();
        if let Some(status) = last_valid.and_then(|id| self.statuses.get_mut(&id)) {
            status.state_hash = state_hash;
        }
        Ok(())
    }

    /// State hash of the last valid batch's context applied to the starting state
    ///
    /// Persists when `always_persist` is set or the hash matches `required`.
    fn compute_state_root(&mut self, required: Option<&StateHash>) -> SchedulerResult<Option<StateHash>> {
        let Some(context_id) = self.previous_valid_batch_context.clone() else {
            return Ok(None);
        };
        let contexts = [context_id];
        let clean_up = self.always_persist || required.is_none();
        let state_hash = self
            .squash
            .squash(&self.state_hash, &contexts, self.always_persist, clean_up)?;
        if clean_up {
            self.cleaned.extend(contexts.iter().cloned());
        }
        if self.always_persist {
            return Ok(Some(state_hash));
        }

        if required == Some(&state_hash) {
            tracing::info!("Reached expected state {}", state_hash);
            self.squash.squash(&self.state_hash, &contexts, true, true)?;
            self.cleaned.extend(contexts);
        } else if let Some(required) = required {
            tracing::warn!("Computed state {} but {} was expected", state_hash, required);
        }
        Ok(Some(state_hash))
    }

    fn add_batch(&mut self, batch: Batch, state_hash: Option<StateHash>, required: bool) -> SchedulerResult<()> {
        batch.validate()?;
        if self.batches.contains_key(batch.id()) {
            return Err(SchedulerError::DuplicateBatch(batch.id().clone()));
        }
        if let Some(existing) = batch.txn_ids().find(|id| self.txns.contains_key(*id)) {
            return Err(SchedulerError::DuplicateTransaction(existing.clone()));
        }

        // The first non-required batch is kept so the schedule never empties out
        let preserve = required || !self.batches.values().any(|b| !b.required);
        let batch_id = batch.header_signature;
        let txn_ids: Vec<TxnId> = batch.transactions.iter().map(|t| t.id().clone()).collect();
        for txn in batch.transactions {
            let txn_id = txn.id().clone();
            self.retired.remove(&txn_id);
            self.queue.push_back(txn_id.clone());
            self.txns.insert(
                txn_id,
                SerialTxn {
                    txn,
                    batch: batch_id.clone(),
                },
            );
        }

        tracing::debug!("Added batch {} with {} transactions", batch_id, txn_ids.len());
        self.batch_order.push(batch_id.clone());
        self.batches.insert(
            batch_id,
            SerialBatch {
                txn_ids,
                required,
                preserve,
                expected_state_hash: state_hash,
            },
        );
        Ok(())
    }

    fn unschedule_incomplete_batches(&mut self) -> usize {
        let mut in_progress_batch = None;
        if let Some(txn_id) = self.in_progress.clone() {
            let batch_id = self.txns.get(&txn_id).map(|t| t.batch.clone());
            match batch_id {
                Some(id) if self.batches.get(&id).is_some_and(|b| b.preserve) => in_progress_batch = Some(id),
                _ => self.in_progress = None,
            }
        }

        let removed: Vec<BatchId> = self
            .batch_order
            .iter()
            .filter(|id| {
                !self.statuses.contains_key(*id)
                    && in_progress_batch.as_ref() != Some(*id)
                    && !self.batches.get(*id).is_some_and(|b| b.preserve)
            })
            .cloned()
            .collect();

        let mut had_results = false;
        for batch_id in &removed {
            let Some(batch) = self.batches.remove(batch_id) else {
                continue;
            };
            for txn_id in batch.txn_ids {
                had_results |= self.results.remove(&txn_id).is_some();
                self.txns.remove(&txn_id);
                self.retired.insert(txn_id);
            }
        }
        self.queue.retain(|id| self.txns.contains_key(id));
        self.batch_order.retain(|id| !removed.contains(id));
        if had_results {
            self.previous_context = self.previous_valid_batch_context.clone();
        }
        removed.len()
    }
}

impl ScheduleState for State {
    fn dispatched(&self) -> &[TxnInformation] {
        &self.dispatched
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn is_complete(&self) -> bool {
        self.is_final && self.txns.keys().all(|id| self.results.contains_key(id))
    }

    fn pull(&mut self) -> Pulled {
        let mut pulled = Pulled::default();
        if self.in_progress.is_some() {
            return pulled;
        }

        while let Some(txn_id) = self.queue.pop_front() {
            let Some(txn) = self.txns.get(&txn_id).map(|t| t.txn.clone()) else {
                continue;
            };
            let failed_dependency = txn
                .dependencies()
                .iter()
                .any(|dep| self.txns.contains_key(dep) && self.in_invalid_batch(dep));
            if failed_dependency {
                self.fail_batch_of(&txn_id, "dependency belongs to an invalid batch");
                pulled.resolved += 1;
                continue;
            }
            if self.in_invalid_batch(&txn_id) {
                self.fail_batch_of(&txn_id, "batch is already invalid");
                pulled.resolved += 1;
                continue;
            }

            tracing::debug!("Dispatching transaction {}", txn_id);
            self.in_progress = Some(txn_id);
            let info = TxnInformation {
                txn,
                state_hash: self.state_hash.clone(),
                base_context_ids: self.previous_context.iter().cloned().collect(),
            };
            self.dispatched.push(info.clone());
            pulled.info = Some(info);
            return pulled;
        }
        pulled
    }
}

/// Scheduler that runs one transaction at a time in arrival order
pub struct SerialScheduler {
    state: Mutex<State>,
    condition: Condvar,
}

impl SerialScheduler {
    /// Create a scheduler building on `first_state_hash`
    pub fn new(squash: Arc<dyn SquashHandler>, first_state_hash: StateHash, always_persist: bool) -> Self {
        Self {
            state: Mutex::new(State {
                squash,
                always_persist,
                state_hash: first_state_hash,
                queue: VecDeque::new(),
                txns: HashMap::new(),
                batch_order: Vec::new(),
                batches: HashMap::new(),
                statuses: HashMap::new(),
                results: HashMap::new(),
                in_progress: None,
                previous_context: None,
                previous_valid_batch_context: None,
                dispatched: Vec::new(),
                already_calculated: false,
                retired: HashSet::new(),
                cleaned: HashSet::new(),
                is_final: false,
                cancelled: false,
            }),
            condition: Condvar::new(),
        }
    }
}

impl Scheduler for SerialScheduler {
    fn add_batch(&self, batch: Batch, state_hash: Option<StateHash>, required: bool) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        if state.cancelled {
            return Err(SchedulerError::Cancelled);
        }
        if state.is_final {
            return Err(SchedulerError::AddAfterFinalize(batch.id().clone()));
        }
        state.add_batch(batch, state_hash, required)?;
        self.condition.notify_all();
        Ok(())
    }

    fn next_transaction(&self) -> SchedulerResult<Option<TxnInformation>> {
        let mut state = self.state.lock();
        if state.cancelled {
            return Err(SchedulerError::Cancelled);
        }
        let pulled = state.pull();
        if pulled.resolved > 0 {
            self.condition.notify_all();
        }
        Ok(pulled.info)
    }

    fn set_transaction_execution_result(
        &self,
        txn_id: &TxnId,
        is_valid: bool,
        context_id: Option<ContextId>,
        receipt: TxnReceipt,
    ) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        if state.cancelled {
            return Err(SchedulerError::Cancelled);
        }
        if state.in_progress.as_ref() != Some(txn_id) {
            if state.retired.contains(txn_id) {
                tracing::debug!("Ignoring result for unscheduled transaction {}", txn_id);
                return Ok(());
            }
            if state.results.contains_key(txn_id) {
                return Err(SchedulerError::DuplicateResult(txn_id.clone()));
            }
            return Err(SchedulerError::NotScheduled(txn_id.clone()));
        }
        let result = TxnExecutionResult::new(txn_id.clone(), is_valid, context_id, state.state_hash.clone(), receipt);

        state.in_progress = None;
        let recorded = state.record_result(result);
        self.condition.notify_all();
        recorded
    }

    fn get_batch_execution_result(&self, batch_id: &BatchId) -> SchedulerResult<Option<BatchExecutionResult>> {
        let state = self.state.lock();
        if state.cancelled {
            return Err(SchedulerError::Cancelled);
        }
        if !state.batches.contains_key(batch_id) {
            return Err(SchedulerError::UnknownBatch(batch_id.clone()));
        }
        Ok(state.statuses.get(batch_id).cloned())
    }

    fn get_transaction_execution_results(&self, batch_id: &BatchId) -> SchedulerResult<Vec<TxnExecutionResult>> {
        let state = self.state.lock();
        let batch = state
            .batches
            .get(batch_id)
            .ok_or_else(|| SchedulerError::UnknownBatch(batch_id.clone()))?;
        Ok(batch
            .txn_ids
            .iter()
            .filter_map(|id| state.results.get(id).cloned())
            .collect())
    }

    fn unschedule_incomplete_batches(&self) {
        let mut state = self.state.lock();
        let removed = state.unschedule_incomplete_batches();
        if removed > 0 {
            tracing::debug!("Removed {} incomplete batches from the schedule", removed);
        }
        self.condition.notify_all();
    }

    fn is_transaction_in_schedule(&self, txn_id: &TxnId) -> bool {
        self.state.lock().txns.contains_key(txn_id)
    }

    fn available(&self) -> usize {
        let state = self.state.lock();
        usize::from(state.in_progress.is_none() && !state.queue.is_empty())
    }

    fn finalize(&self) {
        self.state.lock().is_final = true;
        self.condition.notify_all();
    }

    fn complete(&self, block: bool) -> SchedulerResult<bool> {
        if !scheduler::wait_for_complete(&self.state, &self.condition, block) {
            return Ok(false);
        }
        self.state.lock().calculate_state_root_if_not_already_done()?;
        Ok(true)
    }

    fn cancel(&self) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        if state.cancelled {
            return Ok(());
        }

        let pending = state.previous_context.clone().filter(|c| !state.cleaned.contains(c));
        if let Some(context_id) = pending {
            let contexts = [context_id];
            state.squash.squash(&state.state_hash, &contexts, false, true)?;
            state.cleaned.extend(contexts);
        }
        tracing::info!("Schedule cancelled");
        state.cancelled = true;
        self.condition.notify_all();
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    fn count(&self) -> usize {
        self.state.lock().dispatched.len()
    }

    fn get_transaction(&self, index: usize) -> Option<TxnInformation> {
        self.state.lock().dispatched.get(index).cloned()
    }

    fn wait_for_transaction(&self, index: usize) -> Option<TxnInformation> {
        scheduler::wait_for_transaction(&self.state, &self.condition, index)
    }
}
