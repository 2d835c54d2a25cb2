//! Parallel scheduler
//!
//! Transactions are ordered up front, when their batch is added: the predecessor
//! tree names every earlier transaction whose reads or writes conflict with the new
//! one. A transaction is handed out once all of its predecessors have results, so
//! executors working on unrelated parts of the state run concurrently without
//! coordinating with each other.
//!
//! When a transaction turns out invalid its whole batch is invalid, and every
//! transaction in another batch that was built on top of that batch is replayed:
//! a recorded result is discarded and the transaction becomes available again, and
//! an execution still in flight is marked outstanding so its result is dropped
//! when it arrives.

use crate::error::{SchedulerError, SchedulerResult};
use crate::predecessors::{PredecessorChain, PredecessorTree};
use crate::result::{BatchExecutionResult, TxnExecutionResult, TxnInformation, TxnReceipt};
use crate::scheduler::{self, Pulled, ScheduleState, Scheduler};
use crate::squash::SquashHandler;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::iter;
use std::sync::Arc;
use weft_types::{Batch, BatchId, ContextId, StateHash, Transaction, TxnId};

/// A transaction in the schedule
#[derive(Debug)]
struct ScheduledTxn {
    txn: Transaction,
    batch: BatchId,
    /// Arrival position, unique for the scheduler's lifetime
    seq: u64,
    /// Direct predecessors found at `add_batch` time
    predecessors: Vec<TxnId>,
}

/// A batch in the schedule
#[derive(Debug)]
struct ScheduledBatch {
    txn_ids: Vec<TxnId>,
    required: bool,
    preserve: bool,
    expected_state_hash: Option<StateHash>,
    computed_state_hash: Option<StateHash>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BatchStatus {
    /// Some transactions lack results and none is invalid
    Pending,
    /// Every transaction has a valid result
    Valid,
    /// At least one transaction has an invalid result
    Invalid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Readiness {
    Dispatch,
    FailByDependency,
    FailFast,
}

#[derive(Debug)]
struct State {
    first_state_hash: StateHash,
    tree: PredecessorTree,
    chain: PredecessorChain,
    batch_order: Vec<BatchId>,
    batches: HashMap<BatchId, ScheduledBatch>,
    txns: HashMap<TxnId, ScheduledTxn>,
    next_seq: u64,
    /// Transactions waiting to be handed out, keyed by arrival
    available: BTreeMap<u64, TxnId>,
    /// Handed out and not since returned to `available`
    scheduled: HashSet<TxnId>,
    /// In flight, but their result must be dropped
    outstanding: HashSet<TxnId>,
    results: HashMap<TxnId, TxnExecutionResult>,
    /// Resolved invalid without being handed out
    resolved_internally: HashSet<TxnId>,
    dispatched: Vec<TxnInformation>,
    /// Predecessors of transactions removed from the schedule
    retired: HashMap<TxnId, Vec<TxnId>>,
    /// Contexts already released by a squash
    cleaned: HashSet<ContextId>,
    is_final: bool,
    cancelled: bool,
}

impl State {
    fn new(first_state_hash: StateHash) -> Self {
        Self {
            first_state_hash,
            tree: PredecessorTree::new(),
            chain: PredecessorChain::new(),
            batch_order: Vec::new(),
            batches: HashMap::new(),
            txns: HashMap::new(),
            next_seq: 0,
            available: BTreeMap::new(),
            scheduled: HashSet::new(),
            outstanding: HashSet::new(),
            results: HashMap::new(),
            resolved_internally: HashSet::new(),
            dispatched: Vec::new(),
            retired: HashMap::new(),
            cleaned: HashSet::new(),
            is_final: false,
            cancelled: false,
        }
    }

    // ==================== Adding ====================

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
            self.schedule_transaction(txn, &batch_id);
        }

        tracing::debug!(
            "Added batch {} with {} transactions (required: {}, preserve: {})",
            batch_id,
            txn_ids.len(),
            required,
            preserve
        );
        self.batch_order.push(batch_id.clone());
        self.batches.insert(
            batch_id,
            ScheduledBatch {
                txn_ids,
                required,
                preserve,
                expected_state_hash: state_hash,
                computed_state_hash: None,
            },
        );
        Ok(())
    }

    fn schedule_transaction(&mut self, txn: Transaction, batch_id: &BatchId) {
        let txn_id = txn.id().clone();
        self.retired.remove(&txn_id);

        let mut found = BTreeSet::new();
        for address in txn.inputs() {
            found.extend(self.tree.find_read_predecessors(address));
        }
        for address in txn.outputs() {
            found.extend(self.tree.find_write_predecessors(address));
        }
        found.remove(&txn_id);
        let predecessors = self.expand_retired(found);
        self.chain.add_relationship(txn_id.clone(), &predecessors);

        // Inputs first, so a transaction reading and writing one address ends up as its writer
        for address in txn.inputs() {
            self.tree.add_reader(address, txn_id.clone());
        }
        for address in txn.outputs() {
            self.tree.set_writer(address, txn_id.clone());
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.available.insert(seq, txn_id.clone());
        self.txns.insert(
            txn_id,
            ScheduledTxn {
                txn,
                batch: batch_id.clone(),
                seq,
                predecessors,
            },
        );
    }

    /// Replace removed transactions by their own predecessors, recursively
    fn expand_retired<I>(&self, ids: I) -> Vec<TxnId>
    where
        I: IntoIterator<Item = TxnId>,
    {
        let mut expanded = BTreeSet::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<TxnId> = ids.into_iter().collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if self.txns.contains_key(&id) {
                expanded.insert(id);
            } else if let Some(predecessors) = self.retired.get(&id) {
                stack.extend(predecessors.iter().cloned());
            }
        }
        expanded.into_iter().collect()
    }

    // ==================== Batch Queries ====================

    fn batch_status(&self, batch_id: &BatchId) -> BatchStatus {
        let Some(batch) = self.batches.get(batch_id) else {
            return BatchStatus::Pending;
        };
        let mut complete = true;
        for txn_id in &batch.txn_ids {
            match self.results.get(txn_id) {
                Some(result) if !result.is_valid => return BatchStatus::Invalid,
                Some(_) => {}
                None => complete = false,
            }
        }
        if complete {
            BatchStatus::Valid
        } else {
            BatchStatus::Pending
        }
    }

    fn batch_fully_resulted(&self, batch_id: &BatchId) -> bool {
        self.batches
            .get(batch_id)
            .is_some_and(|b| b.txn_ids.iter().all(|id| self.results.contains_key(id)))
    }

    fn in_invalid_batch(&self, txn_id: &TxnId) -> bool {
        self.txns
            .get(txn_id)
            .is_some_and(|t| self.batch_status(&t.batch) == BatchStatus::Invalid)
    }

    fn first_incomplete_batch(&self) -> Option<&BatchId> {
        self.batch_order.iter().find(|id| !self.batch_fully_resulted(id))
    }

    /// `Some(true)` if no later batch is valid, `None` while a later batch is pending
    fn is_last_valid_batch(&self, batch_id: &BatchId) -> Option<bool> {
        let position = self.batch_order.iter().position(|id| id == batch_id)?;
        for later in &self.batch_order[position + 1..] {
            match self.batch_status(later) {
                BatchStatus::Valid => return Some(false),
                BatchStatus::Pending => return None,
                BatchStatus::Invalid => {}
            }
        }
        Some(true)
    }

    /// Contexts to squash for the state after `batch_id`
    ///
    /// Walks back through every valid batch, skipping transactions already covered
    /// as the predecessor of a collected one. `None` while an earlier batch is
    /// still pending.
    fn contexts_for_squash(&self, batch_id: &BatchId) -> Option<Vec<ContextId>> {
        let position = self.batch_order.iter().position(|id| id == batch_id)?;
        let mut contexts = Vec::new();
        let mut covered: HashSet<&TxnId> = HashSet::new();

        for id in self.batch_order[..=position].iter().rev() {
            match self.batch_status(id) {
                BatchStatus::Pending => return None,
                BatchStatus::Invalid => continue,
                BatchStatus::Valid => {}
            }
            let Some(batch) = self.batches.get(id) else {
                continue;
            };
            for txn_id in batch.txn_ids.iter().rev() {
                let Some(context_id) = self.results.get(txn_id).and_then(|r| r.context_id.clone()) else {
                    continue;
                };
                if !covered.contains(txn_id) {
                    contexts.push(context_id);
                }
                if let Some(txn) = self.txns.get(txn_id) {
                    covered.extend(txn.predecessors.iter());
                }
            }
        }
        Some(contexts)
    }

    fn invalidate_state_hashes_from(&mut self, batch_id: &BatchId) {
        let Some(position) = self.batch_order.iter().position(|id| id == batch_id) else {
            return;
        };
        for id in &self.batch_order[position..] {
            if let Some(batch) = self.batches.get_mut(id) {
                batch.computed_state_hash = None;
            }
        }
    }

    // ==================== Readiness ====================

    /// Whether some predecessor still lacks a result
    ///
    /// Besides the direct predecessors this looks one level further, and walks
    /// through predecessors in invalid batches the same way base contexts are
    /// gathered.
    fn has_unresolved_predecessors(&self, txn_id: &TxnId) -> bool {
        let Some(txn) = self.txns.get(txn_id) else {
            return false;
        };
        let mut queue: VecDeque<&TxnId> = txn.predecessors.iter().collect();
        let mut seen = HashSet::new();

        while let Some(predecessor) = queue.pop_front() {
            if !seen.insert(predecessor) {
                continue;
            }
            let Some(prior) = self.txns.get(predecessor) else {
                continue;
            };
            if !self.results.contains_key(predecessor) {
                return true;
            }
            let unresolved_hop = prior
                .predecessors
                .iter()
                .any(|id| self.txns.contains_key(id) && !self.results.contains_key(id));
            if unresolved_hop {
                return true;
            }
            if self.in_invalid_batch(predecessor) {
                queue.extend(prior.predecessors.iter());
            }
        }
        false
    }

    fn readiness(&self, txn_id: &TxnId, first_incomplete: Option<&BatchId>) -> Option<Readiness> {
        let txn = self.txns.get(txn_id)?;
        if self.outstanding.contains(txn_id) || self.has_unresolved_predecessors(txn_id) {
            return None;
        }

        let dependency_batches: Vec<&BatchId> = txn
            .txn
            .dependencies()
            .iter()
            .filter_map(|dep| self.txns.get(dep))
            .map(|dep| &dep.batch)
            .filter(|batch| **batch != txn.batch)
            .collect();
        if dependency_batches.iter().any(|b| !self.batch_fully_resulted(b)) {
            return None;
        }
        if dependency_batches
            .iter()
            .any(|b| self.batch_status(b) == BatchStatus::Invalid)
        {
            return Some(Readiness::FailByDependency);
        }

        if self.batch_status(&txn.batch) == BatchStatus::Invalid && first_incomplete == Some(&txn.batch) {
            return Some(Readiness::FailFast);
        }
        Some(Readiness::Dispatch)
    }

    fn by_recency<'a>(&'a self, ids: &'a [TxnId]) -> Vec<&'a TxnId> {
        let mut known: Vec<(&TxnId, u64)> = ids
            .iter()
            .filter_map(|id| self.txns.get(id).map(|t| (id, t.seq)))
            .collect();
        known.sort_by(|a, b| b.1.cmp(&a.1));
        known.into_iter().map(|(id, _)| id).collect()
    }

    /// Contexts of the nearest valid predecessors, most recently added first
    fn base_contexts(&self, txn_id: &TxnId) -> Vec<ContextId> {
        let Some(txn) = self.txns.get(txn_id) else {
            return Vec::new();
        };
        let mut contexts = Vec::new();
        let mut in_chain: Vec<&TxnId> = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&TxnId> = self.by_recency(&txn.predecessors).into();

        while let Some(prior_id) = queue.pop_front() {
            if !seen.insert(prior_id) {
                continue;
            }
            let Some(prior) = self.txns.get(prior_id) else {
                continue;
            };
            // Invalid batches and context-less results contribute no state of their own
            let passes_through = self.in_invalid_batch(prior_id)
                || self.results.get(prior_id).is_some_and(|r| r.context_id.is_none());
            if passes_through {
                queue.extend(self.by_recency(&prior.predecessors));
                continue;
            }
            let covered = in_chain.iter().any(|member| {
                self.txns
                    .get(*member)
                    .is_some_and(|m| m.predecessors.contains(prior_id))
            });
            if covered {
                continue;
            }
            if let Some(context_id) = self.results.get(prior_id).and_then(|r| r.context_id.clone()) {
                in_chain.push(prior_id);
                contexts.push(context_id);
            }
        }
        contexts
    }

    // ==================== Results And Replay ====================

    fn dispatch(&mut self, seq: u64, txn_id: TxnId) -> Option<TxnInformation> {
        self.available.remove(&seq);
        let base_context_ids = self.base_contexts(&txn_id);
        let txn = self.txns.get(&txn_id)?.txn.clone();
        tracing::debug!(
            "Dispatching transaction {} on {} base contexts",
            txn_id,
            base_context_ids.len()
        );
        self.scheduled.insert(txn_id);
        let info = TxnInformation {
            txn,
            state_hash: self.first_state_hash.clone(),
            base_context_ids,
        };
        self.dispatched.push(info.clone());
        Some(info)
    }

    fn resolve_invalid(&mut self, seq: u64, txn_id: TxnId, reason: &str) {
        tracing::debug!("Resolving transaction {} as invalid: {}", txn_id, reason);
        self.available.remove(&seq);
        self.resolved_internally.insert(txn_id.clone());
        self.record_result(TxnExecutionResult::invalid(txn_id, TxnReceipt::error(reason)));
    }

    /// Record a result, replacing any earlier report for the same dispatch
    fn record_result(&mut self, result: TxnExecutionResult) {
        let txn_id = result.signature.clone();
        let is_valid = result.is_valid;
        let context_id = result.context_id.clone();
        let previous = self.results.insert(txn_id.clone(), result);
        let changed = previous.is_some_and(|p| p.is_valid != is_valid || p.context_id != context_id);

        if changed {
            tracing::info!("Transaction {} reported a different result", txn_id);
        }
        if !is_valid || changed {
            self.replay_successors_of_batch(&txn_id);
        }
        if changed {
            if let Some(batch_id) = self.txns.get(&txn_id).map(|t| t.batch.clone()) {
                self.release_internal_results(vec![batch_id]);
            }
        }
    }

    fn return_to_available(&mut self, txn_id: &TxnId) {
        self.scheduled.remove(txn_id);
        if let Some(txn) = self.txns.get(txn_id) {
            self.available.insert(txn.seq, txn_id.clone());
        }
    }

    /// Replay everything in other batches that follows a member of `failed`'s batch
    fn replay_successors_of_batch(&mut self, failed: &TxnId) {
        let Some(batch_id) = self.txns.get(failed).map(|t| t.batch.clone()) else {
            return;
        };
        let members = self
            .batches
            .get(&batch_id)
            .map(|b| b.txn_ids.clone())
            .unwrap_or_default();

        let successors: Vec<TxnId> = members
            .iter()
            .flat_map(|member| self.built_on(member))
            .filter(|candidate| self.txns.get(candidate).is_some_and(|t| t.batch != batch_id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if !successors.is_empty() {
            tracing::info!(
                "Batch {} is invalid; replaying {} dependent transactions",
                batch_id,
                successors.len()
            );
        }
        self.replay(successors);
    }

    /// Handed-out transactions that executed on top of `txn_id`'s result
    ///
    /// These are its address successors, plus transactions in other batches that
    /// name a member of its batch as an explicit dependency.
    fn built_on(&self, txn_id: &TxnId) -> Vec<TxnId> {
        let Some(batch_id) = self.txns.get(txn_id).map(|t| &t.batch) else {
            return Vec::new();
        };
        self.scheduled
            .iter()
            .filter(|candidate| *candidate != txn_id)
            .filter(|candidate| {
                let Some(txn) = self.txns.get(*candidate) else {
                    return false;
                };
                let depends_on_batch = txn.batch != *batch_id
                    && txn
                        .txn
                        .dependencies()
                        .iter()
                        .any(|dep| self.txns.get(dep).is_some_and(|d| d.batch == *batch_id));
                depends_on_batch || self.chain.is_predecessor_of_other(txn_id, iter::once(*candidate))
            })
            .cloned()
            .collect()
    }

    /// Discard results of `txn_ids` and, transitively, of everything built on them
    fn replay(&mut self, txn_ids: Vec<TxnId>) {
        let mut changed = Vec::new();
        let mut work = txn_ids;
        let mut seen = HashSet::new();
        while let Some(txn_id) = work.pop() {
            if !seen.insert(txn_id.clone()) {
                continue;
            }
            work.extend(self.built_on(&txn_id));
            if self.results.remove(&txn_id).is_some() {
                tracing::debug!("Replaying transaction {}", txn_id);
                self.return_to_available(&txn_id);
                if let Some(txn) = self.txns.get(&txn_id) {
                    changed.push(txn.batch.clone());
                }
            } else {
                tracing::debug!("Transaction {} is in flight; its result will be dropped", txn_id);
                self.outstanding.insert(txn_id);
            }
        }
        self.release_internal_results(changed);
    }

    /// Re-evaluate transactions resolved without execution once the batches they
    /// were judged by have changed
    fn release_internal_results(&mut self, changed: Vec<BatchId>) {
        let mut work = changed;
        let mut visited = HashSet::new();
        while let Some(batch_id) = work.pop() {
            if !visited.insert(batch_id.clone()) {
                continue;
            }
            self.invalidate_state_hashes_from(&batch_id);

            let affected: Vec<TxnId> = self
                .resolved_internally
                .iter()
                .filter(|id| {
                    self.txns.get(*id).is_some_and(|t| {
                        t.batch == batch_id
                            || t.txn
                                .dependencies()
                                .iter()
                                .any(|dep| self.txns.get(dep).is_some_and(|d| d.batch == batch_id))
                    })
                })
                .cloned()
                .collect();
            for txn_id in affected {
                self.resolved_internally.remove(&txn_id);
                self.results.remove(&txn_id);
                if let Some(txn) = self.txns.get(&txn_id) {
                    self.available.insert(txn.seq, txn_id.clone());
                    work.push(txn.batch.clone());
                }
            }
        }
    }

    // ==================== Removal ====================

    fn unschedule_incomplete_batches(&mut self) -> usize {
        let removed: Vec<BatchId> = self
            .batch_order
            .iter()
            .filter(|id| {
                self.batches.get(*id).is_some_and(|b| {
                    !b.preserve && b.txn_ids.iter().any(|t| !self.results.contains_key(t))
                })
            })
            .cloned()
            .collect();
        if removed.is_empty() {
            return 0;
        }

        let removed_txns: Vec<TxnId> = removed
            .iter()
            .filter_map(|id| self.batches.get(id))
            .flat_map(|b| b.txn_ids.iter().cloned())
            .collect();
        let removed_set: HashSet<&TxnId> = removed_txns.iter().collect();

        // Work built on the removed transactions has to run again without them
        let successors: Vec<TxnId> = self
            .scheduled
            .iter()
            .filter(|candidate| {
                !removed_set.contains(candidate)
                    && removed_txns
                        .iter()
                        .any(|r| self.chain.is_predecessor_of_other(r, iter::once(*candidate)))
            })
            .cloned()
            .collect();
        self.replay(successors);

        for txn_id in &removed_txns {
            self.retire(txn_id);
        }
        for id in &removed {
            self.batches.remove(id);
        }
        self.batch_order.retain(|id| !removed.contains(id));
        self.reroute_predecessors();
        removed.len()
    }

    fn retire(&mut self, txn_id: &TxnId) {
        let Some(txn) = self.txns.remove(txn_id) else {
            return;
        };
        self.available.remove(&txn.seq);
        self.scheduled.remove(txn_id);
        self.outstanding.remove(txn_id);
        self.results.remove(txn_id);
        self.resolved_internally.remove(txn_id);
        self.chain.remove(txn_id);
        self.retired.insert(txn_id.clone(), txn.predecessors);
    }

    fn reroute_predecessors(&mut self) {
        let stale: Vec<TxnId> = self
            .txns
            .iter()
            .filter(|(_, t)| t.predecessors.iter().any(|p| self.retired.contains_key(p)))
            .map(|(id, _)| id.clone())
            .collect();
        for txn_id in stale {
            let Some(current) = self.txns.get(&txn_id).map(|t| t.predecessors.clone()) else {
                continue;
            };
            let rerouted = self.expand_retired(current);
            if let Some(txn) = self.txns.get_mut(&txn_id) {
                txn.predecessors = rerouted;
            }
        }
    }

    /// Contexts recorded in results and not yet released, in arrival order
    fn unreleased_contexts(&self) -> Vec<ContextId> {
        self.batch_order
            .iter()
            .filter_map(|id| self.batches.get(id))
            .flat_map(|b| b.txn_ids.iter())
            .filter_map(|id| self.results.get(id))
            .filter_map(|r| r.context_id.clone())
            .filter(|c| !self.cleaned.contains(c))
            .collect()
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
        loop {
            let first_incomplete = self.first_incomplete_batch().cloned();
            let pick = self.available.iter().find_map(|(&seq, id)| {
                self.readiness(id, first_incomplete.as_ref())
                    .map(|readiness| (seq, id.clone(), readiness))
            });
            let Some((seq, txn_id, readiness)) = pick else {
                return pulled;
            };

            match readiness {
                Readiness::Dispatch => {
                    pulled.info = self.dispatch(seq, txn_id);
                    return pulled;
                }
                Readiness::FailByDependency => {
                    self.resolve_invalid(seq, txn_id, "dependency belongs to an invalid batch");
                    pulled.resolved += 1;
                }
                Readiness::FailFast => {
                    self.resolve_invalid(seq, txn_id, "batch is already invalid");
                    pulled.resolved += 1;
                }
            }
        }
    }
}

/// Scheduler that hands out non-conflicting transactions concurrently
pub struct ParallelScheduler {
    squash: Arc<dyn SquashHandler>,
    always_persist: bool,
    state: Mutex<State>,
    condition: Condvar,
}

impl ParallelScheduler {
    /// Create a scheduler building on `first_state_hash`
    ///
    /// With `always_persist` the implicit state hash of a finalized schedule is
    /// committed as well as computed.
    pub fn new(squash: Arc<dyn SquashHandler>, first_state_hash: StateHash, always_persist: bool) -> Self {
        Self {
            squash,
            always_persist,
            state: Mutex::new(State::new(first_state_hash)),
            condition: Condvar::new(),
        }
    }

    fn squash_and_cache(
        &self,
        state: &mut State,
        batch_id: &BatchId,
        contexts: Vec<ContextId>,
        persist: bool,
    ) -> SchedulerResult<StateHash> {
        let first = state.first_state_hash.clone();
        let state_hash = self.squash.squash(&first, &contexts, persist, true)?;
        state.cleaned.extend(contexts);
        if let Some(batch) = state.batches.get_mut(batch_id) {
            batch.computed_state_hash = Some(state_hash.clone());
        }
        Ok(state_hash)
    }
}

impl Scheduler for ParallelScheduler {
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
        if !state.scheduled.contains(txn_id) {
            if state.retired.contains_key(txn_id) {
                tracing::debug!("Ignoring result for unscheduled transaction {}", txn_id);
                return Ok(());
            }
            return Err(SchedulerError::NotScheduled(txn_id.clone()));
        }
        let result = TxnExecutionResult::new(
            txn_id.clone(),
            is_valid,
            context_id,
            state.first_state_hash.clone(),
            receipt,
        );

        if state.outstanding.remove(txn_id) {
            tracing::debug!("Dropping stale result of transaction {}; rescheduling", txn_id);
            state.return_to_available(txn_id);
        } else {
            state.record_result(result);
        }
        self.condition.notify_all();
        Ok(())
    }

    fn get_batch_execution_result(&self, batch_id: &BatchId) -> SchedulerResult<Option<BatchExecutionResult>> {
        let mut state = self.state.lock();
        if state.cancelled {
            return Err(SchedulerError::Cancelled);
        }
        let Some(batch) = state.batches.get(batch_id) else {
            return Err(SchedulerError::UnknownBatch(batch_id.clone()));
        };
        let expected = batch.expected_state_hash.clone();
        let cached = batch.computed_state_hash.clone();

        match state.batch_status(batch_id) {
            BatchStatus::Invalid => return Ok(Some(BatchExecutionResult::invalid())),
            BatchStatus::Pending => return Ok(None),
            BatchStatus::Valid => {}
        }
        if cached.is_some() {
            return Ok(Some(BatchExecutionResult::valid(cached)));
        }

        if let Some(expected) = expected {
            let Some(contexts) = state.contexts_for_squash(batch_id) else {
                return Ok(None);
            };
            let first = state.first_state_hash.clone();
            let computed = self.squash.squash(&first, &contexts, false, false)?;
            let persist = computed == expected;
            if persist {
                tracing::info!("Batch {} reached expected state {}", batch_id, computed);
            } else {
                tracing::warn!(
                    "Batch {} produced state {} but {} was expected",
                    batch_id,
                    computed,
                    expected
                );
            }
            let state_hash = self.squash_and_cache(&mut state, batch_id, contexts, persist)?;
            return Ok(Some(BatchExecutionResult::valid(Some(state_hash))));
        }

        if state.is_final {
            match state.is_last_valid_batch(batch_id) {
                None => return Ok(None),
                Some(false) => return Ok(Some(BatchExecutionResult::valid(None))),
                Some(true) => {}
            }
            let Some(contexts) = state.contexts_for_squash(batch_id) else {
                return Ok(None);
            };
            let state_hash = self.squash_and_cache(&mut state, batch_id, contexts, self.always_persist)?;
            tracing::debug!("Final state after batch {} is {}", batch_id, state_hash);
            return Ok(Some(BatchExecutionResult::valid(Some(state_hash))));
        }

        Ok(Some(BatchExecutionResult::valid(None)))
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
        state
            .available
            .values()
            .filter(|id| !state.has_unresolved_predecessors(id))
            .count()
    }

    fn finalize(&self) {
        self.state.lock().is_final = true;
        self.condition.notify_all();
    }

    fn complete(&self, block: bool) -> SchedulerResult<bool> {
        Ok(scheduler::wait_for_complete(&self.state, &self.condition, block))
    }

    fn cancel(&self) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        if state.cancelled {
            return Ok(());
        }

        let contexts = state.unreleased_contexts();
        if !contexts.is_empty() {
            let first = state.first_state_hash.clone();
            self.squash.squash(&first, &contexts, false, true)?;
        }
        tracing::info!("Schedule cancelled; discarded {} contexts", contexts.len());
        state.cleaned.extend(contexts);
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
