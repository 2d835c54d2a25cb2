//! In-memory execution contexts
//!
//! A context collects the writes of one transaction on top of a committed state
//! root and a list of base contexts. Reads resolve through the context's own
//! writes, then breadth-first through its bases (earlier bases first), then the
//! committed state.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use weft_scheduler::{SquashError, SquashHandler, StateChange};
use weft_types::{ContextId, StateHash};

/// Committed state: address to value
pub type StateMap = BTreeMap<String, Bytes>;

/// Context errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// Context id not known (never created or already purged)
    #[error("unknown context: {0}")]
    UnknownContext(ContextId),

    /// State root never committed
    #[error("unknown state root: {0}")]
    UnknownStateRoot(StateHash),

    /// Read outside the transaction's declared inputs
    #[error("address {0} is not among the declared inputs")]
    NotReadable(String),

    /// Write outside the transaction's declared outputs
    #[error("address {0} is not among the declared outputs")]
    NotWritable(String),
}

/// Result type for context operations
pub type ContextResult<T> = Result<T, ContextError>;

#[derive(Debug)]
struct Context {
    state_root: StateHash,
    bases: Vec<ContextId>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    /// `None` marks a delete
    writes: BTreeMap<String, Option<Bytes>>,
}

fn authorized(declared: &[String], address: &str) -> bool {
    declared.iter().any(|prefix| address.starts_with(prefix.as_str()))
}

/// Hash a state map with SHA-256
pub fn state_hash(state: &StateMap) -> StateHash {
    let mut hasher = Sha256::new();
    for (address, value) in state {
        hasher.update((address.len() as u64).to_be_bytes());
        hasher.update(address.as_bytes());
        hasher.update((value.len() as u64).to_be_bytes());
        hasher.update(value);
    }
    StateHash::from_digest(&hasher.finalize())
}

/// Thread-safe store of contexts and committed states
pub struct ContextManager {
    contexts: DashMap<ContextId, Context>,
    roots: DashMap<StateHash, Arc<StateMap>>,
    /// Contexts a squash has finished with, freed by [`ContextManager::purge_released`]
    released: Mutex<HashSet<ContextId>>,
    next_id: AtomicU64,
}

impl ContextManager {
    /// Create a manager with no committed state
    pub fn new() -> Self {
        Self {
            contexts: DashMap::new(),
            roots: DashMap::new(),
            released: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Commit an initial state and return its root
    pub fn commit_genesis(&self, state: StateMap) -> StateHash {
        let root = state_hash(&state);
        tracing::info!("Committed initial state {} with {} entries", root, state.len());
        self.roots.insert(root.clone(), Arc::new(state));
        root
    }

    /// Committed state for a root
    pub fn committed(&self, root: &StateHash) -> Option<Arc<StateMap>> {
        self.roots.get(root).map(|entry| Arc::clone(entry.value()))
    }

    /// Create a context for a transaction declaring `inputs` and `outputs`
    pub fn create_context(
        &self,
        state_root: &StateHash,
        bases: &[ContextId],
        inputs: &[String],
        outputs: &[String],
    ) -> ContextResult<ContextId> {
        if !self.roots.contains_key(state_root) {
            return Err(ContextError::UnknownStateRoot(state_root.clone()));
        }
        if let Some(missing) = bases.iter().find(|id| !self.contexts.contains_key(*id)) {
            return Err(ContextError::UnknownContext(missing.clone()));
        }
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = ContextId::new(format!("ctx-{:06}", n));
        self.contexts.insert(
            id.clone(),
            Context {
                state_root: state_root.clone(),
                bases: bases.to_vec(),
                inputs: inputs.to_vec(),
                outputs: outputs.to_vec(),
                writes: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    /// Read `address` as seen by the context
    pub fn get(&self, context_id: &ContextId, address: &str) -> ContextResult<Option<Bytes>> {
        let (state_root, bases) = {
            let context = self
                .contexts
                .get(context_id)
                .ok_or_else(|| ContextError::UnknownContext(context_id.clone()))?;
            if !authorized(&context.inputs, address) {
                return Err(ContextError::NotReadable(address.to_string()));
            }
            if let Some(value) = context.writes.get(address) {
                return Ok(value.clone());
            }
            (context.state_root.clone(), context.bases.clone())
        };

        if let Some(value) = self.find_in_chain(&bases, address)? {
            return Ok(value);
        }
        Ok(self.committed(&state_root).and_then(|state| state.get(address).cloned()))
    }

    /// Write `address` in the context
    pub fn set(&self, context_id: &ContextId, address: &str, value: Bytes) -> ContextResult<()> {
        self.write(context_id, address, Some(value))
    }

    /// Delete `address` in the context
    pub fn delete(&self, context_id: &ContextId, address: &str) -> ContextResult<()> {
        self.write(context_id, address, None)
    }

    fn write(&self, context_id: &ContextId, address: &str, value: Option<Bytes>) -> ContextResult<()> {
        let mut context = self
            .contexts
            .get_mut(context_id)
            .ok_or_else(|| ContextError::UnknownContext(context_id.clone()))?;
        if !authorized(&context.outputs, address) {
            return Err(ContextError::NotWritable(address.to_string()));
        }
        context.writes.insert(address.to_string(), value);
        Ok(())
    }

    /// Writes recorded in a context, as receipt entries
    pub fn state_changes(&self, context_id: &ContextId) -> ContextResult<Vec<StateChange>> {
        let context = self
            .contexts
            .get(context_id)
            .ok_or_else(|| ContextError::UnknownContext(context_id.clone()))?;
        Ok(context
            .writes
            .iter()
            .map(|(address, value)| StateChange {
                address: address.clone(),
                value: value.as_ref().map(|v| v.to_vec()),
            })
            .collect())
    }

    /// Drop a context that will never be reported
    pub fn discard(&self, context_id: &ContextId) {
        self.contexts.remove(context_id);
    }

    /// Free every released context no live context still builds on
    pub fn purge_released(&self) -> usize {
        let mut released = self.released.lock();
        let mut reachable = HashSet::new();
        let mut queue: VecDeque<ContextId> = self
            .contexts
            .iter()
            .filter(|entry| !released.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        while let Some(id) = queue.pop_front() {
            if let Some(context) = self.contexts.get(&id) {
                for base in &context.bases {
                    if reachable.insert(base.clone()) {
                        queue.push_back(base.clone());
                    }
                }
            }
        }

        let purged: Vec<ContextId> = released.iter().filter(|id| !reachable.contains(*id)).cloned().collect();
        for id in &purged {
            self.contexts.remove(id);
            released.remove(id);
        }
        tracing::debug!("Purged {} released contexts", purged.len());
        purged.len()
    }

    /// Number of contexts held
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether no contexts are held
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// First value for `address` found breadth-first from `start`
    fn find_in_chain(&self, start: &[ContextId], address: &str) -> ContextResult<Option<Option<Bytes>>> {
        let mut queue: VecDeque<ContextId> = start.iter().cloned().collect();
        let mut seen: HashSet<ContextId> = start.iter().cloned().collect();
        while let Some(id) = queue.pop_front() {
            let context = self
                .contexts
                .get(&id)
                .ok_or_else(|| ContextError::UnknownContext(id.clone()))?;
            if let Some(value) = context.writes.get(address) {
                return Ok(Some(value.clone()));
            }
            for base in &context.bases {
                if seen.insert(base.clone()) {
                    queue.push_back(base.clone());
                }
            }
        }
        Ok(None)
    }

    /// Flatten contexts breadth-first, first write per address wins
    fn flatten(&self, context_ids: &[ContextId]) -> ContextResult<(BTreeMap<String, Option<Bytes>>, Vec<ContextId>)> {
        let mut writes = BTreeMap::new();
        let mut queue: VecDeque<ContextId> = context_ids.iter().cloned().collect();
        let mut visited: Vec<ContextId> = Vec::new();
        let mut seen: HashSet<ContextId> = context_ids.iter().cloned().collect();
        while let Some(id) = queue.pop_front() {
            let context = self
                .contexts
                .get(&id)
                .ok_or_else(|| ContextError::UnknownContext(id.clone()))?;
            for (address, value) in &context.writes {
                writes.entry(address.clone()).or_insert_with(|| value.clone());
            }
            for base in &context.bases {
                if seen.insert(base.clone()) {
                    queue.push_back(base.clone());
                }
            }
            visited.push(id);
        }
        Ok((writes, visited))
    }

    /// Apply contexts to a committed state and hash the result
    pub fn squash_contexts(
        &self,
        state_root: &StateHash,
        context_ids: &[ContextId],
        persist: bool,
        clean_up: bool,
    ) -> ContextResult<StateHash> {
        let base = self
            .committed(state_root)
            .ok_or_else(|| ContextError::UnknownStateRoot(state_root.clone()))?;
        let (writes, visited) = self.flatten(context_ids)?;

        let mut state = StateMap::clone(&base);
        for (address, value) in writes {
            match value {
                Some(value) => state.insert(address, value),
                None => state.remove(&address),
            };
        }
        let root = state_hash(&state);
        tracing::debug!(
            "Squashed {} contexts onto {} -> {} (persist: {}, clean up: {})",
            visited.len(),
            state_root,
            root,
            persist,
            clean_up
        );

        if persist {
            self.roots.insert(root.clone(), Arc::new(state));
        }
        if clean_up {
            self.released.lock().extend(visited);
        }
        Ok(root)
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SquashHandler for ContextManager {
    fn squash(
        &self,
        state_root: &StateHash,
        context_ids: &[ContextId],
        persist: bool,
        clean_up: bool,
    ) -> Result<StateHash, SquashError> {
        self.squash_contexts(state_root, context_ids, persist, clean_up)
            .map_err(|e| SquashError::new(e.to_string()))
    }
}
