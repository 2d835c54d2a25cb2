//! Shared helpers for scheduler integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use weft_scheduler::{Scheduler, SquashError, SquashHandler, TxnInformation, TxnReceipt};
use weft_types::{Batch, ContextId, StateHash, Transaction};

/// One recorded squash call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SquashCall {
    pub contexts: Vec<ContextId>,
    pub persist: bool,
    pub clean_up: bool,
}

struct Context {
    writes: BTreeMap<String, String>,
    bases: Vec<ContextId>,
}

/// In-memory contexts with a deterministic, readable state hash
///
/// Executing a transaction reads its inputs through the base contexts and writes
/// `id<read,read>` to every output, so the final state records the order in which
/// transactions observed each other.
#[derive(Default)]
pub struct MemoryState {
    contexts: Mutex<HashMap<ContextId, Context>>,
    calls: Mutex<Vec<SquashCall>>,
    next_context: AtomicUsize,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SquashCall> {
        self.calls.lock().clone()
    }

    /// Execute `info`, failing every transaction named in `failing`
    pub fn execute(&self, info: &TxnInformation, failing: &HashSet<String>) -> Option<ContextId> {
        if failing.contains(info.txn_id().as_str()) {
            return None;
        }
        let reads: Vec<String> = info
            .txn
            .inputs()
            .iter()
            .map(|address| self.lookup(&info.base_context_ids, address).unwrap_or_default())
            .collect();
        let value = format!("{}<{}>", info.txn_id(), reads.join(","));
        let writes = info
            .txn
            .outputs()
            .iter()
            .map(|address| (address.clone(), value.clone()))
            .collect();

        let n = self.next_context.fetch_add(1, Ordering::SeqCst);
        let context_id = ContextId::new(format!("ctx-{}-{}", info.txn_id(), n));
        self.contexts.lock().insert(
            context_id.clone(),
            Context {
                writes,
                bases: info.base_context_ids.clone(),
            },
        );
        Some(context_id)
    }

    fn lookup(&self, bases: &[ContextId], address: &str) -> Option<String> {
        self.flatten(bases).ok()?.remove(address)
    }

    /// Breadth-first over contexts and their bases; the first write seen wins
    fn flatten(&self, context_ids: &[ContextId]) -> Result<BTreeMap<String, String>, SquashError> {
        let contexts = self.contexts.lock();
        let mut state = BTreeMap::new();
        let mut queue: VecDeque<ContextId> = context_ids.iter().cloned().collect();
        let mut seen: HashSet<ContextId> = context_ids.iter().cloned().collect();
        while let Some(id) = queue.pop_front() {
            let context = contexts
                .get(&id)
                .ok_or_else(|| SquashError::new(format!("unknown context {}", id)))?;
            for (address, value) in &context.writes {
                state.entry(address.clone()).or_insert_with(|| value.clone());
            }
            for base in &context.bases {
                if seen.insert(base.clone()) {
                    queue.push_back(base.clone());
                }
            }
        }
        Ok(state)
    }
}

/// Hash of a flattened state as a readable string
pub fn hash_of(state: &BTreeMap<String, String>) -> StateHash {
    let entries: Vec<String> = state.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    StateHash::new(entries.join(";"))
}

impl SquashHandler for MemoryState {
    fn squash(
        &self,
        _state_root: &StateHash,
        context_ids: &[ContextId],
        persist: bool,
        clean_up: bool,
    ) -> Result<StateHash, SquashError> {
        self.calls.lock().push(SquashCall {
            contexts: context_ids.to_vec(),
            persist,
            clean_up,
        });
        Ok(hash_of(&self.flatten(context_ids)?))
    }
}

/// Run `workers` threads polling the scheduler until the schedule completes
pub fn run_workers(scheduler: &dyn Scheduler, state: &MemoryState, workers: usize, failing: &HashSet<String>) {
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if scheduler.complete(false).unwrap() {
                    break;
                }
                match scheduler.next_transaction().unwrap() {
                    Some(info) => {
                        let context = state.execute(&info, failing);
                        let receipt = if context.is_some() {
                            TxnReceipt::default()
                        } else {
                            TxnReceipt::error("rejected by test workload")
                        };
                        scheduler
                            .set_transaction_execution_result(info.txn_id(), context.is_some(), context, receipt)
                            .unwrap();
                    }
                    None => thread::yield_now(),
                }
            });
        }
    });
}

pub fn txn(id: &str, inputs: &[&str], outputs: &[&str]) -> Transaction {
    Transaction::builder(id)
        .inputs(inputs.iter().copied())
        .outputs(outputs.iter().copied())
        .build()
}

pub fn batch(id: &str, txns: Vec<Transaction>) -> Batch {
    Batch::new(id, txns).unwrap()
}

/// Five batches over hierarchical addresses; `t5` fails, taking `b3` with it
pub fn mixed_workload() -> (Vec<Batch>, HashSet<String>) {
    let batches = vec![
        batch("b1", vec![txn("t1", &[], &["a"]), txn("t2", &[], &["b"])]),
        batch("b2", vec![txn("t3", &["a"], &["c"]), txn("t4", &["b"], &["a/x"])]),
        batch("b3", vec![txn("t5", &["c"], &["b"]), txn("t6", &[], &["d"])]),
        batch("b4", vec![txn("t7", &["a/x", "b"], &["e"]), txn("t8", &["a"], &["a"])]),
        batch("b5", vec![txn("t9", &["e", "d"], &["f"])]),
    ];
    (batches, HashSet::from(["t5".to_string()]))
}

/// State after running [`mixed_workload`] one transaction at a time
pub fn mixed_workload_final_state() -> StateHash {
    let e = "t7<t4<t2<>>,t2<>>";
    let state = BTreeMap::from([
        ("a".to_string(), "t8<t1<>>".to_string()),
        ("a/x".to_string(), "t4<t2<>>".to_string()),
        ("b".to_string(), "t2<>".to_string()),
        ("c".to_string(), "t3<t1<>>".to_string()),
        ("e".to_string(), e.to_string()),
        ("f".to_string(), format!("t9<{},>", e)),
    ]);
    hash_of(&state)
}
