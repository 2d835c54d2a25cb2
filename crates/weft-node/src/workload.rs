//! Batch workloads: JSON files and a seeded random generator

use anyhow::{Context, Result};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use weft_types::{Batch, StateHash, Transaction, TypesResult};

/// Transaction family name carried by workload transactions
pub const FAMILY_NAME: &str = "weft-kv";
/// Transaction family version
pub const FAMILY_VERSION: &str = "1.0";

/// What a transaction does when executed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnPayload {
    /// Values to store; `None` deletes the address
    #[serde(default)]
    pub writes: BTreeMap<String, Option<String>>,
    /// Addresses holding a decimal counter to increment
    #[serde(default)]
    pub increments: Vec<String>,
    /// Execute as invalid
    #[serde(default)]
    pub fail: bool,
}

impl TxnPayload {
    /// Decode a payload
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Encode a payload
    pub fn encode(&self) -> Bytes {
        // Maps with string keys always serialize
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }
}

/// A transaction as written in a workload file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnEntry {
    /// Transaction id
    pub id: String,
    /// Declared input addresses or prefixes
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Declared output addresses or prefixes
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Explicit dependencies on other transaction ids
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Execution behaviour
    #[serde(flatten)]
    pub payload: TxnPayload,
}

impl TxnEntry {
    fn into_transaction(self) -> Transaction {
        let mut builder = Transaction::builder(self.id)
            .family(FAMILY_NAME, FAMILY_VERSION)
            .inputs(self.inputs)
            .outputs(self.outputs)
            .payload(self.payload.encode());
        for dependency in self.dependencies {
            builder = builder.dependency(dependency);
        }
        builder.build()
    }
}

/// A batch as written in a workload file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Batch id
    pub id: String,
    /// Never unschedule this batch
    #[serde(default)]
    pub required: bool,
    /// Expected state hash after the batch
    #[serde(default)]
    pub state_hash: Option<String>,
    /// Transactions in order
    pub transactions: Vec<TxnEntry>,
}

/// A batch ready for `add_batch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBatch {
    /// The batch
    pub batch: Batch,
    /// Expected state hash after the batch
    pub state_hash: Option<StateHash>,
    /// Never unschedule this batch
    pub required: bool,
}

/// An ordered list of batches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Batches in schedule order
    pub batches: Vec<BatchEntry>,
}

impl Workload {
    /// Load a workload from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!("Loading workload from {:?}", path);
        let content =
            std::fs::read_to_string(path).with_context(|| format!("failed to read workload {}", path.display()))?;
        let workload: Workload =
            serde_json::from_str(&content).with_context(|| format!("invalid workload {}", path.display()))?;
        Ok(workload)
    }

    /// Total number of transactions
    pub fn txn_count(&self) -> usize {
        self.batches.iter().map(|b| b.transactions.len()).sum()
    }

    /// Build validated batches
    pub fn into_batches(self) -> TypesResult<Vec<PlannedBatch>> {
        self.batches
            .into_iter()
            .map(|entry| {
                let txns = entry.transactions.into_iter().map(TxnEntry::into_transaction).collect();
                Ok(PlannedBatch {
                    batch: Batch::new(entry.id, txns)?,
                    state_hash: entry.state_hash.map(StateHash::new),
                    required: entry.required,
                })
            })
            .collect()
    }

    /// Generate `txn_count` transactions over a small hierarchical address space
    ///
    /// Addresses look like `acct/{group}/{slot}`. Most transactions increment one
    /// counter; some write a whole group through a prefix, some touch two groups and
    /// a few fail, so batches conflict and fail at realistic rates.
    pub fn synthetic(txn_count: usize, seed: u64) -> Self {
        const GROUPS: usize = 4;
        const SLOTS: usize = 8;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut batches = Vec::new();
        let mut next_txn = 0;

        while next_txn < txn_count {
            let size = rng.gen_range(1..=4).min(txn_count - next_txn);
            let mut transactions = Vec::with_capacity(size);
            for _ in 0..size {
                let id = format!("txn-{:05}", next_txn);
                let group = rng.gen_range(0..GROUPS);
                let slot = rng.gen_range(0..SLOTS);
                let address = format!("acct/{}/{}", group, slot);

                let mut entry = match rng.gen_range(0..100) {
                    0..=59 => TxnEntry {
                        inputs: vec![address.clone()],
                        outputs: vec![address.clone()],
                        payload: TxnPayload {
                            increments: vec![address],
                            ..Default::default()
                        },
                        ..Default::default()
                    },
                    60..=79 => {
                        let prefix = format!("acct/{}", group);
                        TxnEntry {
                            inputs: vec![prefix.clone()],
                            outputs: vec![prefix],
                            payload: TxnPayload {
                                writes: BTreeMap::from([(address, Some(id.clone()))]),
                                ..Default::default()
                            },
                            ..Default::default()
                        }
                    }
                    80..=94 => {
                        let other = format!("acct/{}/{}", (group + 1) % GROUPS, slot);
                        TxnEntry {
                            inputs: vec![address.clone(), other.clone()],
                            outputs: vec![address.clone(), other.clone()],
                            payload: TxnPayload {
                                increments: vec![address],
                                writes: BTreeMap::from([(other, None)]),
                                ..Default::default()
                            },
                            ..Default::default()
                        }
                    }
                    _ => TxnEntry {
                        inputs: vec![address.clone()],
                        outputs: vec![address],
                        payload: TxnPayload {
                            fail: true,
                            ..Default::default()
                        },
                        ..Default::default()
                    },
                };
                entry.id = id;
                if next_txn > 0 && rng.gen_bool(0.05) {
                    entry.dependencies.push(format!("txn-{:05}", rng.gen_range(0..next_txn)));
                }
                transactions.push(entry);
                next_txn += 1;
            }
            batches.push(BatchEntry {
                id: format!("batch-{:05}", batches.len()),
                transactions,
                ..Default::default()
            });
        }

        Workload { batches }
    }
}
