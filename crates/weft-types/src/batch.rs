//! Batch type

use crate::error::{TypesError, TypesResult};
use crate::id::{BatchId, TxnId};
use crate::transaction::Transaction;
use std::collections::HashSet;

/// An atomic group of transactions
///
/// A batch is valid only if every one of its transactions is valid. Construction
/// through [`Batch::new`] guarantees the batch is non-empty and that no transaction
/// appears twice.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Batch {
    /// Signature over the batch header, used as the batch id
    pub header_signature: BatchId,
    /// Transactions in execution order
    pub transactions: Vec<Transaction>,
}

impl Batch {
    /// Create a batch, validating its shape
    pub fn new(header_signature: impl Into<BatchId>, transactions: Vec<Transaction>) -> TypesResult<Self> {
        let batch = Self {
            header_signature: header_signature.into(),
            transactions,
        };
        batch.validate()?;
        Ok(batch)
    }

    /// Check that the batch is non-empty and free of duplicate transactions
    pub fn validate(&self) -> TypesResult<()> {
        if self.transactions.is_empty() {
            return Err(TypesError::EmptyBatch(self.header_signature.clone()));
        }

        let mut seen = HashSet::with_capacity(self.transactions.len());
        for txn in &self.transactions {
            if !seen.insert(txn.id()) {
                return Err(TypesError::DuplicateTransaction {
                    batch: self.header_signature.clone(),
                    txn: txn.id().clone(),
                });
            }
        }
        Ok(())
    }

    /// Batch id
    pub fn id(&self) -> &BatchId {
        &self.header_signature
    }

    /// Ids of the contained transactions, in order
    pub fn txn_ids(&self) -> impl DoubleEndedIterator<Item = &TxnId> + '_ {
        self.transactions.iter().map(Transaction::id)
    }

    /// Whether the batch contains the given transaction
    pub fn contains(&self, txn_id: &str) -> bool {
        self.transactions.iter().any(|t| t.id().as_str() == txn_id)
    }

    /// Number of transactions
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Check if batch is empty
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
