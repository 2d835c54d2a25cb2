//! Error types for batch and transaction construction

use crate::id::{BatchId, TxnId};
use thiserror::Error;

/// Errors raised while assembling batches
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// A batch must carry at least one transaction
    #[error("batch {0} contains no transactions")]
    EmptyBatch(BatchId),

    /// The same transaction appears twice in one batch
    #[error("transaction {txn} appears more than once in batch {batch}")]
    DuplicateTransaction {
        /// Batch being built
        batch: BatchId,
        /// Repeated transaction
        txn: TxnId,
    },
}

/// Result type for type construction
pub type TypesResult<T> = Result<T, TypesError>;
