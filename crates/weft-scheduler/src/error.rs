//! Error types for the scheduler

use thiserror::Error;
use weft_types::{BatchId, TxnId, TypesError};

/// Failure reported by a squash handler
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("squash failed: {0}")]
pub struct SquashError(pub String);

impl SquashError {
    /// Create a squash error from a message
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Scheduler errors
///
/// These cover structural misuse of the scheduler only. A transaction that executes
/// as invalid is a result, never an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Batch added after `finalize`
    #[error("invalid attempt to add batch {0} to finalized scheduler")]
    AddAfterFinalize(BatchId),

    /// Batch without transactions
    #[error("batch {0} contains no transactions")]
    EmptyBatch(BatchId),

    /// Batch id already present in the schedule
    #[error("batch {0} is already in the schedule")]
    DuplicateBatch(BatchId),

    /// Transaction id already present in the schedule
    #[error("transaction {0} is already in the schedule")]
    DuplicateTransaction(TxnId),

    /// Result reported for a transaction that was never handed out
    #[error("transaction not scheduled: {0}")]
    NotScheduled(TxnId),

    /// Result reported for a transaction that is no longer in flight
    #[error("transaction {0} already has a result")]
    DuplicateResult(TxnId),

    /// Batch id not present in the schedule
    #[error("batch {0} is not in the schedule")]
    UnknownBatch(BatchId),

    /// Operation attempted after `cancel`
    #[error("scheduler has been cancelled")]
    Cancelled,

    /// The squash handler failed
    #[error(transparent)]
    Squash(#[from] SquashError),
}

impl From<TypesError> for SchedulerError {
    fn from(err: TypesError) -> Self {
        match err {
            TypesError::EmptyBatch(batch) => SchedulerError::EmptyBatch(batch),
            TypesError::DuplicateTransaction { txn, .. } => SchedulerError::DuplicateTransaction(txn),
        }
    }
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
