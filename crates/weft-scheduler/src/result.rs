//! Execution results and dispatch information

use serde::{Deserialize, Serialize};
use weft_types::{ContextId, StateHash, Transaction, TxnId};

/// A single state write or delete reported by an executor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// Address written
    pub address: String,
    /// New value, or `None` if the address was deleted
    pub value: Option<Vec<u8>>,
}

/// An event emitted while executing a transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event type
    pub event_type: String,
    /// Key/value attributes
    pub attributes: Vec<(String, String)>,
    /// Opaque event payload
    pub data: Vec<u8>,
}

/// Everything an executor reports about a transaction besides its validity
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnReceipt {
    /// Writes and deletes applied by the transaction
    pub state_changes: Vec<StateChange>,
    /// Events emitted
    pub events: Vec<Event>,
    /// Opaque typed data returned by the transaction family
    pub data: Vec<(String, Vec<u8>)>,
    /// Error message for invalid transactions
    pub error_message: String,
    /// Error payload for invalid transactions
    pub error_data: Vec<u8>,
}

impl TxnReceipt {
    /// Receipt carrying only an error message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            ..Default::default()
        }
    }
}

/// Recorded outcome of executing a transaction
///
/// An invalid result never carries a context id or a state hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TxnExecutionResult {
    /// Transaction id
    pub signature: TxnId,
    /// Whether the transaction applied successfully
    pub is_valid: bool,
    /// Context holding the transaction's state changes
    pub context_id: Option<ContextId>,
    /// State hash the transaction executed against
    pub state_hash: Option<StateHash>,
    /// Executor-reported details
    pub receipt: TxnReceipt,
}

impl TxnExecutionResult {
    /// Build a result as reported by an executor
    ///
    /// The context of an invalid result is dropped. A valid result may come without
    /// a context, in which case it contributes no state changes.
    pub fn new(
        signature: TxnId,
        is_valid: bool,
        context_id: Option<ContextId>,
        state_hash: StateHash,
        receipt: TxnReceipt,
    ) -> Self {
        if !is_valid {
            if let Some(context_id) = context_id {
                tracing::debug!("Dropping context {} of invalid transaction {}", context_id, signature);
            }
            return Self::invalid(signature, receipt);
        }
        Self {
            signature,
            is_valid: true,
            context_id,
            state_hash: Some(state_hash),
            receipt,
        }
    }

    /// A valid result
    pub fn valid(signature: TxnId, context_id: ContextId, state_hash: StateHash, receipt: TxnReceipt) -> Self {
        Self::new(signature, true, Some(context_id), state_hash, receipt)
    }

    /// An invalid result
    pub fn invalid(signature: TxnId, receipt: TxnReceipt) -> Self {
        Self {
            signature,
            is_valid: false,
            context_id: None,
            state_hash: None,
            receipt,
        }
    }
}

/// Outcome of a whole batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchExecutionResult {
    /// Whether every transaction in the batch is valid
    pub is_valid: bool,
    /// State hash after the batch, when one was requested
    pub state_hash: Option<StateHash>,
}

impl BatchExecutionResult {
    /// A valid batch with an optional state hash
    pub fn valid(state_hash: Option<StateHash>) -> Self {
        Self {
            is_valid: true,
            state_hash,
        }
    }

    /// An invalid batch
    pub fn invalid() -> Self {
        Self {
            is_valid: false,
            state_hash: None,
        }
    }
}

/// A transaction handed to an executor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxnInformation {
    /// Transaction to execute
    pub txn: Transaction,
    /// State hash to execute against
    pub state_hash: StateHash,
    /// Contexts to build on, highest priority first
    pub base_context_ids: Vec<ContextId>,
}

impl TxnInformation {
    /// Id of the contained transaction
    pub fn txn_id(&self) -> &TxnId {
        self.txn.id()
    }
}
