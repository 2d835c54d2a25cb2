//! # weft-types
//!
//! Core types shared by the Weft scheduler and its executors.
//!
//! This crate provides:
//! - [`Transaction`](transaction::Transaction) - a signed unit of work with its header
//! - [`Batch`](batch::Batch) - an atomic, ordered group of transactions
//! - Identifier newtypes ([`TxnId`], [`BatchId`], [`ContextId`], [`StateHash`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod error;
pub mod id;
pub mod transaction;

pub use batch::Batch;
pub use error::{TypesError, TypesResult};
pub use id::{BatchId, ContextId, StateHash, TxnId};
pub use transaction::{Transaction, TransactionBuilder, TransactionHeader};
