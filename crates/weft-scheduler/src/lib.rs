//! # weft-scheduler
//!
//! Transaction scheduling for parallel execution.
//!
//! A control thread adds batches; executor threads pull transactions whose
//! predecessors have finished and report back their results. The scheduler decides
//! the order, tracks which batches are valid and asks a [`SquashHandler`] for the
//! state hash after each batch.
//!
//! This crate provides:
//! - [`ParallelScheduler`] - conflict-aware scheduling over an address trie
//! - [`SerialScheduler`] - one transaction at a time, in arrival order
//! - [`PredecessorTree`] and [`PredecessorChain`] - read/write conflict tracking
//! - [`SchedulerConfig`] - picks an implementation at runtime

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod parallel;
pub mod predecessors;
pub mod result;
pub mod scheduler;
pub mod serial;
pub mod squash;
pub mod tree;

pub use config::{SchedulerConfig, SchedulerKind};
pub use error::{SchedulerError, SchedulerResult, SquashError};
pub use parallel::ParallelScheduler;
pub use predecessors::{PredecessorChain, PredecessorTree, Predecessors};
pub use result::{BatchExecutionResult, Event, StateChange, TxnExecutionResult, TxnInformation, TxnReceipt};
pub use scheduler::{Scheduler, SchedulerIterator};
pub use serial::SerialScheduler;
pub use squash::SquashHandler;
pub use tree::{AddressNotInTree, AddressTrie, Walk};
