//! Weft node
//!
//! Runs batch workloads through a Weft scheduler:
//! - CLI and JSON configuration
//! - In-memory execution contexts implementing the scheduler's squash step
//! - A worker pool that executes scheduled transactions
//! - Workload files and a seeded synthetic generator
//!
//! # Architecture
//!
//! ```text
//!   Workload ──add_batch──▶ Scheduler ◀──results── workers (N)
//!                              │                      ▲
//!                         iter() in order             │
//!                              ▼                      │
//!                         dispatcher ──channel────────┘
//!                              │
//!                    squash ◀──┴──▶ ContextManager
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod config;
pub mod context;
pub mod executor;
pub mod runner;
pub mod workload;

pub use cli::{Cli, SchedulerArg};
pub use config::NodeConfig;
pub use context::{state_hash, ContextError, ContextManager, ContextResult, StateMap};
pub use executor::{ExecutionError, ExecutionSummary, Executor};
pub use runner::{run, BatchReport};
pub use workload::{PlannedBatch, TxnPayload, Workload};
