//! Scheduler selection

use crate::parallel::ParallelScheduler;
use crate::scheduler::Scheduler;
use crate::serial::SerialScheduler;
use crate::squash::SquashHandler;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use weft_types::StateHash;

/// Which scheduler implementation to run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// One transaction at a time, in arrival order
    Serial,
    /// Non-conflicting transactions concurrently
    #[default]
    Parallel,
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::Serial => write!(f, "serial"),
            SchedulerKind::Parallel => write!(f, "parallel"),
        }
    }
}

/// Scheduler configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Implementation to build
    pub kind: SchedulerKind,
    /// Commit the final state hash even when no batch asked for one
    pub always_persist: bool,
}

impl SchedulerConfig {
    /// Create a configuration for the given implementation
    pub fn new(kind: SchedulerKind) -> Self {
        Self {
            kind,
            always_persist: false,
        }
    }

    /// Build a scheduler starting from `first_state_hash`
    pub fn build(&self, squash: Arc<dyn SquashHandler>, first_state_hash: StateHash) -> Arc<dyn Scheduler> {
        tracing::info!(
            "Creating {} scheduler on state {} (always persist: {})",
            self.kind,
            first_state_hash,
            self.always_persist
        );
        match self.kind {
            SchedulerKind::Serial => Arc::new(SerialScheduler::new(squash, first_state_hash, self.always_persist)),
            SchedulerKind::Parallel => Arc::new(ParallelScheduler::new(squash, first_state_hash, self.always_persist)),
        }
    }
}
