//! Configuration types for weft

use crate::cli::Cli;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use weft_scheduler::SchedulerConfig;

/// Node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Scheduler selection
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Number of executor threads
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// State committed before the first batch (address -> UTF-8 value)
    #[serde(default)]
    pub initial_state: BTreeMap<String, String>,
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            workers: default_workers(),
            initial_state: BTreeMap::new(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!("Loading config from {:?}", path);
        let content =
            std::fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        let config: NodeConfig =
            serde_json::from_str(&content).with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Apply command line overrides
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(workers) = cli.workers {
            self.workers = workers;
        }
        if let Some(kind) = cli.scheduler {
            self.scheduler.kind = kind.into();
        }
        if cli.always_persist {
            self.scheduler.always_persist = true;
        }
        // At least one executor
        self.workers = self.workers.max(1);
    }
}
