//! Weft runner binary
//!
//! Loads a workload, schedules it on the configured scheduler, executes it on a
//! worker pool and prints one JSON line per batch.

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use weft_node::{runner, Cli, ContextManager, NodeConfig, Workload};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    tracing::info!("weft starting...");

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    config.apply_cli(&cli);

    let workload = match (&cli.workload, cli.synthetic) {
        (Some(path), _) => Workload::load(path)?,
        (None, Some(count)) => Workload::synthetic(count, cli.seed),
        (None, None) => bail!("either --workload or --synthetic is required"),
    };
    tracing::info!(
        "Workload has {} transactions in {} batches",
        workload.txn_count(),
        workload.batches.len()
    );
    let planned = workload.into_batches()?;

    let contexts = Arc::new(ContextManager::new());
    let reports = runner::run(&config, Arc::clone(&contexts), planned)?;
    for report in &reports {
        println!("{}", serde_json::to_string(report)?);
    }

    let purged = contexts.purge_released();
    tracing::info!("weft finished: {} batches, {} contexts freed", reports.len(), purged);

    Ok(())
}

