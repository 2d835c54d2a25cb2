//! Schedule, execute and report a workload

use crate::config::NodeConfig;
use crate::context::{ContextManager, StateMap};
use crate::executor::Executor;
use crate::workload::PlannedBatch;
use anyhow::{bail, Result};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use weft_scheduler::{Scheduler, SquashHandler};
use weft_types::{BatchId, StateHash};

/// Result line printed for each batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Batch id
    pub batch_id: BatchId,
    /// Whether every transaction in the batch is valid
    pub is_valid: bool,
    /// State hash after the batch, if one was computed
    pub state_hash: Option<StateHash>,
}

/// Schedule and execute every batch, then collect the batch results
pub fn run(config: &NodeConfig, contexts: Arc<ContextManager>, planned: Vec<PlannedBatch>) -> Result<Vec<BatchReport>> {
    let initial: StateMap = config
        .initial_state
        .iter()
        .map(|(address, value)| (address.clone(), Bytes::from(value.clone())))
        .collect();
    let root = contexts.commit_genesis(initial);

    let squash: Arc<dyn SquashHandler> = contexts.clone();
    let scheduler = config.scheduler.build(squash, root);

    let mut batch_ids = Vec::with_capacity(planned.len());
    for planned in planned {
        batch_ids.push(planned.batch.id().clone());
        scheduler.add_batch(planned.batch, planned.state_hash, planned.required)?;
    }
    scheduler.finalize();
    tracing::info!(
        "Scheduled {} batches on {} workers",
        batch_ids.len(),
        config.workers
    );

    Executor::new(Arc::clone(&scheduler), contexts, config.workers).run();
    if !scheduler.complete(true)? {
        bail!("scheduler stopped before completing");
    }

    collect_reports(scheduler.as_ref(), batch_ids)
}

fn collect_reports(scheduler: &dyn Scheduler, batch_ids: Vec<BatchId>) -> Result<Vec<BatchReport>> {
    let mut reports = Vec::with_capacity(batch_ids.len());
    for batch_id in batch_ids {
        let Some(result) = scheduler.get_batch_execution_result(&batch_id)? else {
            bail!("batch {} has no result after completion", batch_id);
        };
        reports.push(BatchReport {
            batch_id,
            is_valid: result.is_valid,
            state_hash: result.state_hash,
        });
    }
    Ok(reports)
}
