// src/exec/bulk.rs

//! Start-all / stop-all.
//!
//! Starts fan out with bounded parallelism; one slow or failing program
//! only ever occupies its own slot. Stops run one after another.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::errors::StartError;
use crate::types::ProgramId;

use super::supervisor::Supervisor;

/// Tally of a bulk start. `succeeded + failed` equals the number of
/// programs attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

impl BulkOutcome {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

pub(crate) async fn start_many(
    supervisor: &Arc<Supervisor>,
    ids: Vec<ProgramId>,
    concurrency: usize,
) -> BulkOutcome {
    let slots = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut set = JoinSet::new();

    for id in ids {
        let supervisor = Arc::clone(supervisor);
        let slots = Arc::clone(&slots);
        set.spawn(async move {
            let Ok(_slot) = slots.acquire_owned().await else {
                return (id, Err(StartError::LaunchFailed("bulk start cancelled".to_string())));
            };
            (id, supervisor.start(id).await)
        });
    }

    let mut outcome = BulkOutcome::default();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((_, Ok(_))) => outcome.succeeded += 1,
            Ok((id, Err(e))) => {
                warn!(program = %id, error = %e, "start failed");
                outcome.failed += 1;
            }
            Err(e) => {
                error!(error = %e, "start task panicked");
                outcome.failed += 1;
            }
        }
    }

    info!(succeeded = outcome.succeeded, failed = outcome.failed, "bulk start finished");
    outcome
}

pub(crate) async fn stop_many(supervisor: &Supervisor, ids: Vec<ProgramId>) {
    let count = ids.len();
    for id in ids {
        supervisor.stop(id).await;
    }
    info!(count, "bulk stop finished");
}
