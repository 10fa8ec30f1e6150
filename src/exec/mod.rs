// src/exec/mod.rs

//! Process lifecycle: resolving, launching, stopping and exit tracking.
//!
//! [`Supervisor`] is the facade the engine talks to. Every multi-step
//! operation on a program runs under that program's operation lock (see
//! [`crate::registry::ProgramEntry::lock_op`]), so start, stop and exit
//! reconciliation never interleave on the same program.

use std::sync::Arc;
use std::time::Duration;

use crate::config::LauncherConfig;
use crate::os::{ProcessTable, ProcessTableError, WaitPolicy};

pub mod bulk;
pub mod exit_watch;
pub mod launch;
pub mod launch_spec;
pub mod resolver;
pub mod supervisor;
pub mod terminate;

pub use bulk::BulkOutcome;
pub use exit_watch::ExitWatcher;
pub use launch::{LaunchOrchestrator, Started};
pub use launch_spec::build_launch_spec;
pub use resolver::ProcessResolver;
pub use supervisor::Supervisor;
pub use terminate::TerminationOrchestrator;

/// Tunables shared by the lifecycle components.
#[derive(Debug, Clone)]
pub struct ExecSettings {
    pub settle_delay: Duration,
    pub exit_grace: Duration,
    pub window: WaitPolicy,
    pub versioned_launchers: Vec<String>,
    pub hide_after_launch: Vec<String>,
    pub companion_services: Vec<String>,
    pub concurrency: usize,
}

impl ExecSettings {
    pub fn from_config(cfg: &LauncherConfig) -> Self {
        Self {
            settle_delay: cfg.config.settle_delay,
            exit_grace: cfg.config.exit_grace,
            window: WaitPolicy::from_config(cfg),
            versioned_launchers: cfg.config.versioned_launchers.clone(),
            hide_after_launch: cfg.config.hide_after_launch.clone(),
            companion_services: cfg.config.companion_services.clone(),
            concurrency: cfg.effective_concurrency(),
        }
    }
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self::from_config(&LauncherConfig::default())
    }
}

/// Run a blocking process-table call on the blocking pool.
pub(crate) async fn run_blocking<T, F>(
    table: &Arc<dyn ProcessTable>,
    f: F,
) -> Result<T, ProcessTableError>
where
    T: Send + 'static,
    F: FnOnce(&dyn ProcessTable) -> Result<T, ProcessTableError> + Send + 'static,
{
    let table = Arc::clone(table);
    match tokio::task::spawn_blocking(move || f(table.as_ref())).await {
        Ok(result) => result,
        Err(join) => Err(ProcessTableError::Blocking(join.to_string())),
    }
}

/// Case-insensitive "does `name` contain any of `patterns`". Empty patterns
/// are ignored.
pub(crate) fn matches_any_pattern(name: &str, patterns: &[String]) -> Option<String> {
    let lower = name.to_lowercase();
    patterns
        .iter()
        .map(|p| p.trim().to_lowercase())
        .find(|p| !p.is_empty() && lower.contains(p.as_str()))
}
