// src/exec/terminate.rs

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::registry::ProgramEntry;
use crate::types::ProgramState;

use super::exit_watch::ExitWatcher;
use super::resolver::ProcessResolver;
use super::{ExecSettings, matches_any_pattern};

/// Stops one program. Stopping never fails from the caller's point of
/// view: kill errors are logged and the program still ends up `Stopped`
/// (or stays `NotFound`).
#[derive(Debug, Clone)]
pub struct TerminationOrchestrator {
    resolver: ProcessResolver,
    exit_watcher: Arc<ExitWatcher>,
    settings: Arc<ExecSettings>,
}

impl TerminationOrchestrator {
    pub fn new(
        resolver: ProcessResolver,
        exit_watcher: Arc<ExitWatcher>,
        settings: Arc<ExecSettings>,
    ) -> Self {
        Self {
            resolver,
            exit_watcher,
            settings,
        }
    }

    /// Stop `entry`. The caller must hold the entry's operation lock.
    pub async fn terminate(&self, entry: &ProgramEntry) {
        let spec = entry.spec();
        self.exit_watcher.unwatch(entry.id());

        let processes = self.resolver.processes_or_empty().await;
        let live = entry
            .process()
            .filter(|h| ProcessResolver::is_live_in(h, &processes));

        let target_name = match live {
            Some(handle) => {
                // Re-read the name from the OS; fall back to the learned one.
                processes
                    .iter()
                    .find(|p| p.pid == handle.pid)
                    .map(|p| p.display_name().to_string())
                    .unwrap_or_else(|| entry.executable_name())
            }
            None if spec.executable_path.as_os_str().is_empty()
                && spec.executable_name.is_none() =>
            {
                warn!(program = %spec.name, "no process and no executable configured; nothing to stop");
                String::new()
            }
            None => entry.executable_name(),
        };

        if !target_name.is_empty() {
            let killed = self.resolver.kill_matching(&target_name).await;
            info!(program = %spec.name, name = %target_name, killed, "stopped");

            if let Some(service) = matches_any_pattern(&target_name, &self.settings.companion_services) {
                let extra = self.resolver.kill_matching(&service).await;
                debug!(program = %spec.name, %service, killed = extra, "stopped companion service");
            }
        }

        let to = match entry.state() {
            ProgramState::NotFound => ProgramState::NotFound,
            _ => ProgramState::Stopped,
        };
        entry.clear_process(to);
    }
}
