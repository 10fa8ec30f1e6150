// src/exec/resolver.rs

use std::sync::Arc;

use tracing::{debug, warn};

use crate::os::{ProcessInfo, ProcessTable, ProcessTableError};
use crate::registry::{ProcessHandle, ProgramEntry};

use super::run_blocking;

/// Finds the OS process backing a managed program.
///
/// Lookups are by process name, never by pid alone: a stored pid may have
/// been reused by an unrelated process.
#[derive(Debug, Clone)]
pub struct ProcessResolver {
    table: Arc<dyn ProcessTable>,
}

impl ProcessResolver {
    pub fn new(table: Arc<dyn ProcessTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<dyn ProcessTable> {
        &self.table
    }

    pub async fn processes(&self) -> Result<Vec<ProcessInfo>, ProcessTableError> {
        run_blocking(&self.table, |t| t.processes()).await
    }

    /// Process listing where a transient failure reads as "nothing found".
    pub async fn processes_or_empty(&self) -> Vec<ProcessInfo> {
        match self.processes().await {
            Ok(list) => list,
            Err(e) => {
                debug!(error = %e, "process enumeration failed; treating as no match");
                Vec::new()
            }
        }
    }

    /// Match `entry` against an existing listing. Learns the OS-reported
    /// name when it differs from the stored one.
    pub fn resolve_in(entry: &ProgramEntry, processes: &[ProcessInfo]) -> Option<ProcessHandle> {
        let wanted = entry.executable_name();
        let found = processes.iter().find(|p| p.matches_name(&wanted))?;
        let name = found.display_name().to_string();
        entry.set_executable_name(&name);
        Some(ProcessHandle {
            pid: found.pid,
            name,
        })
    }

    pub async fn resolve(&self, entry: &ProgramEntry) -> Option<ProcessHandle> {
        let processes = self.processes_or_empty().await;
        Self::resolve_in(entry, &processes)
    }

    pub async fn find_by_name(&self, name: &str) -> Vec<ProcessInfo> {
        self.processes_or_empty()
            .await
            .into_iter()
            .filter(|p| p.matches_name(name))
            .collect()
    }

    pub async fn find_by_partial_name(&self, partial: &str) -> Vec<ProcessInfo> {
        self.processes_or_empty()
            .await
            .into_iter()
            .filter(|p| p.matches_partial(partial))
            .collect()
    }

    /// `handle` still points at a live process of the same name.
    pub fn is_live_in(handle: &ProcessHandle, processes: &[ProcessInfo]) -> bool {
        processes
            .iter()
            .any(|p| p.pid == handle.pid && p.matches_name(&handle.name))
    }

    pub async fn is_alive(&self, pid: u32) -> bool {
        run_blocking(&self.table, move |t| Ok(t.is_alive(pid)))
            .await
            .unwrap_or(false)
    }

    /// Kill every process whose name contains `partial`, except ourselves.
    /// Returns how many kills succeeded.
    pub async fn kill_matching(&self, partial: &str) -> usize {
        if partial.trim().is_empty() {
            warn!("refusing to kill by an empty name");
            return 0;
        }
        let own_pid = std::process::id();
        let targets: Vec<ProcessInfo> = self
            .find_by_partial_name(partial)
            .await
            .into_iter()
            .filter(|p| p.pid != own_pid)
            .collect();

        let mut killed = 0;
        for target in targets {
            let pid = target.pid;
            match run_blocking(&self.table, move |t| t.kill(pid)).await {
                Ok(()) => {
                    debug!(pid, name = %target.name, "killed process");
                    killed += 1;
                }
                Err(e) => warn!(pid, name = %target.name, error = %e, "kill failed"),
            }
        }
        killed
    }
}
