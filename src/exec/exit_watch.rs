// src/exec/exit_watch.rs

//! Per-program exit subscriptions.
//!
//! At most one watch exists per program. Watching the same pid again is a
//! no-op; watching a new pid replaces (and cancels) the old watch. An exit
//! is posted to the engine as [`EngineEvent::ProcessExited`] and confirmed
//! later by [`ExitWatcher::confirm_exit`], after a grace period.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::{EngineEvent, ExitEvent};
use crate::os::ProcessTable;
use crate::registry::ProgramEntry;
use crate::types::{ProgramId, ProgramState};

use super::resolver::ProcessResolver;

#[derive(Debug)]
struct Watch {
    pid: u32,
    task: JoinHandle<()>,
}

#[derive(Debug)]
pub struct ExitWatcher {
    table: Arc<dyn ProcessTable>,
    events: mpsc::Sender<EngineEvent>,
    watches: Mutex<HashMap<ProgramId, Watch>>,
}

impl ExitWatcher {
    pub fn new(table: Arc<dyn ProcessTable>, events: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            table,
            events,
            watches: Mutex::new(HashMap::new()),
        }
    }

    fn watches(&self) -> MutexGuard<'_, HashMap<ProgramId, Watch>> {
        self.watches.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to the exit of `pid` on behalf of `id`.
    pub fn watch(&self, id: ProgramId, pid: u32) {
        let mut watches = self.watches();
        if let Some(existing) = watches.get(&id) {
            if existing.pid == pid && !existing.task.is_finished() {
                return;
            }
            existing.task.abort();
        }

        let exited = self.table.exit_notification(pid);
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            exited.await;
            debug!(program = %id, pid, "exit notification");
            let _ = events
                .send(EngineEvent::ProcessExited(ExitEvent { id, pid }))
                .await;
        });
        debug!(program = %id, pid, "watching for exit");
        watches.insert(id, Watch { pid, task });
    }

    /// Cancel the watch for `id`, if any.
    pub fn unwatch(&self, id: ProgramId) {
        if let Some(watch) = self.watches().remove(&id) {
            watch.task.abort();
            debug!(program = %id, pid = watch.pid, "exit watch cancelled");
        }
    }

    pub fn watched_pid(&self, id: ProgramId) -> Option<u32> {
        self.watches()
            .get(&id)
            .filter(|w| !w.task.is_finished())
            .map(|w| w.pid)
    }

    /// Cancel every outstanding watch.
    pub fn shutdown(&self) {
        for (_, watch) in self.watches().drain() {
            watch.task.abort();
        }
    }

    /// Decide what an exit means, after `grace` has passed.
    ///
    /// Exits of a pid that is no longer tracked are stale and ignored. If
    /// another process with the program's name is running (a launcher that
    /// replaced itself), the program stays `Running` and the replacement is
    /// adopted by the next reconcile pass.
    pub async fn confirm_exit(
        &self,
        entry: &ProgramEntry,
        event: ExitEvent,
        resolver: &ProcessResolver,
        grace: Duration,
    ) {
        tokio::time::sleep(grace).await;
        let _op = entry.lock_op().await;

        if let Some(handle) = entry.process() {
            if handle.pid != event.pid {
                debug!(program = %entry.name(), pid = event.pid, tracked = handle.pid, "stale exit ignored");
                return;
            }
        }
        {
            let mut watches = self.watches();
            if watches.get(&event.id).is_some_and(|w| w.pid == event.pid) {
                watches.remove(&event.id);
            }
        }

        let state = entry.state();
        if state != ProgramState::Running {
            entry.clear_process(state);
            return;
        }

        let remaining = resolver.find_by_name(&entry.executable_name()).await;
        if remaining.is_empty() {
            info!(program = %entry.name(), pid = event.pid, "program exited");
            entry.clear_process(ProgramState::Stopped);
        } else {
            let pids: Vec<u32> = remaining.iter().map(|p| p.pid).collect();
            debug!(program = %entry.name(), ?pids, "exited process was replaced; still running");
            entry.clear_process(ProgramState::Running);
        }
    }
}

impl Drop for ExitWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
