// src/engine/reconcile.rs

//! Periodic correction of program states against the OS.
//!
//! Exit notifications can be missed (a process started outside the
//! launcher, a watch cancelled mid-flight), and executables can disappear
//! or come back. One pass converges every idle program:
//!
//! - executable missing on disk -> `NotFound`
//! - `NotFound` whose executable is back -> `Stopped`
//! - a matching process is running -> adopted, `Running`, exit watched
//! - `Running` with nothing matching -> `Stopped`
//!
//! Programs with an operation in flight are skipped and picked up on the
//! next tick. A failed process enumeration skips the whole pass rather than
//! marking everything stopped.
//!
//! The listing is taken once per pass, before any program lock. A start that
//! finishes in between leaves a handle the listing cannot know about, so such
//! a program is judged against a fresh listing taken under its lock.

use tracing::{debug, info};

use crate::exec::{ProcessResolver, Supervisor};
use crate::os::ProcessInfo;
use crate::registry::ProgramEntry;
use crate::types::ProgramState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub adopted: usize,
    pub stopped: usize,
    pub not_found: usize,
    pub recovered: usize,
    pub busy: usize,
}

pub async fn reconcile_all(supervisor: &Supervisor) -> ReconcileSummary {
    let mut summary = ReconcileSummary::default();

    let processes = match supervisor.resolver().processes().await {
        Ok(list) => list,
        Err(e) => {
            debug!(error = %e, "skipping reconcile pass");
            return summary;
        }
    };

    for entry in supervisor.registry().entries() {
        let Some(_op) = entry.try_lock_op() else {
            summary.busy += 1;
            continue;
        };
        let stale = entry
            .process()
            .is_some_and(|h| !ProcessResolver::is_live_in(&h, &processes));
        if !stale {
            reconcile_one(supervisor, &entry, &processes, &mut summary);
            continue;
        }
        match supervisor.resolver().processes().await {
            Ok(fresh) => reconcile_one(supervisor, &entry, &fresh, &mut summary),
            Err(e) => debug!(program = %entry.name(), error = %e, "re-listing failed; leaving program as is"),
        }
    }

    if summary != ReconcileSummary::default() {
        debug!(?summary, "reconcile pass changed state");
    }
    summary
}

fn reconcile_one(
    supervisor: &Supervisor,
    entry: &ProgramEntry,
    processes: &[ProcessInfo],
    summary: &mut ReconcileSummary,
) {
    let spec = entry.spec();
    let path = &spec.executable_path;
    let on_disk = path.as_os_str().is_empty() || supervisor.fs().exists(path);

    if !on_disk {
        if entry.state() != ProgramState::NotFound {
            info!(program = %spec.name, path = %path.display(), "executable is missing");
            supervisor.exit_watcher().unwatch(entry.id());
            entry.clear_process(ProgramState::NotFound);
            summary.not_found += 1;
        }
        return;
    }

    if entry.state() == ProgramState::NotFound {
        info!(program = %spec.name, "executable is back");
        entry.transition(ProgramState::Stopped);
        summary.recovered += 1;
    }

    if entry.state() == ProgramState::Running
        && entry
            .process()
            .is_some_and(|h| ProcessResolver::is_live_in(&h, processes))
    {
        return;
    }

    match ProcessResolver::resolve_in(entry, processes) {
        Some(handle) => {
            let pid = handle.pid;
            if entry.set_running(handle) {
                info!(program = %spec.name, pid, "found running; adopting");
                summary.adopted += 1;
            }
            supervisor.exit_watcher().watch(entry.id(), pid);
        }
        None => {
            if entry.state() == ProgramState::Running {
                info!(program = %spec.name, "no longer running");
                summary.stopped += 1;
            }
            supervisor.exit_watcher().unwatch(entry.id());
            entry.clear_process(ProgramState::Stopped);
        }
    }
}
