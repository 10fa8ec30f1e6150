// src/registry/program.rs

//! One managed program: immutable-ish descriptor plus runtime status.

use std::sync::{Mutex, MutexGuard, RwLock};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, broadcast};
use tracing::debug;

use crate::config::ProgramSpec;
use crate::types::{ProgramId, ProgramState};

/// Back-reference to the last resolved OS process.
///
/// The OS owns the process; this is only a lookup key. Always re-validate
/// (pid alive and name still matching) before acting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub name: String,
}

/// Published on every state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub id: ProgramId,
    pub name: String,
    pub from: ProgramState,
    pub to: ProgramState,
}

/// Point-in-time copy of a program, safe to hand out to any component.
#[derive(Debug, Clone)]
pub struct ManagedProgram {
    pub id: ProgramId,
    pub spec: ProgramSpec,
    pub executable_name: String,
    pub state: ProgramState,
    pub process: Option<ProcessHandle>,
}

impl ManagedProgram {
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

#[derive(Debug)]
struct ProgramStatus {
    executable_name: String,
    state: ProgramState,
    process: Option<ProcessHandle>,
}

/// Registry slot for one program.
///
/// - `op` serializes multi-step operations (start, stop, exit reconcile) on
///   this program only. It is held across awaits.
/// - `status` and `spec` are short critical sections so snapshots never wait
///   on an in-flight launch.
#[derive(Debug)]
pub struct ProgramEntry {
    id: ProgramId,
    spec: RwLock<ProgramSpec>,
    status: Mutex<ProgramStatus>,
    op: AsyncMutex<()>,
    changes: broadcast::Sender<StateChange>,
}

pub type OpGuard<'a> = AsyncMutexGuard<'a, ()>;

impl ProgramEntry {
    pub(crate) fn new(
        id: ProgramId,
        spec: ProgramSpec,
        changes: broadcast::Sender<StateChange>,
    ) -> Self {
        let executable_name = spec.default_executable_name();
        Self {
            id,
            spec: RwLock::new(spec),
            status: Mutex::new(ProgramStatus {
                executable_name,
                state: ProgramState::Stopped,
                process: None,
            }),
            op: AsyncMutex::new(()),
            changes,
        }
    }

    fn status(&self) -> MutexGuard<'_, ProgramStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn spec(&self) -> ProgramSpec {
        self.spec.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn name(&self) -> String {
        self.spec.read().unwrap_or_else(|e| e.into_inner()).name.clone()
    }

    pub fn state(&self) -> ProgramState {
        self.status().state
    }

    pub fn executable_name(&self) -> String {
        self.status().executable_name.clone()
    }

    pub fn process(&self) -> Option<ProcessHandle> {
        self.status().process.clone()
    }

    pub fn snapshot(&self) -> ManagedProgram {
        let spec = self.spec();
        let status = self.status();
        ManagedProgram {
            id: self.id,
            spec,
            executable_name: status.executable_name.clone(),
            state: status.state,
            process: status.process.clone(),
        }
    }

    /// Wait for exclusive operation rights on this program.
    pub async fn lock_op(&self) -> OpGuard<'_> {
        self.op.lock().await
    }

    /// Non-blocking variant used by the periodic reconciler, which skips
    /// programs with an operation in flight.
    pub fn try_lock_op(&self) -> Option<OpGuard<'_>> {
        self.op.try_lock().ok()
    }

    /// Replace the descriptor. The process name is reset to the new default
    /// and re-learned on the next resolve.
    pub(crate) fn replace_spec(&self, spec: ProgramSpec) {
        let default_name = spec.default_executable_name();
        *self.spec.write().unwrap_or_else(|e| e.into_inner()) = spec;
        self.status().executable_name = default_name;
    }

    pub fn set_executable_name(&self, name: &str) {
        let mut status = self.status();
        if status.executable_name != name {
            debug!(
                program = %self.name(),
                from = %status.executable_name,
                to = %name,
                "process reports a different name; updating"
            );
            status.executable_name = name.to_string();
        }
    }

    /// Track `handle` and move to `Running` in one step.
    pub fn set_running(&self, handle: ProcessHandle) -> bool {
        let mut status = self.status();
        status.process = Some(handle);
        self.write_state(&mut status, ProgramState::Running)
    }

    /// Drop the tracked handle and move to `to` in one step.
    pub fn clear_process(&self, to: ProgramState) -> bool {
        let mut status = self.status();
        status.process = None;
        self.write_state(&mut status, to)
    }

    /// Change state only. Returns whether the state actually changed.
    pub fn transition(&self, to: ProgramState) -> bool {
        let mut status = self.status();
        self.write_state(&mut status, to)
    }

    fn write_state(&self, status: &mut ProgramStatus, to: ProgramState) -> bool {
        let from = status.state;
        if from == to {
            return false;
        }
        status.state = to;

        let change = StateChange {
            id: self.id,
            name: self.name(),
            from,
            to,
        };
        debug!(program = %change.name, %from, %to, "state changed");
        // Published under the status lock so observers see transitions in order.
        let _ = self.changes.send(change);
        true
    }
}
