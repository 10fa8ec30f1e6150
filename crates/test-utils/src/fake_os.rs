#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tokio::sync::Notify;

use sidecar::os::{
    ExitFuture, LaunchSpec, ProcessInfo, ProcessTable, ProcessTableError, WindowError, WindowId,
    WindowOperator,
};

/// Fake pids start far above anything a real OS hands out, so the launcher's
/// "never kill ourselves" check cannot collide with them.
const FIRST_PID: u32 = 10_000_000;

/// What a spawn of a given path does.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SpawnBehaviour {
    /// A process named after the file stem appears.
    #[default]
    Normal,
    /// The spawn succeeds but the process is gone before anyone looks.
    ExitImmediately,
    /// The spawn fails with this I/O error kind.
    Fail(io::ErrorKind),
    /// A launcher that hands off: the spawned pid exits and a process with
    /// this name appears instead.
    HandsOffTo(String),
    /// Started through a helper: the returned pid is a process with this
    /// name that stays around, and the real program appears beside it.
    ViaHelper(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnAttempt {
    pub program: PathBuf,
    pub arguments: String,
    pub hidden: bool,
    pub elevated: bool,
    /// Thread the spawn ran on.
    pub thread: ThreadId,
}

#[derive(Debug, Default)]
struct Inner {
    processes: Vec<ProcessInfo>,
    next_pid: u32,
    behaviour: HashMap<PathBuf, SpawnBehaviour>,
    elevated_behaviour: HashMap<PathBuf, SpawnBehaviour>,
    attempts: Vec<SpawnAttempt>,
    kills: Vec<u32>,
    fail_enumeration: bool,
    next_listing_delay: Option<Duration>,
}

impl Inner {
    fn alloc_pid(&mut self) -> u32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    fn alive(&self, pid: u32) -> bool {
        self.processes.iter().any(|p| p.pid == pid)
    }
}

/// In-memory process table.
///
/// Clones share state: keep one in the test and hand an
/// `Arc<dyn ProcessTable>` of another to the code under test.
#[derive(Debug, Clone)]
pub struct FakeProcessTable {
    inner: Arc<Mutex<Inner>>,
    exited: Arc<Notify>,
}

impl Default for FakeProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl FakeProcessTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_pid: FIRST_PID,
                ..Inner::default()
            })),
            exited: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a running process; returns its pid.
    pub fn add_process(&self, name: &str) -> u32 {
        let mut inner = self.lock();
        let pid = inner.alloc_pid();
        inner.processes.push(ProcessInfo::new(pid, name));
        pid
    }

    /// Simulate a process exiting on its own.
    pub fn exit(&self, pid: u32) {
        self.lock().processes.retain(|p| p.pid != pid);
        self.exited.notify_waiters();
    }

    /// Simulate every process with this name exiting.
    pub fn exit_all_named(&self, name: &str) {
        self.lock().processes.retain(|p| !p.matches_name(name));
        self.exited.notify_waiters();
    }

    pub fn set_behaviour(&self, program: impl Into<PathBuf>, behaviour: SpawnBehaviour) {
        self.lock().behaviour.insert(program.into(), behaviour);
    }

    pub fn set_elevated_behaviour(&self, program: impl Into<PathBuf>, behaviour: SpawnBehaviour) {
        self.lock()
            .elevated_behaviour
            .insert(program.into(), behaviour);
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.lock().fail_enumeration = fail;
    }

    /// The next listing is taken immediately but handed back only after
    /// `delay`, so callers act on a snapshot that ages in the meantime.
    pub fn delay_next_listing(&self, delay: Duration) {
        self.lock().next_listing_delay = Some(delay);
    }

    pub fn attempts(&self) -> Vec<SpawnAttempt> {
        self.lock().attempts.clone()
    }

    pub fn spawn_count(&self, program: impl AsRef<Path>) -> usize {
        let program = program.as_ref();
        self.lock()
            .attempts
            .iter()
            .filter(|a| a.program == program)
            .count()
    }

    pub fn kills(&self) -> Vec<u32> {
        self.lock().kills.clone()
    }

    pub fn pids_named(&self, name: &str) -> Vec<u32> {
        self.lock()
            .processes
            .iter()
            .filter(|p| p.matches_name(name))
            .map(|p| p.pid)
            .collect()
    }

    pub fn is_running(&self, name: &str) -> bool {
        !self.pids_named(name).is_empty()
    }

    fn do_spawn(&self, spec: &LaunchSpec, elevated: bool) -> io::Result<Option<u32>> {
        let mut inner = self.lock();
        inner.attempts.push(SpawnAttempt {
            program: spec.program.clone(),
            arguments: spec.arguments.clone(),
            hidden: spec.hidden,
            elevated,
            thread: thread::current().id(),
        });
        let table = if elevated {
            &inner.elevated_behaviour
        } else {
            &inner.behaviour
        };
        let behaviour = table.get(&spec.program).cloned().unwrap_or_default();

        match behaviour {
            SpawnBehaviour::Normal => {
                let pid = inner.alloc_pid();
                inner
                    .processes
                    .push(ProcessInfo::new(pid, stem(&spec.program)));
                Ok(Some(pid))
            }
            SpawnBehaviour::ExitImmediately => Ok(Some(inner.alloc_pid())),
            SpawnBehaviour::Fail(kind) => Err(io::Error::new(kind, "fake spawn failure")),
            SpawnBehaviour::HandsOffTo(name) => {
                let launcher = inner.alloc_pid();
                let child = inner.alloc_pid();
                inner.processes.push(ProcessInfo::new(child, name));
                Ok(Some(launcher))
            }
            SpawnBehaviour::ViaHelper(helper) => {
                let helper_pid = inner.alloc_pid();
                inner.processes.push(ProcessInfo::new(helper_pid, helper));
                let program = inner.alloc_pid();
                inner
                    .processes
                    .push(ProcessInfo::new(program, stem(&spec.program)));
                Ok(Some(helper_pid))
            }
        }
    }
}

impl ProcessTable for FakeProcessTable {
    fn processes(&self) -> Result<Vec<ProcessInfo>, ProcessTableError> {
        let (snapshot, delay) = {
            let mut inner = self.lock();
            if inner.fail_enumeration {
                return Err(ProcessTableError::Enumeration("fake failure".into()));
            }
            (inner.processes.clone(), inner.next_listing_delay.take())
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        Ok(snapshot)
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.lock().alive(pid)
    }

    fn kill(&self, pid: u32) -> Result<(), ProcessTableError> {
        {
            let mut inner = self.lock();
            inner.kills.push(pid);
            inner.processes.retain(|p| p.pid != pid);
        }
        self.exited.notify_waiters();
        Ok(())
    }

    fn spawn(&self, spec: &LaunchSpec) -> io::Result<Option<u32>> {
        self.do_spawn(spec, false)
    }

    fn spawn_elevated(&self, spec: &LaunchSpec) -> io::Result<Option<u32>> {
        self.do_spawn(spec, true)
    }

    fn exit_notification(&self, pid: u32) -> ExitFuture {
        let inner = Arc::clone(&self.inner);
        let exited = Arc::clone(&self.exited);
        Box::pin(async move {
            loop {
                let notified = exited.notified();
                tokio::pin!(notified);
                // Register before checking so an exit in between is not lost.
                notified.as_mut().enable();
                let alive = inner
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .alive(pid);
                if !alive {
                    return;
                }
                notified.await;
            }
        })
    }
}

/// One call made on [`RecordingWindowOperator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowCall {
    Minimize(u32),
    CloseMain(u32),
    PostClose(u32),
    MinimizeWindow(WindowId),
    Hide(WindowId),
}

#[derive(Debug, Default)]
struct WindowState {
    calls: Vec<WindowCall>,
    visible: HashMap<String, WindowId>,
    next_window: WindowId,
    close_fails: bool,
    hidden: HashSet<WindowId>,
}

/// Window operator that records every call.
#[derive(Debug, Clone, Default)]
pub struct RecordingWindowOperator {
    state: Arc<Mutex<WindowState>>,
}

impl RecordingWindowOperator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<WindowCall> {
        self.lock().calls.clone()
    }

    /// Make a window with this title visible; returns its id.
    pub fn show_window(&self, title: &str) -> WindowId {
        let mut state = self.lock();
        state.next_window += 1;
        let id = state.next_window;
        state.visible.insert(title.to_string(), id);
        id
    }

    /// Make the graceful close request fail, forcing the fallback.
    pub fn fail_graceful_close(&self, fail: bool) {
        self.lock().close_fails = fail;
    }

    pub fn is_hidden(&self, window: WindowId) -> bool {
        self.lock().hidden.contains(&window)
    }
}

impl WindowOperator for RecordingWindowOperator {
    fn minimize(&self, pid: u32) -> Result<(), WindowError> {
        self.lock().calls.push(WindowCall::Minimize(pid));
        Ok(())
    }

    fn close_main_window(&self, pid: u32) -> Result<(), WindowError> {
        let mut state = self.lock();
        state.calls.push(WindowCall::CloseMain(pid));
        if state.close_fails {
            return Err(WindowError::Failed("close refused".into()));
        }
        Ok(())
    }

    fn post_close(&self, pid: u32) -> Result<(), WindowError> {
        self.lock().calls.push(WindowCall::PostClose(pid));
        Ok(())
    }

    fn find_visible(&self, title: &str) -> Option<WindowId> {
        self.lock().visible.get(title).copied()
    }

    fn minimize_window(&self, window: WindowId) -> Result<(), WindowError> {
        self.lock().calls.push(WindowCall::MinimizeWindow(window));
        Ok(())
    }

    fn hide(&self, window: WindowId) -> Result<(), WindowError> {
        let mut state = self.lock();
        state.calls.push(WindowCall::Hide(window));
        state.hidden.insert(window);
        Ok(())
    }
}
