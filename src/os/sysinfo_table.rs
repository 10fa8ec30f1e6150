// src/os/sysinfo_table.rs

//! Production [`ProcessTable`] backed by `sysinfo` and `tokio::process`.

use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
#[cfg(not(windows))]
use std::time::Instant;

use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, System};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::LauncherConfig;

use super::{ExitFuture, LaunchSpec, ProcessInfo, ProcessTable, ProcessTableError, strip_exe_suffix};

type ChildExits = Arc<Mutex<HashMap<u32, watch::Receiver<ChildState>>>>;

/// How long an elevation prompt may stay open before the launch moves on.
#[cfg(not(windows))]
const ELEVATION_PROMPT_TIMEOUT: Duration = Duration::from_secs(120);
#[cfg(not(windows))]
const ELEVATION_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(windows, allow(dead_code))]
enum ChildState {
    Running,
    Exited(Option<i32>),
}

/// Process table over the live OS.
///
/// Children spawned through this table are reaped by a Tokio task each, so
/// their exit is observed without polling. Foreign processes (adopted at
/// startup, or started through an elevation helper) are polled.
#[derive(Debug)]
pub struct SysinfoProcessTable {
    system: Mutex<System>,
    children: ChildExits,
    exit_poll_interval: Duration,
    #[cfg_attr(windows, allow(dead_code))]
    elevation_command: String,
}

impl SysinfoProcessTable {
    pub fn new(cfg: &LauncherConfig) -> Self {
        Self {
            system: Mutex::new(System::new()),
            children: Arc::new(Mutex::new(HashMap::new())),
            exit_poll_interval: cfg.config.exit_poll_interval,
            elevation_command: cfg.config.elevation_command.clone(),
        }
    }

    fn system(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn child_exit(&self, pid: u32) -> Option<watch::Receiver<ChildState>> {
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&pid)
            .cloned()
    }

    /// Hand the child to a reaper task. Dropping a `tokio::process::Child`
    /// does not kill it, so the process outlives the launcher as intended.
    fn track_child(&self, mut child: Child) -> Option<(u32, watch::Receiver<ChildState>)> {
        let pid = child.id()?;
        let (tx, rx) = watch::channel(ChildState::Running);
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pid, rx.clone());

        let children = Arc::clone(&self.children);
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => {
                    debug!(pid, %status, "child exited");
                    status.code()
                }
                Err(e) => {
                    warn!(pid, error = %e, "waiting on child failed");
                    None
                }
            };
            let _ = tx.send(ChildState::Exited(code));
            children
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&pid);
        });
        Some((pid, rx))
    }

    fn spawn_child(&self, mut cmd: Command) -> io::Result<Option<(u32, watch::Receiver<ChildState>)>> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = cmd.spawn()?;
        Ok(self.track_child(child))
    }

    fn spawn_command(&self, cmd: Command) -> io::Result<Option<u32>> {
        Ok(self.spawn_child(cmd)?.map(|(pid, _)| pid))
    }

    /// Wait out the elevation helper. pkexec keeps its pid and becomes the
    /// program once authorised; it exits 126 when the prompt is dismissed and
    /// 127 when authorisation is refused. Runs on a blocking thread.
    #[cfg(not(windows))]
    fn await_elevation(&self, pid: u32, exit: &watch::Receiver<ChildState>) -> io::Result<Option<u32>> {
        let helper = std::path::Path::new(&self.elevation_command)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let started = Instant::now();
        loop {
            let state = *exit.borrow();
            match state {
                ChildState::Exited(Some(code @ (126 | 127))) => {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        format!("{helper} refused elevation (exit code {code})"),
                    ));
                }
                // The program ran and already exited; the launch path reports it.
                ChildState::Exited(_) => return Ok(Some(pid)),
                ChildState::Running => {}
            }
            // A live pid under another name has been handed to the program.
            if live_process(pid).is_some_and(|p| !p.matches_name(&helper)) {
                return Ok(Some(pid));
            }
            if started.elapsed() >= ELEVATION_PROMPT_TIMEOUT {
                warn!(pid, helper = %helper, "elevation prompt still open; continuing without it");
                return Ok(Some(pid));
            }
            std::thread::sleep(ELEVATION_POLL);
        }
    }
}

fn is_live(process: &Process) -> bool {
    !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
}

fn to_info(pid: Pid, process: &Process) -> ProcessInfo {
    let name = process.name().to_string_lossy();
    ProcessInfo {
        pid: pid.as_u32(),
        name: strip_exe_suffix(&name).to_string(),
        exe_stem: process
            .exe()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned()),
    }
}

fn pid_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some_and(is_live)
}

#[cfg(not(windows))]
fn live_process(pid: u32) -> Option<ProcessInfo> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .filter(|p| is_live(p))
        .map(|p| to_info(pid, p))
}

#[cfg(not(windows))]
fn split_arguments(arguments: &str) -> io::Result<Vec<String>> {
    shell_words::split(arguments).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

impl ProcessTable for SysinfoProcessTable {
    fn processes(&self) -> Result<Vec<ProcessInfo>, ProcessTableError> {
        let mut system = self.system();
        system.refresh_processes(ProcessesToUpdate::All, true);
        let list: Vec<ProcessInfo> = system
            .processes()
            .iter()
            .filter(|(_, p)| is_live(p))
            .map(|(pid, p)| to_info(*pid, p))
            .collect();
        // We are running, so an empty table means the listing itself failed.
        if list.is_empty() {
            return Err(ProcessTableError::Enumeration(
                "process table came back empty".to_string(),
            ));
        }
        Ok(list)
    }

    fn is_alive(&self, pid: u32) -> bool {
        if let Some(rx) = self.child_exit(pid) {
            return *rx.borrow() == ChildState::Running;
        }
        pid_alive(pid)
    }

    fn kill(&self, pid: u32) -> Result<(), ProcessTableError> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = self.system();
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        match system.process(sys_pid) {
            // Already gone counts as killed.
            None => Ok(()),
            Some(process) if process.kill() => Ok(()),
            Some(_) => Err(ProcessTableError::Kill {
                pid,
                reason: "the OS refused the kill request".to_string(),
            }),
        }
    }

    #[cfg(windows)]
    fn spawn(&self, spec: &LaunchSpec) -> io::Result<Option<u32>> {
        if spec.hidden {
            // GUI programs only honour a hidden show state via ShellExecute.
            return super::windows::shell_execute(spec, None);
        }
        let mut cmd = Command::new(&spec.program);
        if !spec.arguments.trim().is_empty() {
            cmd.raw_arg(&spec.arguments);
        }
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        self.spawn_command(cmd)
    }

    #[cfg(not(windows))]
    fn spawn(&self, spec: &LaunchSpec) -> io::Result<Option<u32>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(split_arguments(&spec.arguments)?);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        self.spawn_command(cmd)
    }

    #[cfg(windows)]
    fn spawn_elevated(&self, spec: &LaunchSpec) -> io::Result<Option<u32>> {
        super::windows::shell_execute(spec, Some("runas"))
    }

    #[cfg(not(windows))]
    fn spawn_elevated(&self, spec: &LaunchSpec) -> io::Result<Option<u32>> {
        let mut cmd = Command::new(&self.elevation_command);
        cmd.arg(&spec.program)
            .args(split_arguments(&spec.arguments)?);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        match self.spawn_child(cmd)? {
            Some((pid, exit)) => self.await_elevation(pid, &exit),
            None => Ok(None),
        }
    }

    fn exit_notification(&self, pid: u32) -> ExitFuture {
        if let Some(mut rx) = self.child_exit(pid) {
            return Box::pin(async move {
                // A dropped sender also means the reaper is done.
                let _ = rx.wait_for(|state| *state != ChildState::Running).await;
            });
        }

        let interval = self.exit_poll_interval;
        Box::pin(async move {
            loop {
                let alive = tokio::task::spawn_blocking(move || pid_alive(pid))
                    .await
                    .unwrap_or(false);
                if !alive {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        })
    }
}
