// src/exec/launch.rs

use std::io;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ProgramSpec;
use crate::errors::StartError;
use crate::fs::FileSystem;
use crate::os::window::wait_until_visible;
use crate::os::{LaunchSpec, ProcessInfo, ProcessTable, WindowOperator};
use crate::registry::{ProcessHandle, ProgramEntry};
use crate::types::ProgramState;

use super::exit_watch::ExitWatcher;
use super::launch_spec::build_launch_spec;
use super::resolver::ProcessResolver;
use super::{ExecSettings, matches_any_pattern, run_blocking};

/// Successful outcome of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Started {
    /// A matching process was already running and has been adopted.
    AlreadyRunning { pid: u32 },
    Launched { pid: u32 },
}

impl Started {
    pub fn pid(self) -> u32 {
        match self {
            Started::AlreadyRunning { pid } | Started::Launched { pid } => pid,
        }
    }
}

/// Starts one program: adopt-or-spawn, elevation retry, tray handling,
/// settle and re-resolve, exit subscription.
#[derive(Debug, Clone)]
pub struct LaunchOrchestrator {
    resolver: ProcessResolver,
    table: Arc<dyn ProcessTable>,
    windows: Arc<dyn WindowOperator>,
    fs: Arc<dyn FileSystem>,
    exit_watcher: Arc<ExitWatcher>,
    settings: Arc<ExecSettings>,
}

impl LaunchOrchestrator {
    pub fn new(
        resolver: ProcessResolver,
        windows: Arc<dyn WindowOperator>,
        fs: Arc<dyn FileSystem>,
        exit_watcher: Arc<ExitWatcher>,
        settings: Arc<ExecSettings>,
    ) -> Self {
        Self {
            table: Arc::clone(resolver.table()),
            resolver,
            windows,
            fs,
            exit_watcher,
            settings,
        }
    }

    /// Start `entry`. The caller must hold the entry's operation lock.
    pub async fn launch(&self, entry: &ProgramEntry) -> Result<Started, StartError> {
        let id = entry.id();

        if let Some(handle) = self.resolver.resolve(entry).await {
            let pid = handle.pid;
            info!(program = %entry.name(), pid, "already running; adopting");
            self.track(entry, handle);
            return Ok(Started::AlreadyRunning { pid });
        }

        let spec = entry.spec();
        let launch = match build_launch_spec(self.fs.as_ref(), &spec, &self.settings.versioned_launchers) {
            Ok(launch) => launch,
            Err(e) => {
                warn!(program = %spec.name, error = %e, "cannot launch");
                entry.clear_process(ProgramState::NotFound);
                return Err(e);
            }
        };
        // The binary exists again, so a previous NotFound no longer applies.
        entry.transition(ProgramState::Stopped);

        info!(program = %spec.name, path = %launch.program.display(), %id, "launching");
        let spawned = self.spawn_with_elevation_retry(&spec, &launch).await?;

        if spec.minimize_to_tray || spec.close_to_tray {
            let pid = self
                .resolve_launched(entry, &launch, spawned)
                .await
                .map(|h| h.pid);
            match pid {
                Some(pid) => self.send_to_tray(&spec, pid).await,
                None => debug!(program = %spec.name, "no pid to send to tray"),
            }
        }

        tokio::time::sleep(self.settings.settle_delay).await;

        let Some(handle) = self.resolve_launched(entry, &launch, spawned).await else {
            warn!(program = %spec.name, "process exited right after launch");
            entry.clear_process(ProgramState::Stopped);
            return Err(StartError::LaunchFailed(format!(
                "{} exited before it could be tracked",
                spec.name
            )));
        };

        if matches_any_pattern(&handle.name, &self.settings.hide_after_launch).is_some() {
            self.spawn_hide_after_launch(handle.name.clone());
        }

        let pid = handle.pid;
        info!(program = %spec.name, pid, "running");
        self.track(entry, handle);
        Ok(Started::Launched { pid })
    }

    fn track(&self, entry: &ProgramEntry, handle: ProcessHandle) {
        let pid = handle.pid;
        entry.set_running(handle);
        self.exit_watcher.watch(entry.id(), pid);
    }

    /// Spawn; on a permission error retry exactly once with elevation.
    async fn spawn_with_elevation_retry(
        &self,
        spec: &ProgramSpec,
        launch: &LaunchSpec,
    ) -> Result<Option<u32>, StartError> {
        match self.spawn_off_runtime(launch, false).await {
            Ok(pid) => Ok(pid),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                info!(program = %spec.name, "launch needs elevation; retrying elevated");
                self.spawn_off_runtime(launch, true).await.map_err(|e| {
                    warn!(program = %spec.name, error = %e, "elevated launch refused");
                    StartError::ElevationDenied(e.to_string())
                })
            }
            Err(e) => {
                warn!(program = %spec.name, error = %e, "launch failed");
                Err(StartError::LaunchFailed(e.to_string()))
            }
        }
    }

    /// Spawns block (an elevation prompt holds the call until answered), so
    /// they run on the blocking pool.
    async fn spawn_off_runtime(&self, launch: &LaunchSpec, elevated: bool) -> io::Result<Option<u32>> {
        let launch = launch.clone();
        run_blocking(&self.table, move |t| {
            Ok(if elevated {
                t.spawn_elevated(&launch)
            } else {
                t.spawn(&launch)
            })
        })
        .await
        .unwrap_or_else(|e| Err(io::Error::other(e.to_string())))
    }

    /// Minimizing wins over closing when both are configured.
    async fn send_to_tray(&self, spec: &ProgramSpec, pid: u32) {
        if spec.minimize_to_tray {
            tokio::time::sleep(spec.minimize_to_tray_delay).await;
            if let Err(e) = self.windows.minimize(pid) {
                warn!(program = %spec.name, pid, error = %e, "minimize to tray failed");
            }
        } else if spec.close_to_tray {
            tokio::time::sleep(spec.close_to_tray_delay).await;
            if let Err(e) = self.windows.close_main_window(pid) {
                debug!(program = %spec.name, pid, error = %e, "graceful close failed; sending close directly");
                if let Err(e) = self.windows.post_close(pid) {
                    warn!(program = %spec.name, pid, error = %e, "close to tray failed");
                }
            }
        }
    }

    /// Re-resolve after the settle delay. Launchers often hand off to a
    /// child and exit, so the spawned pid is preferred but not required.
    /// A spawned pid running under another name (an elevation helper) is
    /// never tracked, and its name is never learned.
    async fn resolve_launched(
        &self,
        entry: &ProgramEntry,
        launch: &LaunchSpec,
        spawned: Option<u32>,
    ) -> Option<ProcessHandle> {
        let processes = self.resolver.processes_or_empty().await;
        let own = spawned
            .and_then(|pid| processes.iter().find(|p| p.pid == pid))
            .filter(|p| {
                let ours = is_program_process(p, entry, launch);
                if !ours {
                    debug!(program = %entry.name(), pid = p.pid, name = %p.name, "spawned pid is a helper; resolving by name");
                }
                ours
            });
        if let Some(found) = own {
            let name = found.display_name().to_string();
            entry.set_executable_name(&name);
            return Some(ProcessHandle {
                pid: found.pid,
                name,
            });
        }
        ProcessResolver::resolve_in(entry, &processes)
    }

    fn spawn_hide_after_launch(&self, title: String) {
        let windows = Arc::clone(&self.windows);
        let policy = self.settings.window;
        tokio::spawn(async move {
            match wait_until_visible(&windows, &title, policy).await {
                Ok(window) => {
                    let hidden = windows
                        .minimize_window(window)
                        .and_then(|()| windows.hide(window));
                    match hidden {
                        Ok(()) => info!(%title, "window hidden after launch"),
                        Err(e) => warn!(%title, error = %e, "could not hide window"),
                    }
                }
                Err(e) => warn!(%title, error = %e, "window never appeared"),
            }
        });
    }
}

fn is_program_process(process: &ProcessInfo, entry: &ProgramEntry, launch: &LaunchSpec) -> bool {
    process.matches_name(&entry.executable_name())
        || launch
            .program
            .file_stem()
            .is_some_and(|stem| process.matches_name(&stem.to_string_lossy()))
}
