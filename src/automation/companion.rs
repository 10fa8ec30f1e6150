// src/automation/companion.rs

//! Companion UI presence detection.
//!
//! Two strategies report the same `Appeared`/`Gone` edges:
//!
//! - **hook**: native top-level window create/destroy notifications, pumped
//!   on a dedicated thread (Windows only) and translated here. A burst of
//!   window events collapses into one presence check after the settle delay.
//!   The process can outlive its last window, so after a destroy that leaves
//!   it alive the check repeats every poll interval until it is gone or opens
//!   a new window.
//! - **poll**: a periodic scan of the process list.
//!
//! On targets without window hooks, `hook` falls back to `poll`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::LauncherConfig;
use crate::engine::{CompanionUiEvent, EngineEvent};
use crate::exec::run_blocking;
use crate::os::{ProcessInfo, ProcessTable, RawWindowEvent, WindowEventKind};
use crate::types::CompanionDetection;

/// Raw hook events buffered between the native thread and the translator.
pub const RAW_EVENT_CAPACITY: usize = 1024;

/// Upper bound on remembered pids before the cache is reset.
const PID_CACHE_LIMIT: usize = 4096;

#[derive(Debug, Clone)]
pub struct CompanionSettings {
    pub process_name: String,
    pub detection: CompanionDetection,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
}

impl CompanionSettings {
    pub fn from_config(cfg: &LauncherConfig) -> Self {
        Self {
            process_name: cfg.config.companion_ui_process.clone(),
            detection: cfg.config.companion_detection,
            poll_interval: cfg.config.companion_poll_interval,
            settle_delay: cfg.config.companion_settle_delay,
        }
    }
}

/// Tracks the current presence and emits edges.
#[derive(Debug)]
struct PresenceTracker {
    process_name: String,
    present: bool,
    events: mpsc::Sender<EngineEvent>,
}

impl PresenceTracker {
    fn new(process_name: String, events: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            process_name,
            present: false,
            events,
        }
    }

    fn find<'a>(&self, processes: &'a [ProcessInfo]) -> Option<&'a ProcessInfo> {
        processes.iter().find(|p| p.matches_name(&self.process_name))
    }

    /// Returns `false` once the engine is gone.
    async fn update(&mut self, processes: &[ProcessInfo]) -> bool {
        let found = self.find(processes).map(|p| p.pid);
        if found.is_some() == self.present {
            return true;
        }
        self.present = found.is_some();
        let event = match found {
            Some(pid) => {
                info!(process = %self.process_name, pid, "companion UI appeared");
                CompanionUiEvent::Appeared { pid: Some(pid) }
            }
            None => {
                info!(process = %self.process_name, "companion UI gone");
                CompanionUiEvent::Gone
            }
        };
        self.events.send(EngineEvent::CompanionUi(event)).await.is_ok()
    }
}

fn stop_requested(changed: Result<(), watch::error::RecvError>, shutdown: &watch::Receiver<bool>) -> bool {
    changed.is_err() || *shutdown.borrow()
}

/// Poll strategy.
pub fn spawn_poll_monitor(
    table: Arc<dyn ProcessTable>,
    settings: CompanionSettings,
    events: mpsc::Sender<EngineEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tracker = PresenceTracker::new(settings.process_name.clone(), events);
        let mut ticker = tokio::time::interval(settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if stop_requested(changed, &shutdown) {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }
            match run_blocking(&table, |t| t.processes()).await {
                Ok(processes) => {
                    if !tracker.update(&processes).await {
                        break;
                    }
                }
                Err(e) => debug!(error = %e, "companion poll skipped a cycle"),
            }
        }
        debug!("companion poll monitor stopped");
    })
}

/// Hook strategy: translate raw window events into presence edges.
///
/// A pid-to-"is companion" cache keeps per-event work to a map lookup for
/// processes already seen. A process that exits before it can be inspected
/// is simply not the companion.
pub fn spawn_hook_translator(
    mut raw: mpsc::Receiver<RawWindowEvent>,
    table: Arc<dyn ProcessTable>,
    settings: CompanionSettings,
    events: mpsc::Sender<EngineEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tracker = PresenceTracker::new(settings.process_name.clone(), events);
        let mut cache: HashMap<u32, bool> = HashMap::new();
        // Check once at startup: the UI may already be running.
        let mut check_at = Some(Instant::now());
        // A companion window was destroyed while the process lived on.
        let mut lingering = false;

        loop {
            let deadline = check_at;
            let settle = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if stop_requested(changed, &shutdown) {
                        break;
                    }
                }
                event = raw.recv() => {
                    let Some(event) = event else {
                        debug!("window event source closed");
                        break;
                    };
                    if lingering && event.kind == WindowEventKind::Created {
                        if is_companion_pid(event.pid, &mut cache, &table, &settings.process_name).await {
                            lingering = false;
                        }
                    } else if check_at.is_none() && is_relevant(event, tracker.present, &mut cache, &table, &settings.process_name).await {
                        lingering = event.kind == WindowEventKind::Destroyed;
                        check_at = Some(Instant::now() + settings.settle_delay);
                    }
                }
                _ = settle => {
                    check_at = None;
                    match run_blocking(&table, |t| t.processes()).await {
                        Ok(processes) => {
                            if !tracker.update(&processes).await {
                                break;
                            }
                        }
                        Err(e) => debug!(error = %e, "companion check failed"),
                    }
                    if lingering && tracker.present {
                        check_at = Some(Instant::now() + settings.poll_interval);
                    } else {
                        lingering = false;
                    }
                }
            }
        }
        debug!("companion hook translator stopped");
    })
}

/// Whether a raw event could change presence.
async fn is_relevant(
    event: RawWindowEvent,
    present: bool,
    cache: &mut HashMap<u32, bool>,
    table: &Arc<dyn ProcessTable>,
    process_name: &str,
) -> bool {
    match event.kind {
        // Already present: more windows change nothing.
        WindowEventKind::Created if present => false,
        // Not present: nothing can disappear.
        WindowEventKind::Destroyed if !present => false,
        // Destroy notifications often arrive after the owner is gone.
        WindowEventKind::Destroyed if event.pid == 0 => true,
        _ => is_companion_pid(event.pid, cache, table, process_name).await,
    }
}

async fn is_companion_pid(
    pid: u32,
    cache: &mut HashMap<u32, bool>,
    table: &Arc<dyn ProcessTable>,
    process_name: &str,
) -> bool {
    if pid == 0 {
        return false;
    }
    if let Some(known) = cache.get(&pid) {
        return *known;
    }
    let Ok(processes) = run_blocking(table, |t| t.processes()).await else {
        return false;
    };
    let Some(info) = processes.iter().find(|p| p.pid == pid) else {
        debug!(pid, "window owner exited before it could be inspected");
        return false;
    };
    if cache.len() >= PID_CACHE_LIMIT {
        cache.clear();
    }
    let companion = info.matches_name(process_name);
    cache.insert(pid, companion);
    companion
}

/// Running companion detection, whichever strategy was chosen.
#[derive(Debug)]
pub struct CompanionMonitor {
    task: JoinHandle<()>,
    #[cfg(windows)]
    hook: Option<crate::os::windows::WindowEventHook>,
}

impl CompanionMonitor {
    pub fn start(
        settings: CompanionSettings,
        table: Arc<dyn ProcessTable>,
        events: mpsc::Sender<EngineEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        if settings.detection == CompanionDetection::Hook {
            #[cfg(windows)]
            {
                let (raw_tx, raw_rx) = mpsc::channel(RAW_EVENT_CAPACITY);
                match crate::os::windows::WindowEventHook::spawn(raw_tx) {
                    Ok(hook) => {
                        info!(process = %settings.process_name, "companion UI detection: window hook");
                        let task = spawn_hook_translator(raw_rx, table, settings, events, shutdown);
                        return Self {
                            task,
                            hook: Some(hook),
                        };
                    }
                    Err(e) => warn!(error = %e, "window hook unavailable; polling instead"),
                }
            }
            #[cfg(not(windows))]
            {
                warn!("window hooks are not available on this platform; polling instead");
            }
        }

        info!(process = %settings.process_name, interval = ?settings.poll_interval, "companion UI detection: polling");
        Self {
            task: spawn_poll_monitor(table, settings, events, shutdown),
            #[cfg(windows)]
            hook: None,
        }
    }

    pub async fn shutdown(self) {
        #[cfg(windows)]
        if let Some(mut hook) = self.hook {
            hook.stop();
        }
        self.task.abort();
        let _ = self.task.await;
    }
}
