// src/instance/mod.rs

//! Single-instance coordination.
//!
//! The first launcher takes an exclusive lock on `<data_dir>/sidecar.lock`
//! and becomes the primary. A later launch finds the lock held, drops a
//! signal file next to it and exits; the primary notices the file, posts
//! [`EngineEvent::RestoreRequested`] and deletes it.
//!
//! The lock is an OS advisory lock, so a crashed primary releases it
//! automatically and the next launch simply acquires it.

use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::EngineEvent;
use crate::errors::Result;
use crate::fs::FileSystem;

pub const LOCK_FILE_NAME: &str = "sidecar.lock";
pub const SIGNAL_FILE_NAME: &str = "sidecar.signal";

/// Lifecycle callbacks for the embedding application.
pub trait InstanceHooks: Send + Sync + Debug {
    /// Called once this process has become the primary instance.
    fn on_primary_instance(&self);

    /// Another launch asked this instance to show itself.
    fn on_restore_requested(&self);
}

/// Hooks for the headless binary: there is no window to restore, so both
/// callbacks only log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHooks {
    pub minimized: bool,
}

impl InstanceHooks for LoggingHooks {
    fn on_primary_instance(&self) {
        info!(minimized = self.minimized, "running as primary instance");
    }

    fn on_restore_requested(&self) {
        info!("restore requested by another launch");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePaths {
    pub lock_file: PathBuf,
    pub signal_file: PathBuf,
}

impl InstancePaths {
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            lock_file: data_dir.join(LOCK_FILE_NAME),
            signal_file: data_dir.join(SIGNAL_FILE_NAME),
        }
    }
}

#[derive(Debug)]
pub enum InstanceRole {
    Primary(PrimaryInstance),
    /// Another process holds the lock.
    Secondary,
}

/// Handle for the watcher; dropping it stops signal watching.
struct SignalWatcher {
    _inner: RecommendedWatcher,
}

impl Debug for SignalWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalWatcher").finish()
    }
}

/// The held instance lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct PrimaryInstance {
    lock: File,
    paths: InstancePaths,
    fs: Arc<dyn FileSystem>,
    watcher: Option<SignalWatcher>,
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Try to become the primary instance.
pub fn acquire(paths: &InstancePaths, fs: Arc<dyn FileSystem>) -> Result<InstanceRole> {
    if let Some(parent) = paths.lock_file.parent() {
        fs.create_dir_all(parent)?;
    }
    let mut lock = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&paths.lock_file)?;

    // Fully qualified: std's `File` has inherent lock methods of its own.
    if let Err(e) = FileExt::try_lock_exclusive(&lock) {
        if is_contended(&e) {
            debug!(lock = %paths.lock_file.display(), "instance lock is held");
            return Ok(InstanceRole::Secondary);
        }
        return Err(e.into());
    }

    let mut previous = String::new();
    lock.read_to_string(&mut previous)?;
    let previous = previous.trim();
    if !previous.is_empty() {
        info!(pid = previous, "previous instance did not shut down cleanly");
    }
    lock.set_len(0)?;
    lock.seek(SeekFrom::Start(0))?;
    write!(lock, "{}", std::process::id())?;
    lock.flush()?;

    if fs.exists(&paths.signal_file) {
        debug!("removing stale signal file");
        fs.remove_file(&paths.signal_file)?;
    }

    info!(lock = %paths.lock_file.display(), "acquired instance lock");
    Ok(InstanceRole::Primary(PrimaryInstance {
        lock,
        paths: paths.clone(),
        fs,
        watcher: None,
    }))
}

/// Ask the primary instance to restore itself.
pub fn signal_primary(fs: &dyn FileSystem, paths: &InstancePaths) -> Result<()> {
    fs.write(&paths.signal_file, std::process::id().to_string().as_bytes())?;
    info!(signal = %paths.signal_file.display(), "signalled primary instance");
    Ok(())
}

fn is_signal_event(event: &Event, signal_file: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == signal_file.file_name())
}

impl PrimaryInstance {
    pub fn paths(&self) -> &InstancePaths {
        &self.paths
    }

    /// Start watching for the signal file. Each appearance posts one
    /// [`EngineEvent::RestoreRequested`] and deletes the file.
    pub fn watch_signals(&mut self, events: mpsc::Sender<EngineEvent>) -> Result<()> {
        let dir = self
            .paths
            .signal_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        self.fs.create_dir_all(&dir)?;

        // Channel from the blocking notify callback into the async world.
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(err) => {
                    eprintln!("sidecar: signal watch error: {err}");
                }
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "watching for restore signals");

        let signal_file = self.paths.signal_file.clone();
        let fs = Arc::clone(&self.fs);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if !is_signal_event(&event, &signal_file) || !fs.exists(&signal_file) {
                    continue;
                }
                debug!(?event, "restore signal received");
                if events.send(EngineEvent::RestoreRequested).await.is_err() {
                    break;
                }
                if let Err(e) = fs.remove_file(&signal_file) {
                    warn!(error = %e, "could not delete signal file");
                }
            }
            debug!("signal watcher finished");
        });

        self.watcher = Some(SignalWatcher { _inner: watcher });
        Ok(())
    }

    /// Clean shutdown: stop watching, clear the pid, unlock and delete any
    /// pending signal file.
    pub fn release(mut self) -> Result<()> {
        self.watcher = None;
        self.lock.set_len(0)?;
        FileExt::unlock(&self.lock)?;
        if self.fs.exists(&self.paths.signal_file) {
            self.fs.remove_file(&self.paths.signal_file)?;
        }
        info!("released instance lock");
        Ok(())
    }
}
