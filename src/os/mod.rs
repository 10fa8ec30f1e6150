// src/os/mod.rs

//! OS boundary: process table and window operations.
//!
//! The engine talks to a [`ProcessTable`] and a [`window::WindowOperator`]
//! instead of calling OS APIs directly. Production code uses
//! [`SysinfoProcessTable`] and the platform window operator; tests provide
//! fakes that never touch real processes.

use std::fmt::Debug;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;

use thiserror::Error;

pub mod sysinfo_table;
pub mod window;
#[cfg(windows)]
pub mod windows;

pub use sysinfo_table::SysinfoProcessTable;
pub use window::{
    HeadlessWindowOperator, RawWindowEvent, WaitPolicy, WindowError, WindowEventKind, WindowId,
    WindowOperator, platform_window_operator,
};

/// One entry of an OS process listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Process name as reported by the OS, without a trailing `.exe`.
    pub name: String,
    /// File stem of the executable image, when the OS exposes it. Linux
    /// truncates `name` to 15 bytes, so matching also consults this.
    pub exe_stem: Option<String>,
}

impl ProcessInfo {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: strip_exe_suffix(&name.into()).to_string(),
            exe_stem: None,
        }
    }

    /// Case-insensitive exact match against the process or image name.
    pub fn matches_name(&self, wanted: &str) -> bool {
        let wanted = strip_exe_suffix(wanted);
        if wanted.is_empty() {
            return false;
        }
        self.name.eq_ignore_ascii_case(wanted)
            || self
                .exe_stem
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(wanted))
    }

    /// Case-insensitive substring match. An empty needle never matches, so
    /// a blank name can never select every process on the machine.
    pub fn matches_partial(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.name.to_lowercase().contains(&needle)
            || self
                .exe_stem
                .as_deref()
                .is_some_and(|s| s.to_lowercase().contains(&needle))
    }

    /// Best human-facing name: the untruncated image stem when known.
    pub fn display_name(&self) -> &str {
        self.exe_stem.as_deref().unwrap_or(&self.name)
    }
}

pub(crate) fn strip_exe_suffix(name: &str) -> &str {
    let len = name.len();
    if len > 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".exe") {
        &name[..len - 4]
    } else {
        name
    }
}

/// Everything needed to start a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub working_dir: Option<PathBuf>,
    /// Passed verbatim on Windows; split with shell-word rules elsewhere.
    pub arguments: String,
    pub hidden: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessTableError {
    /// Listing processes failed. Transient by nature: callers treat it as
    /// "no match" and try again on the next cycle.
    #[error("process enumeration failed: {0}")]
    Enumeration(String),

    #[error("failed to kill process {pid}: {reason}")]
    Kill { pid: u32, reason: String },

    #[error("blocking OS call failed: {0}")]
    Blocking(String),
}

/// Resolves once the watched process has exited.
pub type ExitFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Trait abstracting the OS process table.
///
/// All methods except [`ProcessTable::exit_notification`] may block and are
/// called from `spawn_blocking` by the engine.
pub trait ProcessTable: Send + Sync + Debug {
    /// List live processes.
    fn processes(&self) -> Result<Vec<ProcessInfo>, ProcessTableError>;

    fn is_alive(&self, pid: u32) -> bool;

    fn kill(&self, pid: u32) -> Result<(), ProcessTableError>;

    /// Start a process. Returns its pid when the OS reports one.
    ///
    /// Must be called from within a Tokio runtime.
    fn spawn(&self, spec: &LaunchSpec) -> io::Result<Option<u32>>;

    /// Start a process with an elevation request.
    fn spawn_elevated(&self, spec: &LaunchSpec) -> io::Result<Option<u32>>;

    /// Future that completes when `pid` exits. Completes immediately when
    /// the process is already gone.
    fn exit_notification(&self, pid: u32) -> ExitFuture;
}
