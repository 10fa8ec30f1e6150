// src/os/window.rs

//! Window operations used around launches: sending a program to the tray
//! and hiding a splash window once it shows up.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::config::LauncherConfig;

/// Opaque native window handle.
pub type WindowId = u64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("process {0} has no visible main window")]
    NoWindow(u32),

    #[error("window '{title}' did not appear within {waited:?}")]
    Timeout { title: String, waited: Duration },

    #[error("window operations are not supported on this platform")]
    Unsupported,

    #[error("window operation failed: {0}")]
    Failed(String),
}

/// Native window operations, keyed by process id or window handle.
///
/// Implementations must not block for long: every call is a single native
/// request. Waiting is done by [`wait_until_visible`].
pub trait WindowOperator: Send + Sync + Debug {
    /// Minimize the main window of `pid`.
    fn minimize(&self, pid: u32) -> Result<(), WindowError>;

    /// Ask the main window of `pid` to close, as a user clicking the close
    /// button would.
    fn close_main_window(&self, pid: u32) -> Result<(), WindowError>;

    /// Lower-level close request, used when the graceful request fails.
    fn post_close(&self, pid: u32) -> Result<(), WindowError>;

    /// Find a visible top-level window by exact title.
    fn find_visible(&self, title: &str) -> Option<WindowId>;

    fn minimize_window(&self, window: WindowId) -> Result<(), WindowError>;

    fn hide(&self, window: WindowId) -> Result<(), WindowError>;
}

/// Kind of native top-level window notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEventKind {
    Created,
    Destroyed,
}

/// Raw window notification as delivered by the OS hook. `pid` is `0` when
/// the owning process could no longer be determined (typical for destroy
/// notifications).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawWindowEvent {
    pub kind: WindowEventKind,
    pub pid: u32,
}

/// Bounds for [`wait_until_visible`]: whichever limit is hit first wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub max_retries: u32,
}

impl WaitPolicy {
    pub fn from_config(cfg: &LauncherConfig) -> Self {
        Self {
            timeout: cfg.config.window_timeout,
            poll_interval: cfg.config.window_poll_interval,
            max_retries: cfg.config.window_max_retries,
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::from_config(&LauncherConfig::default())
    }
}

/// Poll until a visible window titled `title` exists.
pub async fn wait_until_visible(
    windows: &Arc<dyn WindowOperator>,
    title: &str,
    policy: WaitPolicy,
) -> Result<WindowId, WindowError> {
    let poll = async {
        for attempt in 0..policy.max_retries.max(1) {
            if let Some(window) = windows.find_visible(title) {
                debug!(title, attempt, "window is visible");
                return Some(window);
            }
            tokio::time::sleep(policy.poll_interval).await;
        }
        None
    };

    match tokio::time::timeout(policy.timeout, poll).await {
        Ok(Some(window)) => Ok(window),
        Ok(None) | Err(_) => Err(WindowError::Timeout {
            title: title.to_string(),
            waited: policy.timeout,
        }),
    }
}

/// Window operator for platforms without a supported window system.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessWindowOperator;

impl WindowOperator for HeadlessWindowOperator {
    fn minimize(&self, _pid: u32) -> Result<(), WindowError> {
        Err(WindowError::Unsupported)
    }

    fn close_main_window(&self, _pid: u32) -> Result<(), WindowError> {
        Err(WindowError::Unsupported)
    }

    fn post_close(&self, _pid: u32) -> Result<(), WindowError> {
        Err(WindowError::Unsupported)
    }

    fn find_visible(&self, _title: &str) -> Option<WindowId> {
        None
    }

    fn minimize_window(&self, _window: WindowId) -> Result<(), WindowError> {
        Err(WindowError::Unsupported)
    }

    fn hide(&self, _window: WindowId) -> Result<(), WindowError> {
        Err(WindowError::Unsupported)
    }
}

/// The window operator for the current platform.
pub fn platform_window_operator() -> Arc<dyn WindowOperator> {
    #[cfg(windows)]
    {
        Arc::new(super::windows::Win32WindowOperator)
    }
    #[cfg(not(windows))]
    {
        Arc::new(HeadlessWindowOperator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Window shows up on the n-th lookup.
    #[derive(Debug)]
    struct AppearsAfter {
        lookups: AtomicU32,
        after: u32,
    }

    impl WindowOperator for AppearsAfter {
        fn minimize(&self, _pid: u32) -> Result<(), WindowError> {
            Ok(())
        }
        fn close_main_window(&self, _pid: u32) -> Result<(), WindowError> {
            Ok(())
        }
        fn post_close(&self, _pid: u32) -> Result<(), WindowError> {
            Ok(())
        }
        fn find_visible(&self, _title: &str) -> Option<WindowId> {
            let n = self.lookups.fetch_add(1, Ordering::SeqCst) + 1;
            (n >= self.after).then_some(7)
        }
        fn minimize_window(&self, _window: WindowId) -> Result<(), WindowError> {
            Ok(())
        }
        fn hide(&self, _window: WindowId) -> Result<(), WindowError> {
            Ok(())
        }
    }

    fn policy(max_retries: u32) -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            max_retries,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn finds_window_after_a_few_polls() {
        let op: Arc<dyn WindowOperator> = Arc::new(AppearsAfter {
            lookups: AtomicU32::new(0),
            after: 3,
        });
        assert_eq!(wait_until_visible(&op, "splash", policy(50)).await, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_bounds_the_wait() {
        let op: Arc<dyn WindowOperator> = Arc::new(AppearsAfter {
            lookups: AtomicU32::new(0),
            after: 100,
        });
        let started = tokio::time::Instant::now();
        let result = wait_until_visible(&op, "splash", policy(5)).await;
        assert!(matches!(result, Err(WindowError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_bounds_the_wait() {
        let op: Arc<dyn WindowOperator> = Arc::new(HeadlessWindowOperator);
        let started = tokio::time::Instant::now();
        let result = wait_until_visible(&op, "never", policy(u32::MAX)).await;
        assert!(matches!(result, Err(WindowError::Timeout { .. })));
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
