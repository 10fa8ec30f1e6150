// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::CompanionDetection;

/// Launcher configuration as read from `Sidecar.toml`.
///
/// ```toml
/// [config]
/// profile = "default"
/// reconcile_interval = "2s"
/// companion_ui_process = "iRacingUI"
/// companion_detection = "hook"
/// ```
///
/// All keys are optional and have reasonable defaults. Managed programs are
/// not part of this file; they live in the per-profile program store.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawLauncherConfig {
    #[serde(default)]
    pub config: ConfigSection,
}

/// Validated launcher configuration.
///
/// Only constructible through `TryFrom<RawLauncherConfig>` (see
/// `config::validate`) or [`LauncherConfig::default`].
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub config: ConfigSection,
}

impl LauncherConfig {
    pub(crate) fn new_unchecked(config: ConfigSection) -> Self {
        Self { config }
    }

    /// Effective bulk-start concurrency: `max_concurrent_starts` if set,
    /// otherwise half of the available cores with a floor of two.
    pub fn effective_concurrency(&self) -> usize {
        if self.config.max_concurrent_starts > 0 {
            return self.config.max_concurrent_starts;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        (cores / 2).max(2)
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self::new_unchecked(ConfigSection::default())
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigSection {
    /// Profile loaded when `--profile` is not given.
    pub profile: String,

    /// Overrides the user data directory holding profiles, the instance lock
    /// and the signal file.
    pub data_dir: Option<PathBuf>,

    /// How often every program's running state is re-checked.
    #[serde(with = "humantime_serde")]
    pub reconcile_interval: Duration,

    /// Wait after an exit notification before re-enumerating by name, so a
    /// relauncher that replaces itself is not reported as stopped.
    #[serde(with = "humantime_serde")]
    pub exit_grace: Duration,

    /// Liveness poll period for processes the launcher did not spawn itself.
    #[serde(with = "humantime_serde")]
    pub exit_poll_interval: Duration,

    /// Delay after spawning before the launched process is re-resolved.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,

    /// Upper bound for any wait on a window to appear.
    #[serde(with = "humantime_serde")]
    pub window_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub window_poll_interval: Duration,

    pub window_max_retries: u32,

    /// Bulk-start parallelism. `0` means "half the cores, at least two".
    pub max_concurrent_starts: usize,

    /// Process name of the simulation; its presence drives sim
    /// connect/disconnect when no external telemetry client is attached.
    pub sim_process: String,

    #[serde(with = "humantime_serde")]
    pub sim_poll_interval: Duration,

    /// Process name of the companion UI.
    pub companion_ui_process: String,

    pub companion_detection: CompanionDetection,

    #[serde(with = "humantime_serde")]
    pub companion_poll_interval: Duration,

    /// Delay between a companion window event and acting on it.
    #[serde(with = "humantime_serde")]
    pub companion_settle_delay: Duration,

    /// Executable-name patterns of launchers that relocate the real binary
    /// into an `app-X.Y.Z` subdirectory.
    pub versioned_launchers: Vec<String>,

    /// Process-name patterns whose main window is hidden after launch.
    pub hide_after_launch: Vec<String>,

    /// Helper-service name patterns killed together with any program whose
    /// process name contains them.
    pub companion_services: Vec<String>,

    /// Command used to retry a launch with elevated privileges on Unix.
    pub elevation_command: String,

    /// Stop every `include_in_stop_all` program when the launcher exits.
    pub stop_all_on_exit: bool,
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            profile: "default".to_string(),
            data_dir: None,
            reconcile_interval: Duration::from_secs(2),
            exit_grace: Duration::from_secs(1),
            exit_poll_interval: Duration::from_millis(500),
            settle_delay: Duration::from_millis(200),
            window_timeout: Duration::from_secs(10),
            window_poll_interval: Duration::from_millis(200),
            window_max_retries: 50,
            max_concurrent_starts: 0,
            sim_process: "iRacingSim64DX11".to_string(),
            sim_poll_interval: Duration::from_secs(1),
            companion_ui_process: "iRacingUI".to_string(),
            companion_detection: CompanionDetection::Hook,
            companion_poll_interval: Duration::from_secs(1),
            companion_settle_delay: Duration::from_secs(1),
            versioned_launchers: vec!["racelab".to_string()],
            hide_after_launch: vec!["1simracing".to_string()],
            companion_services: vec!["garage61".to_string()],
            elevation_command: "pkexec".to_string(),
            stop_all_on_exit: false,
        }
    }
}

/// Persisted descriptor of one managed program, as stored per profile:
///
/// ```toml
/// [[program]]
/// name = "Crew Chief"
/// executable_path = 'C:\Program Files\CrewChief\CrewChiefV4.exe'
/// start_with_sim = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProgramSpec {
    pub name: String,
    pub executable_path: PathBuf,

    /// Process name reported by the OS once running. Defaults to the file
    /// stem of `executable_path` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_name: Option<String>,

    pub launch_arguments: String,
    pub start_hidden: bool,

    pub minimize_to_tray: bool,
    #[serde(with = "humantime_serde")]
    pub minimize_to_tray_delay: Duration,

    pub close_to_tray: bool,
    #[serde(with = "humantime_serde")]
    pub close_to_tray_delay: Duration,

    pub start_with_sim: bool,
    pub stop_with_sim: bool,
    pub start_with_companion_ui: bool,
    pub stop_with_companion_ui: bool,

    pub include_in_start_all: bool,
    pub include_in_stop_all: bool,
}

impl Default for ProgramSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            executable_path: PathBuf::new(),
            executable_name: None,
            launch_arguments: String::new(),
            start_hidden: false,
            minimize_to_tray: false,
            minimize_to_tray_delay: Duration::ZERO,
            close_to_tray: false,
            close_to_tray_delay: Duration::ZERO,
            start_with_sim: true,
            stop_with_sim: true,
            start_with_companion_ui: false,
            stop_with_companion_ui: false,
            include_in_start_all: true,
            include_in_stop_all: true,
        }
    }
}

impl ProgramSpec {
    /// The process name to look for: the configured override, or the file
    /// stem of the executable path.
    pub fn default_executable_name(&self) -> String {
        if let Some(name) = self.executable_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        self.executable_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// On-disk shape of a profile's program list.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProgramList {
    #[serde(default)]
    pub program: Vec<ProgramSpec>,
}
