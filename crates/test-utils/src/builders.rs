#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use sidecar::config::{ConfigSection, LauncherConfig, ProgramSpec, RawLauncherConfig};
use sidecar::types::CompanionDetection;

/// Builder for `ProgramSpec`. Automation flags start **off** so each test
/// opts in to exactly what it exercises.
pub struct ProgramSpecBuilder {
    spec: ProgramSpec,
}

impl ProgramSpecBuilder {
    pub fn new(name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            spec: ProgramSpec {
                name: name.to_string(),
                executable_path: path.into(),
                start_with_sim: false,
                stop_with_sim: false,
                ..ProgramSpec::default()
            },
        }
    }

    pub fn executable_name(mut self, name: &str) -> Self {
        self.spec.executable_name = Some(name.to_string());
        self
    }

    pub fn args(mut self, args: &str) -> Self {
        self.spec.launch_arguments = args.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.spec.start_hidden = true;
        self
    }

    pub fn with_sim(mut self) -> Self {
        self.spec.start_with_sim = true;
        self.spec.stop_with_sim = true;
        self
    }

    pub fn start_with_companion_ui(mut self) -> Self {
        self.spec.start_with_companion_ui = true;
        self
    }

    pub fn stop_with_companion_ui(mut self) -> Self {
        self.spec.stop_with_companion_ui = true;
        self
    }

    pub fn minimize_to_tray(mut self, delay: Duration) -> Self {
        self.spec.minimize_to_tray = true;
        self.spec.minimize_to_tray_delay = delay;
        self
    }

    pub fn close_to_tray(mut self, delay: Duration) -> Self {
        self.spec.close_to_tray = true;
        self.spec.close_to_tray_delay = delay;
        self
    }

    pub fn exclude_from_start_all(mut self) -> Self {
        self.spec.include_in_start_all = false;
        self
    }

    pub fn exclude_from_stop_all(mut self) -> Self {
        self.spec.include_in_stop_all = false;
        self
    }

    pub fn build(self) -> ProgramSpec {
        self.spec
    }
}

/// Builder for a validated `LauncherConfig`.
pub struct LauncherConfigBuilder {
    section: ConfigSection,
}

impl LauncherConfigBuilder {
    pub fn new() -> Self {
        Self {
            section: ConfigSection::default(),
        }
    }

    pub fn reconcile_interval(mut self, interval: Duration) -> Self {
        self.section.reconcile_interval = interval;
        self
    }

    pub fn exit_grace(mut self, grace: Duration) -> Self {
        self.section.exit_grace = grace;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.section.settle_delay = delay;
        self
    }

    pub fn max_concurrent_starts(mut self, n: usize) -> Self {
        self.section.max_concurrent_starts = n;
        self
    }

    pub fn companion_detection(mut self, detection: CompanionDetection) -> Self {
        self.section.companion_detection = detection;
        self
    }

    pub fn companion_timing(mut self, poll: Duration, settle: Duration) -> Self {
        self.section.companion_poll_interval = poll;
        self.section.companion_settle_delay = settle;
        self
    }

    pub fn sim_poll_interval(mut self, interval: Duration) -> Self {
        self.section.sim_poll_interval = interval;
        self
    }

    pub fn stop_all_on_exit(mut self, on: bool) -> Self {
        self.section.stop_all_on_exit = on;
        self
    }

    pub fn build(self) -> LauncherConfig {
        LauncherConfig::try_from(RawLauncherConfig {
            config: self.section,
        })
        .expect("Failed to build valid config from builder")
    }
}

impl Default for LauncherConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
