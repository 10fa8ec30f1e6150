// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigSection, LauncherConfig, ProgramSpec, RawLauncherConfig};
use crate::errors::{Result, SidecarError};

impl TryFrom<RawLauncherConfig> for LauncherConfig {
    type Error = SidecarError;

    fn try_from(raw: RawLauncherConfig) -> std::result::Result<Self, Self::Error> {
        validate_config_section(&raw.config)?;
        Ok(LauncherConfig::new_unchecked(raw.config))
    }
}

fn validate_config_section(cfg: &ConfigSection) -> Result<()> {
    if cfg.profile.trim().is_empty() {
        return Err(SidecarError::ConfigError(
            "[config].profile must not be empty".to_string(),
        ));
    }

    ensure_non_zero("reconcile_interval", cfg.reconcile_interval)?;
    ensure_non_zero("exit_poll_interval", cfg.exit_poll_interval)?;
    ensure_non_zero("window_timeout", cfg.window_timeout)?;
    ensure_non_zero("window_poll_interval", cfg.window_poll_interval)?;
    ensure_non_zero("sim_poll_interval", cfg.sim_poll_interval)?;
    ensure_non_zero("companion_poll_interval", cfg.companion_poll_interval)?;

    if cfg.window_max_retries == 0 {
        return Err(SidecarError::ConfigError(
            "[config].window_max_retries must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.companion_ui_process.trim().is_empty() {
        return Err(SidecarError::ConfigError(
            "[config].companion_ui_process must not be empty".to_string(),
        ));
    }

    if cfg.sim_process.trim().is_empty() {
        return Err(SidecarError::ConfigError(
            "[config].sim_process must not be empty".to_string(),
        ));
    }

    for (key, patterns) in [
        ("versioned_launchers", &cfg.versioned_launchers),
        ("hide_after_launch", &cfg.hide_after_launch),
        ("companion_services", &cfg.companion_services),
    ] {
        if patterns.iter().any(|p| p.trim().is_empty()) {
            return Err(SidecarError::ConfigError(format!(
                "[config].{key} must not contain empty patterns"
            )));
        }
    }

    Ok(())
}

fn ensure_non_zero(key: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(SidecarError::ConfigError(format!(
            "[config].{key} must be greater than zero"
        )));
    }
    Ok(())
}

/// Check a single program descriptor before it enters the registry.
///
/// The executable does not have to exist (a missing binary is a runtime
/// `NotFound` state, not a configuration error), but the descriptor must
/// name something.
pub fn validate_program(spec: &ProgramSpec) -> Result<()> {
    if spec.name.trim().is_empty() {
        return Err(SidecarError::ConfigError(
            "program name must not be empty".to_string(),
        ));
    }
    if spec.executable_path.as_os_str().is_empty() && spec.executable_name.is_none() {
        return Err(SidecarError::ConfigError(format!(
            "program '{}' needs an executable_path or executable_name",
            spec.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let raw = RawLauncherConfig::default();
        assert!(LauncherConfig::try_from(raw).is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut raw = RawLauncherConfig::default();
        raw.config.reconcile_interval = Duration::ZERO;
        let err = LauncherConfig::try_from(raw).unwrap_err();
        assert!(err.to_string().contains("reconcile_interval"));
    }

    #[test]
    fn empty_pattern_is_rejected() {
        let mut raw = RawLauncherConfig::default();
        raw.config.companion_services.push("  ".into());
        assert!(LauncherConfig::try_from(raw).is_err());
    }

    #[test]
    fn program_without_name_is_rejected() {
        let spec = ProgramSpec {
            executable_path: "/bin/true".into(),
            ..ProgramSpec::default()
        };
        assert!(validate_program(&spec).is_err());

        let spec = ProgramSpec {
            name: "ok".into(),
            ..spec
        };
        assert!(validate_program(&spec).is_ok());
    }
}
