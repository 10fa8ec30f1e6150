// src/config/loader.rs

use std::path::{Path, PathBuf};

use crate::config::model::{LauncherConfig, RawLauncherConfig};
use crate::errors::Result;
use crate::fs::FileSystem;

pub const CONFIG_FILE_NAME: &str = "Sidecar.toml";
pub const APP_DIR_NAME: &str = "sidecar";

/// Load a configuration file and return the raw `RawLauncherConfig`.
///
/// This only performs TOML deserialization; use [`load_and_validate`] for
/// semantic checks.
pub fn load_from_path(fs: &dyn FileSystem, path: impl AsRef<Path>) -> Result<RawLauncherConfig> {
    let contents = fs.read_to_string(path.as_ref())?;
    let config: RawLauncherConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Load and validate the launcher configuration.
///
/// A missing file is not an error: the launcher runs with defaults, which
/// matches a first start before any settings were saved.
pub fn load_and_validate(fs: &dyn FileSystem, path: impl AsRef<Path>) -> Result<LauncherConfig> {
    let path = path.as_ref();
    if !fs.exists(path) {
        tracing::info!(path = %path.display(), "config file not found; using defaults");
        return Ok(LauncherConfig::default());
    }
    let raw = load_from_path(fs, path)?;
    LauncherConfig::try_from(raw)
}

/// Default config path: `<user config dir>/sidecar/Sidecar.toml`, or
/// `Sidecar.toml` in the working directory when no config dir is known.
pub fn default_config_path() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME),
        None => PathBuf::from(CONFIG_FILE_NAME),
    }
}

/// Directory holding profiles, the instance lock and the signal file.
pub fn resolve_data_dir(cfg: &LauncherConfig) -> PathBuf {
    if let Some(dir) = &cfg.config.data_dir {
        return dir.clone();
    }
    match dirs::data_local_dir() {
        Some(dir) => dir.join(APP_DIR_NAME),
        None => PathBuf::from(".").join(APP_DIR_NAME),
    }
}
