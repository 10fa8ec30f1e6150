// src/config/mod.rs

//! Launcher configuration (`Sidecar.toml`) and the per-profile program store.

pub mod loader;
pub mod model;
pub mod store;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, resolve_data_dir};
pub use model::{ConfigSection, LauncherConfig, ProgramList, ProgramSpec, RawLauncherConfig};
pub use store::{ProgramStore, TomlProgramStore};
pub use validate::validate_program;
