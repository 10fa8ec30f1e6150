// src/config/store.rs

//! Per-profile persistence of managed program descriptors.
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_dir>/profiles/<profile>/programs.toml
//! ```
//!
//! A legacy `<data_dir>/programs.toml` (from before profiles existed) is moved
//! into the `default` profile the first time the store is opened. An existing
//! default profile is never overwritten by it.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::model::{ProgramList, ProgramSpec};
use crate::errors::{Result, SidecarError};
use crate::fs::FileSystem;

pub const PROFILES_DIR: &str = "profiles";
pub const PROGRAMS_FILE: &str = "programs.toml";
pub const DEFAULT_PROFILE: &str = "default";

/// Narrow get/set contract for program descriptors, keyed by profile.
pub trait ProgramStore: Send + Sync + Debug {
    fn list_profiles(&self) -> Result<Vec<String>>;
    fn load(&self, profile: &str) -> Result<Vec<ProgramSpec>>;
    fn save(&self, profile: &str, programs: &[ProgramSpec]) -> Result<()>;
}

/// TOML-file backed [`ProgramStore`].
#[derive(Debug, Clone)]
pub struct TomlProgramStore {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl TomlProgramStore {
    /// Open (and if needed initialise) the store under `data_dir`.
    ///
    /// Ensures the profiles directory exists, that at least the default
    /// profile exists, and migrates a legacy top-level program list.
    pub fn open(data_dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Result<Self> {
        let store = Self {
            root: data_dir.into(),
            fs,
        };
        store.fs.create_dir_all(&store.profiles_dir())?;

        let legacy = store.root.join(PROGRAMS_FILE);
        let target = store.programs_path(DEFAULT_PROFILE);
        if store.fs.is_file(&legacy) && store.fs.exists(&target) {
            warn!(
                legacy = %legacy.display(),
                profile = %target.display(),
                "default profile already exists; leaving the legacy program list alone"
            );
        } else if store.fs.is_file(&legacy) {
            let contents = store.fs.read_to_string(&legacy)?;
            store.fs.write(&target, contents.as_bytes())?;
            store.fs.remove_file(&legacy)?;
            info!(from = %legacy.display(), to = %target.display(), "migrated legacy program list");
        }

        if store.list_profiles()?.is_empty() {
            store.save(DEFAULT_PROFILE, &[])?;
        }

        Ok(store)
    }

    fn profiles_dir(&self) -> PathBuf {
        self.root.join(PROFILES_DIR)
    }

    fn programs_path(&self, profile: &str) -> PathBuf {
        self.profiles_dir().join(profile).join(PROGRAMS_FILE)
    }

    /// Load a profile, creating it empty when it does not exist yet.
    pub fn load_or_create(&self, profile: &str) -> Result<Vec<ProgramSpec>> {
        if !self.fs.is_file(&self.programs_path(profile)) {
            info!(profile, "profile has no program list yet; creating an empty one");
            self.save(profile, &[])?;
            return Ok(Vec::new());
        }
        self.load(profile)
    }
}

fn validate_profile_name(profile: &str) -> Result<()> {
    let trimmed = profile.trim();
    if trimmed.is_empty() || trimmed.contains(['/', '\\']) || trimmed == "." || trimmed == ".." {
        return Err(SidecarError::ConfigError(format!(
            "invalid profile name '{profile}'"
        )));
    }
    Ok(())
}

impl ProgramStore for TomlProgramStore {
    fn list_profiles(&self) -> Result<Vec<String>> {
        let mut profiles: Vec<String> = self
            .fs
            .read_dir(&self.profiles_dir())?
            .into_iter()
            .filter(|p| self.fs.is_dir(p))
            .filter_map(|p| file_name(&p))
            .collect();
        profiles.sort();
        Ok(profiles)
    }

    fn load(&self, profile: &str) -> Result<Vec<ProgramSpec>> {
        validate_profile_name(profile)?;
        let path = self.programs_path(profile);
        if !self.fs.is_file(&path) {
            return Err(SidecarError::ProfileNotFound(profile.to_string()));
        }
        let contents = self.fs.read_to_string(&path)?;
        let list: ProgramList = toml::from_str(&contents)?;
        debug!(profile, count = list.program.len(), "loaded programs");
        Ok(list.program)
    }

    fn save(&self, profile: &str, programs: &[ProgramSpec]) -> Result<()> {
        validate_profile_name(profile)?;
        let list = ProgramList {
            program: programs.to_vec(),
        };
        let contents = toml::to_string_pretty(&list)?;
        self.fs.write(&self.programs_path(profile), contents.as_bytes())?;
        info!(profile, count = programs.len(), "saved programs");
        Ok(())
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
