// src/exec/launch_spec.rs

//! Turning a stored descriptor into something the OS can start.
//!
//! Some launchers install a small shim at the configured path and keep the
//! real binary in versioned `app-X.Y.Z` subdirectories next to it. For those
//! the highest installed version is launched directly.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ProgramSpec;
use crate::errors::StartError;
use crate::fs::FileSystem;
use crate::os::LaunchSpec;

use super::matches_any_pattern;

const VERSION_DIR_PREFIX: &str = "app-";

/// Parse `app-1.12.3` into its numeric components.
pub fn parse_app_version(dir_name: &str) -> Option<Vec<u64>> {
    let version = dir_name.strip_prefix(VERSION_DIR_PREFIX)?;
    let parts: Option<Vec<u64>> = version.split('.').map(|p| p.parse().ok()).collect();
    parts.filter(|p| !p.is_empty())
}

/// Highest `app-*` sibling directory of `executable` that contains a file
/// with the same name.
fn latest_versioned_binary(fs: &dyn FileSystem, executable: &Path) -> Option<PathBuf> {
    let dir = executable.parent()?;
    let file_name = executable.file_name()?;
    let entries = fs.read_dir(dir).ok()?;

    entries
        .into_iter()
        .filter(|p| fs.is_dir(p))
        .filter_map(|p| {
            let version = parse_app_version(&p.file_name()?.to_string_lossy())?;
            let candidate = p.join(file_name);
            fs.is_file(&candidate).then_some((version, candidate))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, path)| path)
}

fn is_versioned(spec: &ProgramSpec, patterns: &[String]) -> bool {
    // Already pointing into a versioned directory: launch as configured.
    let in_version_dir = spec
        .executable_path
        .parent()
        .and_then(|p| p.file_name())
        .is_some_and(|n| parse_app_version(&n.to_string_lossy()).is_some());
    !in_version_dir && matches_any_pattern(&spec.default_executable_name(), patterns).is_some()
}

pub fn build_launch_spec(
    fs: &dyn FileSystem,
    spec: &ProgramSpec,
    versioned_launchers: &[String],
) -> Result<LaunchSpec, StartError> {
    let configured = &spec.executable_path;
    if configured.as_os_str().is_empty() {
        return Err(StartError::NotFound(configured.clone()));
    }

    let program = if is_versioned(spec, versioned_launchers) {
        let latest = latest_versioned_binary(fs, configured)
            .ok_or_else(|| StartError::NotFound(configured.clone()))?;
        debug!(program = %spec.name, path = %latest.display(), "using latest versioned binary");
        latest
    } else {
        if !fs.is_file(configured) {
            return Err(StartError::NotFound(configured.clone()));
        }
        configured.clone()
    };

    Ok(LaunchSpec {
        working_dir: program.parent().map(Path::to_path_buf),
        program,
        arguments: spec.launch_arguments.clone(),
        hidden: spec.start_hidden,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn spec(path: &str) -> ProgramSpec {
        ProgramSpec {
            name: "tool".into(),
            executable_path: path.into(),
            launch_arguments: "--fast \"two words\"".into(),
            ..ProgramSpec::default()
        }
    }

    fn patterns() -> Vec<String> {
        vec!["racelab".to_string()]
    }

    #[test]
    fn versions_compare_numerically() {
        assert_eq!(parse_app_version("app-1.10.0"), Some(vec![1, 10, 0]));
        assert!(parse_app_version("app-1.10.0") > parse_app_version("app-1.9.7"));
        assert_eq!(parse_app_version("app-"), None);
        assert_eq!(parse_app_version("app-1.x"), None);
        assert_eq!(parse_app_version("packages"), None);
    }

    #[test]
    fn plain_program_launches_in_its_directory() {
        let fs = MockFileSystem::new();
        fs.add_file("/opt/tool/tool.exe", "");
        let launch = build_launch_spec(&fs, &spec("/opt/tool/tool.exe"), &patterns()).unwrap();
        assert_eq!(launch.program, PathBuf::from("/opt/tool/tool.exe"));
        assert_eq!(launch.working_dir, Some(PathBuf::from("/opt/tool")));
        assert_eq!(launch.arguments, "--fast \"two words\"");
    }

    #[test]
    fn missing_binary_is_not_found() {
        let fs = MockFileSystem::new();
        let err = build_launch_spec(&fs, &spec("/opt/tool/tool.exe"), &patterns()).unwrap_err();
        assert_eq!(err, StartError::NotFound(PathBuf::from("/opt/tool/tool.exe")));
    }

    #[test]
    fn versioned_launcher_picks_highest_installed_version() {
        let fs = MockFileSystem::new();
        fs.add_file("/apps/racelab/RaceLabApps.exe", "");
        fs.add_file("/apps/racelab/app-1.9.7/RaceLabApps.exe", "");
        fs.add_file("/apps/racelab/app-1.10.2/RaceLabApps.exe", "");
        // Newest directory without the binary is skipped.
        fs.add_dir("/apps/racelab/app-2.0.0");

        let launch =
            build_launch_spec(&fs, &spec("/apps/racelab/RaceLabApps.exe"), &patterns()).unwrap();
        assert_eq!(
            launch.program,
            PathBuf::from("/apps/racelab/app-1.10.2/RaceLabApps.exe")
        );
        assert_eq!(launch.working_dir, Some(PathBuf::from("/apps/racelab/app-1.10.2")));
    }

    #[test]
    fn versioned_launcher_without_versions_is_not_found() {
        let fs = MockFileSystem::new();
        fs.add_file("/apps/racelab/RaceLabApps.exe", "");
        let err =
            build_launch_spec(&fs, &spec("/apps/racelab/RaceLabApps.exe"), &patterns()).unwrap_err();
        assert!(matches!(err, StartError::NotFound(_)));
    }
}
