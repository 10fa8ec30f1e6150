use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable identity of a managed program inside the registry.
///
/// Two configured programs may point at the same executable, so identity is
/// never derived from the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub(crate) u64);

impl ProgramId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a managed program.
///
/// - `Stopped`: initial state; no live process is tracked.
/// - `Running`: a live process was launched or adopted.
/// - `NotFound`: the configured executable is missing on disk. Reverts to
///   `Stopped` once the path exists again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgramState {
    #[default]
    Stopped,
    Running,
    NotFound,
}

impl fmt::Display for ProgramState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProgramState::Stopped => "stopped",
            ProgramState::Running => "running",
            ProgramState::NotFound => "not found",
        };
        f.write_str(s)
    }
}

/// How the presence of the companion UI process is detected.
///
/// - `Hook`: native window create/destroy notifications (Windows only; other
///   targets fall back to `Poll`).
/// - `Poll`: periodic scan of the process list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompanionDetection {
    #[default]
    Hook,
    Poll,
}

impl FromStr for CompanionDetection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hook" => Ok(CompanionDetection::Hook),
            "poll" => Ok(CompanionDetection::Poll),
            other => Err(format!(
                "invalid companion_detection: {other} (expected \"hook\" or \"poll\")"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn companion_detection_parses_case_insensitively() {
        assert_eq!("Poll".parse::<CompanionDetection>(), Ok(CompanionDetection::Poll));
        assert_eq!(" hook ".parse::<CompanionDetection>(), Ok(CompanionDetection::Hook));
        assert!("inotify".parse::<CompanionDetection>().is_err());
    }

    #[test]
    fn default_state_is_stopped() {
        assert_eq!(ProgramState::default(), ProgramState::Stopped);
        assert_eq!(ProgramState::NotFound.to_string(), "not found");
    }
}
