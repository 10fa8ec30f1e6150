// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ProgramId;

#[derive(Error, Debug)]
pub enum SidecarError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Program not found: {0}")]
    ProgramNotFound(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SidecarError>;

/// Why a single `start` call failed.
///
/// All variants are recoverable: the caller decides whether to surface the
/// failure to the user or retry later.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    /// The configured binary (or its relocated versioned copy) is missing.
    #[error("executable not found: {0}")]
    NotFound(PathBuf),

    /// The OS refused the launch, or the process died before it could be
    /// resolved.
    #[error("launch failed: {0}")]
    LaunchFailed(String),

    /// The elevated retry was refused or cancelled.
    #[error("elevation denied: {0}")]
    ElevationDenied(String),

    #[error("no program with id {0}")]
    UnknownProgram(ProgramId),
}
