// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `sidecar`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sidecar",
    version,
    about = "Start and stop companion applications alongside a simulator.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the launcher config file (TOML).
    ///
    /// Default: `Sidecar.toml` in the user config directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Program profile to load. Overrides `[config].profile`.
    #[arg(long, value_name = "NAME")]
    pub profile: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SIDECAR_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the configured programs, but don't start anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Start every program flagged `include_in_start_all` right away.
    #[arg(long)]
    pub start_all: bool,

    /// Start without restoring any window (used by autostart entries).
    #[arg(long)]
    pub minimized: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
