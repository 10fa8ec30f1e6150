// src/lib.rs

pub mod automation;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod instance;
pub mod logging;
pub mod os;
pub mod registry;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::automation::{CompanionMonitor, CompanionSettings, SimProbeSettings, spawn_sim_probe};
use crate::cli::CliArgs;
use crate::config::{
    LauncherConfig, ProgramSpec, TomlProgramStore, default_config_path, load_and_validate,
    resolve_data_dir,
};
use crate::engine::{CoreRuntime, EngineHandle, EngineOptions, Runtime, UserCommand};
use crate::exec::{ExecSettings, Supervisor};
use crate::fs::{FileSystem, RealFileSystem};
use crate::instance::{InstanceHooks, InstancePaths, InstanceRole, LoggingHooks};
use crate::os::{ProcessTable, SysinfoProcessTable, platform_window_operator};
use crate::registry::Registry;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and the profile store
/// - single-instance coordination
/// - registry / supervisor / runtime
/// - sim probe and companion UI monitor
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    let config_path = args
        .config
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let cfg = load_and_validate(fs.as_ref(), &config_path)?;
    let data_dir = resolve_data_dir(&cfg);
    let profile = args
        .profile
        .clone()
        .unwrap_or_else(|| cfg.config.profile.clone());

    let store = TomlProgramStore::open(&data_dir, Arc::clone(&fs))?;
    let specs = store.load_or_create(&profile)?;

    if args.dry_run {
        print_dry_run(&cfg, &config_path, &profile, &specs);
        return Ok(());
    }

    let paths = InstancePaths::in_dir(&data_dir);
    let mut primary = match instance::acquire(&paths, Arc::clone(&fs))? {
        InstanceRole::Primary(primary) => primary,
        InstanceRole::Secondary => {
            instance::signal_primary(fs.as_ref(), &paths)?;
            info!("another instance is already running; asked it to restore");
            return Ok(());
        }
    };
    let hooks: Arc<dyn InstanceHooks> = Arc::new(LoggingHooks {
        minimized: args.minimized,
    });
    hooks.on_primary_instance();

    let registry = Arc::new(Registry::from_specs(specs)?);
    info!(profile = %profile, programs = registry.len(), "programs loaded");
    spawn_state_logger(registry.subscribe());

    let (engine, event_rx) = EngineHandle::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let table: Arc<dyn ProcessTable> = Arc::new(SysinfoProcessTable::new(&cfg));
    let supervisor = Supervisor::new(
        Arc::clone(&registry),
        Arc::clone(&table),
        platform_window_operator(),
        Arc::clone(&fs),
        ExecSettings::from_config(&cfg),
        engine.sender(),
    );

    primary.watch_signals(engine.sender())?;

    let _sim_probe = spawn_sim_probe(
        Arc::clone(&table),
        SimProbeSettings::from_config(&cfg),
        engine.sender(),
        shutdown_rx.clone(),
    );
    let companion = CompanionMonitor::start(
        CompanionSettings::from_config(&cfg),
        Arc::clone(&table),
        engine.sender(),
        shutdown_rx,
    );

    // Ctrl-C → graceful shutdown.
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            engine.shutdown().await;
        });
    }

    if args.start_all {
        engine.command(UserCommand::StartAll).await;
    }

    let options = EngineOptions {
        reconcile_interval: cfg.config.reconcile_interval,
        stop_all_on_exit: cfg.config.stop_all_on_exit,
    };
    let core = CoreRuntime::new(options);
    let runtime = Runtime::new(core, event_rx, supervisor, hooks, options, shutdown_tx);
    let result = runtime.run().await;

    companion.shutdown().await;
    if let Err(e) = primary.release() {
        warn!(error = %e, "failed to release instance lock");
    }
    result.map_err(Into::into)
}

/// Log every state transition; the headless stand-in for a program list UI.
fn spawn_state_logger(mut changes: broadcast::Receiver<registry::StateChange>) {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => info!(
                    program = %change.name,
                    from = %change.from,
                    to = %change.to,
                    "state"
                ),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "state log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Simple dry-run output: print settings and programs with their flags.
fn print_dry_run(cfg: &LauncherConfig, config_path: &Path, profile: &str, specs: &[ProgramSpec]) {
    let c = &cfg.config;
    println!("sidecar dry-run");
    println!("  config file = {}", config_path.display());
    println!("  profile = {profile}");
    println!("  data_dir = {}", resolve_data_dir(cfg).display());
    println!("  sim_process = {}", c.sim_process);
    println!(
        "  companion_ui_process = {} ({:?})",
        c.companion_ui_process, c.companion_detection
    );
    println!("  reconcile_interval = {:?}", c.reconcile_interval);
    println!("  max concurrent starts = {}", cfg.effective_concurrency());
    println!("  stop_all_on_exit = {}", c.stop_all_on_exit);
    println!();

    println!("programs ({}):", specs.len());
    for spec in specs {
        println!("  - {}", spec.name);
        println!("      path: {}", spec.executable_path.display());
        println!("      process: {}", spec.default_executable_name());
        if !spec.launch_arguments.is_empty() {
            println!("      args: {}", spec.launch_arguments);
        }

        let flags: Vec<&str> = [
            (spec.start_with_sim, "start_with_sim"),
            (spec.stop_with_sim, "stop_with_sim"),
            (spec.start_with_companion_ui, "start_with_companion_ui"),
            (spec.stop_with_companion_ui, "stop_with_companion_ui"),
            (spec.include_in_start_all, "start_all"),
            (spec.include_in_stop_all, "stop_all"),
            (spec.start_hidden, "hidden"),
            (spec.minimize_to_tray, "minimize_to_tray"),
            (spec.close_to_tray, "close_to_tray"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();
        if !flags.is_empty() {
            println!("      flags: {}", flags.join(", "));
        }
    }

    debug!("dry-run complete (nothing started)");
}
