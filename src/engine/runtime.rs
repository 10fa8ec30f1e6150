// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::errors::Result;
use crate::exec::Supervisor;
use crate::instance::InstanceHooks;

use super::core::CoreRuntime;
use super::reconcile::reconcile_all;
use super::{CoreCommand, EngineEvent, EngineOptions};

/// Drives the core in response to [`EngineEvent`]s and executes its
/// commands against the [`Supervisor`].
///
/// This is a pure IO shell around [`CoreRuntime`]. Commands run as
/// independent tasks so a slow launch never delays event handling; the
/// per-program operation locks inside the supervisor keep them consistent.
pub struct Runtime {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<EngineEvent>,
    supervisor: Arc<Supervisor>,
    hooks: Arc<dyn InstanceHooks>,
    options: EngineOptions,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
    reconcile: Option<JoinHandle<()>>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("options", &self.options)
            .field("in_flight", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<EngineEvent>,
        supervisor: Arc<Supervisor>,
        hooks: Arc<dyn InstanceHooks>,
        options: EngineOptions,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            core,
            event_rx,
            supervisor,
            hooks,
            options,
            shutdown,
            tasks: JoinSet::new(),
            reconcile: None,
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `EngineEvent`s from `event_rx` and feeds them to the core.
    /// - Spawns the resulting commands.
    /// - Runs a reconcile pass every `reconcile_interval` (the first one
    ///   immediately, which adopts programs that were already running).
    pub async fn run(mut self) -> Result<()> {
        info!("sidecar runtime started");

        let mut ticker = tokio::time::interval(self.options.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.event_rx.recv() => {
                    let Some(event) = event else {
                        info!("engine event channel closed; exiting");
                        break;
                    };
                    debug!(?event, "engine received event");

                    let programs = self.supervisor.registry().snapshot();
                    let step = self.core.step(event, &programs);

                    if !step.keep_running {
                        // Final commands run to completion before we exit.
                        for command in step.commands {
                            run_command(&self.supervisor, &self.hooks, command).await;
                        }
                        info!("core requested exit; stopping runtime");
                        break;
                    }
                    for command in step.commands {
                        self.dispatch(command);
                    }
                }
                _ = ticker.tick() => self.schedule_reconcile(),
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "engine task panicked");
                        }
                    }
                }
            }
        }

        self.finish().await;
        Ok(())
    }

    fn dispatch(&mut self, command: CoreCommand) {
        let supervisor = Arc::clone(&self.supervisor);
        let hooks = Arc::clone(&self.hooks);
        self.tasks
            .spawn(async move { run_command(&supervisor, &hooks, command).await });
    }

    fn schedule_reconcile(&mut self) {
        if self.reconcile.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("previous reconcile pass still running; skipping tick");
            return;
        }
        let supervisor = Arc::clone(&self.supervisor);
        self.reconcile = Some(tokio::spawn(async move {
            reconcile_all(&supervisor).await;
        }));
    }

    async fn finish(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(reconcile) = self.reconcile.take() {
            reconcile.abort();
        }
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        self.supervisor.shutdown();
        info!("runtime exiting");
    }
}

async fn run_command(supervisor: &Arc<Supervisor>, hooks: &Arc<dyn InstanceHooks>, command: CoreCommand) {
    match command {
        CoreCommand::Start(ids) => {
            supervisor.start_many(ids).await;
        }
        CoreCommand::Stop(ids) => supervisor.stop_many(ids).await,
        CoreCommand::StartOne(id) => match supervisor.start(id).await {
            Ok(started) => info!(program = %id, pid = started.pid(), "start requested: running"),
            Err(e) => warn!(program = %id, error = %e, "start requested: failed"),
        },
        CoreCommand::StopOne(id) => supervisor.stop(id).await,
        CoreCommand::StartAll => {
            let outcome = supervisor.start_all().await;
            if outcome.failed > 0 {
                warn!(
                    failed = outcome.failed,
                    attempted = outcome.attempted(),
                    "some programs failed to start"
                );
            }
        }
        CoreCommand::StopAll => supervisor.stop_all().await,
        CoreCommand::ConfirmExit(exit) => supervisor.handle_exit(exit).await,
        CoreCommand::Restore => hooks.on_restore_requested(),
    }
}
