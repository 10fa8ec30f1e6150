// src/exec/supervisor.rs

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::{EngineEvent, ExitEvent};
use crate::errors::StartError;
use crate::fs::FileSystem;
use crate::os::{ProcessTable, WindowOperator};
use crate::registry::Registry;
use crate::types::ProgramId;

use super::bulk::{self, BulkOutcome};
use super::exit_watch::ExitWatcher;
use super::launch::{LaunchOrchestrator, Started};
use super::resolver::ProcessResolver;
use super::terminate::TerminationOrchestrator;
use super::ExecSettings;

/// Lifecycle facade over the registry.
///
/// Every public operation takes the target program's operation lock, so
/// callers (engine commands, the reconciler, bulk operations) can invoke it
/// from any task without extra coordination.
#[derive(Debug)]
pub struct Supervisor {
    registry: Arc<Registry>,
    resolver: ProcessResolver,
    launcher: LaunchOrchestrator,
    terminator: TerminationOrchestrator,
    exit_watcher: Arc<ExitWatcher>,
    fs: Arc<dyn FileSystem>,
    settings: Arc<ExecSettings>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<Registry>,
        table: Arc<dyn ProcessTable>,
        windows: Arc<dyn WindowOperator>,
        fs: Arc<dyn FileSystem>,
        settings: ExecSettings,
        events: mpsc::Sender<EngineEvent>,
    ) -> Arc<Self> {
        let settings = Arc::new(settings);
        let resolver = ProcessResolver::new(Arc::clone(&table));
        let exit_watcher = Arc::new(ExitWatcher::new(table, events));
        let launcher = LaunchOrchestrator::new(
            resolver.clone(),
            windows,
            Arc::clone(&fs),
            Arc::clone(&exit_watcher),
            Arc::clone(&settings),
        );
        let terminator = TerminationOrchestrator::new(
            resolver.clone(),
            Arc::clone(&exit_watcher),
            Arc::clone(&settings),
        );
        Arc::new(Self {
            registry,
            resolver,
            launcher,
            terminator,
            exit_watcher,
            fs,
            settings,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn resolver(&self) -> &ProcessResolver {
        &self.resolver
    }

    pub fn exit_watcher(&self) -> &Arc<ExitWatcher> {
        &self.exit_watcher
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn settings(&self) -> &ExecSettings {
        &self.settings
    }

    pub async fn start(&self, id: ProgramId) -> Result<Started, StartError> {
        let entry = self
            .registry
            .get(id)
            .ok_or(StartError::UnknownProgram(id))?;
        let _op = entry.lock_op().await;
        self.launcher.launch(&entry).await
    }

    pub async fn stop(&self, id: ProgramId) {
        let Some(entry) = self.registry.get(id) else {
            warn!(program = %id, "stop requested for unknown program");
            return;
        };
        let _op = entry.lock_op().await;
        self.terminator.terminate(&entry).await;
    }

    /// Start every program flagged `include_in_start_all`.
    pub async fn start_all(self: &Arc<Self>) -> BulkOutcome {
        let ids = self
            .registry
            .entries()
            .iter()
            .filter(|e| e.spec().include_in_start_all)
            .map(|e| e.id())
            .collect();
        self.start_many(ids).await
    }

    pub async fn start_many(self: &Arc<Self>, ids: Vec<ProgramId>) -> BulkOutcome {
        bulk::start_many(self, ids, self.settings.concurrency).await
    }

    /// Stop every program flagged `include_in_stop_all`, one at a time.
    pub async fn stop_all(&self) {
        let ids = self
            .registry
            .entries()
            .iter()
            .filter(|e| e.spec().include_in_stop_all)
            .map(|e| e.id())
            .collect();
        self.stop_many(ids).await;
    }

    pub async fn stop_many(&self, ids: Vec<ProgramId>) {
        bulk::stop_many(self, ids).await;
    }

    /// Confirm a posted exit notification.
    pub async fn handle_exit(&self, event: ExitEvent) {
        let Some(entry) = self.registry.get(event.id) else {
            debug!(program = %event.id, "exit for a program that was removed");
            return;
        };
        self.exit_watcher
            .confirm_exit(&entry, event, &self.resolver, self.settings.exit_grace)
            .await;
    }

    /// Cancel every exit watch. Running programs are left alone.
    pub fn shutdown(&self) {
        self.exit_watcher.shutdown();
    }
}
