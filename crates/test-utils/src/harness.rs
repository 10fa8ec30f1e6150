#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use sidecar::config::ProgramSpec;
use sidecar::engine::{EngineEvent, EngineHandle};
use sidecar::exec::{ExecSettings, Supervisor};
use sidecar::fs::mock::MockFileSystem;
use sidecar::os::{ProcessTable, WaitPolicy, WindowOperator};
use sidecar::registry::{ProgramEntry, Registry};
use sidecar::types::{ProgramId, ProgramState};

use crate::fake_os::{FakeProcessTable, RecordingWindowOperator};

/// Settings with every delay shrunk to a few milliseconds.
pub fn fast_settings() -> ExecSettings {
    ExecSettings {
        settle_delay: Duration::from_millis(10),
        exit_grace: Duration::from_millis(30),
        window: WaitPolicy {
            timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
            max_retries: 50,
        },
        versioned_launchers: vec!["racelab".into()],
        hide_after_launch: vec!["1simracing".into()],
        companion_services: vec!["garage61".into()],
        concurrency: 4,
    }
}

/// A supervisor wired to fakes.
pub struct TestBed {
    pub registry: Arc<Registry>,
    pub table: FakeProcessTable,
    pub windows: RecordingWindowOperator,
    pub fs: MockFileSystem,
    pub supervisor: Arc<Supervisor>,
    pub engine: EngineHandle,
    pub events: Option<mpsc::Receiver<EngineEvent>>,
}

impl TestBed {
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    pub fn with_settings(settings: ExecSettings) -> Self {
        let registry = Arc::new(Registry::new());
        let table = FakeProcessTable::new();
        let windows = RecordingWindowOperator::new();
        let fs = MockFileSystem::new();
        let (engine, events) = EngineHandle::channel();

        let supervisor = Supervisor::new(
            Arc::clone(&registry),
            Arc::new(table.clone()) as Arc<dyn ProcessTable>,
            Arc::new(windows.clone()) as Arc<dyn WindowOperator>,
            Arc::new(fs.clone()),
            settings,
            engine.sender(),
        );

        Self {
            registry,
            table,
            windows,
            fs,
            supervisor,
            engine,
            events: Some(events),
        }
    }

    /// Register a program and, when it has a path, create its executable.
    pub fn add_installed(&self, spec: ProgramSpec) -> ProgramId {
        if !spec.executable_path.as_os_str().is_empty() {
            self.install(&spec.executable_path);
        }
        self.add(spec)
    }

    /// Register a program without touching the filesystem.
    pub fn add(&self, spec: ProgramSpec) -> ProgramId {
        self.registry.add(spec).expect("valid program spec")
    }

    pub fn install(&self, path: impl AsRef<Path>) {
        self.fs.add_file(path, b"binary".to_vec());
    }

    pub fn uninstall(&self, path: impl AsRef<Path>) {
        self.fs.remove(path);
    }

    pub fn entry(&self, id: ProgramId) -> Arc<ProgramEntry> {
        self.registry.get(id).expect("program is registered")
    }

    pub fn state(&self, id: ProgramId) -> ProgramState {
        self.entry(id).state()
    }

    /// Take the engine event receiver (once).
    pub fn take_events(&mut self) -> mpsc::Receiver<EngineEvent> {
        self.events.take().expect("event receiver already taken")
    }
}

impl Default for TestBed {
    fn default() -> Self {
        Self::new()
    }
}
