// tests/engine_runtime.rs

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use sidecar::engine::{
    CompanionUiEvent, CoreRuntime, EngineEvent, EngineHandle, EngineOptions, Runtime, UserCommand,
};
use sidecar::instance::InstanceHooks;
use sidecar::types::ProgramState;
use sidecar_test_utils::builders::ProgramSpecBuilder;
use sidecar_test_utils::harness::TestBed;
use sidecar_test_utils::{eventually, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[derive(Debug, Default)]
struct RecordingHooks {
    restores: AtomicUsize,
}

impl InstanceHooks for RecordingHooks {
    fn on_primary_instance(&self) {}

    fn on_restore_requested(&self) {
        self.restores.fetch_add(1, Ordering::SeqCst);
    }
}

struct Running {
    engine: EngineHandle,
    hooks: Arc<RecordingHooks>,
    shutdown: watch::Receiver<bool>,
    task: JoinHandle<sidecar::errors::Result<()>>,
}

fn spawn_runtime(bed: &mut TestBed, stop_all_on_exit: bool) -> Running {
    let options = EngineOptions {
        reconcile_interval: Duration::from_millis(50),
        stop_all_on_exit,
    };
    let hooks = Arc::new(RecordingHooks::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runtime = Runtime::new(
        CoreRuntime::new(options),
        bed.take_events(),
        Arc::clone(&bed.supervisor),
        Arc::clone(&hooks) as Arc<dyn InstanceHooks>,
        options,
        shutdown_tx,
    );
    Running {
        engine: bed.engine.clone(),
        hooks,
        shutdown: shutdown_rx,
        task: tokio::spawn(runtime.run()),
    }
}

fn installed(bed: &TestBed, name: &str) -> String {
    let path = format!("/apps/{name}/{name}.exe");
    bed.install(&path);
    path
}

#[tokio::test]
async fn sim_connection_starts_and_stops_flagged_programs() -> TestResult {
    init_tracing();
    let mut bed = TestBed::new();
    let spotter = bed.add(
        ProgramSpecBuilder::new("Spotter", installed(&bed, "spotter"))
            .with_sim()
            .build(),
    );
    let manual = bed.add(ProgramSpecBuilder::new("Manual", installed(&bed, "manual")).build());
    let running = spawn_runtime(&mut bed, false);

    running.engine.sim_connected(true).await;
    let registry = Arc::clone(&bed.registry);
    eventually(|| registry.get(spotter).is_some_and(|e| e.state() == ProgramState::Running)).await;

    running.engine.sim_connected(false).await;
    let table = bed.table.clone();
    eventually(move || !table.is_running("spotter")).await;
    eventually(|| registry.get(spotter).is_some_and(|e| e.state() == ProgramState::Stopped)).await;

    assert_eq!(bed.state(manual), ProgramState::Stopped);
    assert_eq!(bed.table.spawn_count("/apps/manual/manual.exe"), 0);

    running.engine.shutdown().await;
    with_timeout(running.task).await??;
    Ok(())
}

#[tokio::test]
async fn companion_ui_starts_only_flagged_stopped_programs() -> TestResult {
    init_tracing();
    let mut bed = TestBed::new();
    let flagged = bed.add(
        ProgramSpecBuilder::new("Tracker", installed(&bed, "tracker"))
            .start_with_companion_ui()
            .stop_with_companion_ui()
            .build(),
    );
    let absent = bed.add(
        ProgramSpecBuilder::new("Ghost", "/apps/ghost/ghost.exe")
            .start_with_companion_ui()
            .build(),
    );
    let other = bed.add(ProgramSpecBuilder::new("Other", installed(&bed, "other")).build());
    let running = spawn_runtime(&mut bed, false);

    // Let the first reconcile pass mark the missing program.
    let registry = Arc::clone(&bed.registry);
    eventually(|| registry.get(absent).is_some_and(|e| e.state() == ProgramState::NotFound)).await;

    running
        .engine
        .send(EngineEvent::CompanionUi(CompanionUiEvent::Appeared { pid: None }))
        .await;
    eventually(|| registry.get(flagged).is_some_and(|e| e.state() == ProgramState::Running)).await;

    assert_eq!(bed.state(absent), ProgramState::NotFound);
    assert_eq!(bed.state(other), ProgramState::Stopped);
    assert!(bed.table.attempts().iter().all(|a| a.program.ends_with("tracker.exe")));

    running
        .engine
        .send(EngineEvent::CompanionUi(CompanionUiEvent::Gone))
        .await;
    eventually(|| registry.get(flagged).is_some_and(|e| e.state() == ProgramState::Stopped)).await;

    running.engine.shutdown().await;
    with_timeout(running.task).await??;
    Ok(())
}

#[tokio::test]
async fn user_commands_reach_the_supervisor() -> TestResult {
    init_tracing();
    let mut bed = TestBed::new();
    let a = bed.add(ProgramSpecBuilder::new("A", installed(&bed, "a")).build());
    let b = bed.add(ProgramSpecBuilder::new("B", installed(&bed, "b")).build());
    let running = spawn_runtime(&mut bed, false);
    let registry = Arc::clone(&bed.registry);
    let state_of = |id| registry.get(id).map(|e| e.state());

    running.engine.command(UserCommand::Start(a)).await;
    eventually(|| state_of(a) == Some(ProgramState::Running)).await;

    running.engine.command(UserCommand::StartAll).await;
    eventually(|| state_of(b) == Some(ProgramState::Running)).await;
    assert_eq!(bed.table.spawn_count("/apps/a/a.exe"), 1);

    running.engine.command(UserCommand::Stop(a)).await;
    eventually(|| state_of(a) == Some(ProgramState::Stopped)).await;

    running.engine.command(UserCommand::StopAll).await;
    eventually(|| state_of(b) == Some(ProgramState::Stopped)).await;

    running.engine.shutdown().await;
    with_timeout(running.task).await??;
    Ok(())
}

#[tokio::test]
async fn process_exit_is_confirmed_through_the_engine() -> TestResult {
    init_tracing();
    let mut bed = TestBed::new();
    let id = bed.add(ProgramSpecBuilder::new("A", installed(&bed, "a")).build());
    let pid = bed.supervisor.start(id).await?.pid();
    let running = spawn_runtime(&mut bed, false);

    bed.table.exit(pid);

    let registry = Arc::clone(&bed.registry);
    eventually(|| registry.get(id).is_some_and(|e| e.state() == ProgramState::Stopped)).await;

    running.engine.shutdown().await;
    with_timeout(running.task).await??;
    Ok(())
}

#[tokio::test]
async fn periodic_reconcile_adopts_external_processes() -> TestResult {
    init_tracing();
    let mut bed = TestBed::new();
    let id = bed.add(ProgramSpecBuilder::new("A", installed(&bed, "a")).build());
    let running = spawn_runtime(&mut bed, false);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let pid = bed.table.add_process("a");

    let registry = Arc::clone(&bed.registry);
    eventually(|| {
        registry
            .get(id)
            .and_then(|e| e.process())
            .is_some_and(|h| h.pid == pid)
    })
    .await;

    running.engine.shutdown().await;
    with_timeout(running.task).await??;
    Ok(())
}

#[tokio::test]
async fn restore_request_reaches_the_hooks() -> TestResult {
    init_tracing();
    let mut bed = TestBed::new();
    let running = spawn_runtime(&mut bed, false);

    running.engine.send(EngineEvent::RestoreRequested).await;
    let hooks = Arc::clone(&running.hooks);
    eventually(move || hooks.restores.load(Ordering::SeqCst) == 1).await;

    running.engine.shutdown().await;
    with_timeout(running.task).await??;
    Ok(())
}

#[tokio::test]
async fn shutdown_stops_programs_when_configured() -> TestResult {
    init_tracing();
    let mut bed = TestBed::new();
    let id = bed.add(ProgramSpecBuilder::new("A", installed(&bed, "a")).build());
    bed.supervisor.start(id).await?;
    let running = spawn_runtime(&mut bed, true);

    running.engine.shutdown().await;
    with_timeout(running.task).await??;

    assert_eq!(bed.state(id), ProgramState::Stopped);
    assert!(!bed.table.is_running("a"));
    assert!(*running.shutdown.borrow());
    Ok(())
}

#[tokio::test]
async fn shutdown_leaves_programs_running_by_default() -> TestResult {
    init_tracing();
    let mut bed = TestBed::new();
    let id = bed.add(ProgramSpecBuilder::new("A", installed(&bed, "a")).build());
    bed.supervisor.start(id).await?;
    let running = spawn_runtime(&mut bed, false);

    running.engine.shutdown().await;
    with_timeout(running.task).await??;

    assert_eq!(bed.state(id), ProgramState::Running);
    assert!(bed.table.is_running("a"));
    Ok(())
}
