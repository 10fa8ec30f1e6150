// tests/lifecycle.rs

use std::error::Error;
use std::io;
use std::time::Duration;

use sidecar::engine::{EngineEvent, ExitEvent};
use sidecar::errors::StartError;
use sidecar::exec::Started;
use sidecar::types::{ProgramId, ProgramState};
use sidecar_test_utils::builders::ProgramSpecBuilder;
use sidecar_test_utils::fake_os::{SpawnBehaviour, WindowCall};
use sidecar_test_utils::harness::TestBed;
use sidecar_test_utils::{eventually, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

const CREW_CHIEF: &str = "/apps/crewchief/CrewChiefV4.exe";

fn crew_chief(bed: &TestBed) -> ProgramId {
    bed.add_installed(ProgramSpecBuilder::new("Crew Chief", CREW_CHIEF).build())
}

#[tokio::test]
async fn start_launches_and_tracks_the_process() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);

    let started = bed.supervisor.start(id).await?;
    let Started::Launched { pid } = started else {
        panic!("expected a fresh launch, got {started:?}");
    };

    assert_eq!(bed.state(id), ProgramState::Running);
    assert_eq!(bed.entry(id).process().map(|h| h.pid), Some(pid));
    assert_eq!(bed.table.pids_named("CrewChiefV4"), vec![pid]);
    assert_eq!(bed.supervisor.exit_watcher().watched_pid(id), Some(pid));
    Ok(())
}

#[tokio::test]
async fn start_is_idempotent() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);

    let first = bed.supervisor.start(id).await?;
    let second = bed.supervisor.start(id).await?;

    assert_eq!(second, Started::AlreadyRunning { pid: first.pid() });
    assert_eq!(bed.table.spawn_count(CREW_CHIEF), 1);
    assert_eq!(bed.state(id), ProgramState::Running);
    Ok(())
}

#[tokio::test]
async fn start_adopts_a_process_started_elsewhere() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);
    let external = bed.table.add_process("CrewChiefV4");

    let started = bed.supervisor.start(id).await?;

    assert_eq!(started, Started::AlreadyRunning { pid: external });
    assert!(bed.table.attempts().is_empty());
    Ok(())
}

#[tokio::test]
async fn start_with_missing_executable_is_not_found() {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add(ProgramSpecBuilder::new("Ghost", "/apps/ghost/ghost.exe").build());

    let err = bed.supervisor.start(id).await.unwrap_err();

    assert!(matches!(err, StartError::NotFound(_)), "got {err:?}");
    assert_eq!(bed.state(id), ProgramState::NotFound);
    assert!(bed.table.attempts().is_empty());
}

#[tokio::test]
async fn start_with_empty_path_is_not_found() {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add(
        ProgramSpecBuilder::new("Overlay", "")
            .executable_name("overlay")
            .build(),
    );

    let err = bed.supervisor.start(id).await.unwrap_err();
    assert!(matches!(err, StartError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn start_of_unknown_program_is_rejected() {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);
    bed.registry.remove(id);

    let err = bed.supervisor.start(id).await.unwrap_err();
    assert!(matches!(err, StartError::UnknownProgram(_)), "got {err:?}");
}

#[tokio::test]
async fn permission_denied_retries_once_elevated() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);
    bed.table
        .set_behaviour(CREW_CHIEF, SpawnBehaviour::Fail(io::ErrorKind::PermissionDenied));

    let started = bed.supervisor.start(id).await?;

    assert!(matches!(started, Started::Launched { .. }));
    let elevated: Vec<bool> = bed.table.attempts().iter().map(|a| a.elevated).collect();
    assert_eq!(elevated, vec![false, true]);
    assert_eq!(bed.state(id), ProgramState::Running);
    Ok(())
}

#[tokio::test]
async fn refused_elevation_fails_after_exactly_two_attempts() {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);
    bed.table
        .set_behaviour(CREW_CHIEF, SpawnBehaviour::Fail(io::ErrorKind::PermissionDenied));
    bed.table
        .set_elevated_behaviour(CREW_CHIEF, SpawnBehaviour::Fail(io::ErrorKind::PermissionDenied));

    let err = bed.supervisor.start(id).await.unwrap_err();

    assert!(matches!(err, StartError::ElevationDenied(_)), "got {err:?}");
    assert_eq!(bed.table.spawn_count(CREW_CHIEF), 2);
    assert_eq!(bed.state(id), ProgramState::Stopped);
}

#[tokio::test]
async fn elevated_launch_tracks_the_program_not_its_helper() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);
    bed.table
        .set_behaviour(CREW_CHIEF, SpawnBehaviour::Fail(io::ErrorKind::PermissionDenied));
    bed.table
        .set_elevated_behaviour(CREW_CHIEF, SpawnBehaviour::ViaHelper("pkexec".into()));

    let started = bed.supervisor.start(id).await?;

    let program_pid = bed.table.pids_named("CrewChiefV4");
    assert_eq!(program_pid, vec![started.pid()]);
    let entry = bed.entry(id);
    assert_eq!(entry.executable_name(), "CrewChiefV4");
    assert_eq!(entry.process().map(|h| h.name), Some("CrewChiefV4".to_string()));

    bed.supervisor.stop(id).await;
    assert!(!bed.table.is_running("CrewChiefV4"));
    assert!(bed.table.is_running("pkexec"));
    Ok(())
}

#[tokio::test]
async fn spawns_run_off_the_runtime_thread() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);
    bed.table
        .set_behaviour(CREW_CHIEF, SpawnBehaviour::Fail(io::ErrorKind::PermissionDenied));

    bed.supervisor.start(id).await?;

    let runtime_thread = std::thread::current().id();
    let attempts = bed.table.attempts();
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|a| a.thread != runtime_thread));
    Ok(())
}

#[tokio::test]
async fn other_spawn_errors_are_not_retried() {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);
    bed.table
        .set_behaviour(CREW_CHIEF, SpawnBehaviour::Fail(io::ErrorKind::InvalidInput));

    let err = bed.supervisor.start(id).await.unwrap_err();

    assert!(matches!(err, StartError::LaunchFailed(_)), "got {err:?}");
    assert_eq!(bed.table.spawn_count(CREW_CHIEF), 1);
}

#[tokio::test]
async fn process_that_dies_on_launch_is_a_failed_start() {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);
    bed.table.set_behaviour(CREW_CHIEF, SpawnBehaviour::ExitImmediately);

    let err = bed.supervisor.start(id).await.unwrap_err();

    assert!(matches!(err, StartError::LaunchFailed(_)), "got {err:?}");
    assert_eq!(bed.state(id), ProgramState::Stopped);
    assert!(bed.entry(id).process().is_none());
}

#[tokio::test]
async fn launcher_hand_off_tracks_the_real_process() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let path = "/apps/tool/launcher.exe";
    let id = bed.add_installed(
        ProgramSpecBuilder::new("Tool", path)
            .executable_name("ToolMain")
            .build(),
    );
    bed.table
        .set_behaviour(path, SpawnBehaviour::HandsOffTo("ToolMain".into()));

    let started = bed.supervisor.start(id).await?;

    assert_eq!(bed.table.pids_named("ToolMain"), vec![started.pid()]);
    assert_eq!(bed.state(id), ProgramState::Running);
    Ok(())
}

#[tokio::test]
async fn versioned_launcher_starts_the_newest_installed_binary() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let shim = "/apps/racelab/RaceLabApps.exe";
    let id = bed.add_installed(ProgramSpecBuilder::new("RaceLab", shim).build());
    bed.install("/apps/racelab/app-1.9.7/RaceLabApps.exe");
    bed.install("/apps/racelab/app-1.10.0/RaceLabApps.exe");

    bed.supervisor.start(id).await?;

    let attempts = bed.table.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(
        attempts[0].program,
        std::path::PathBuf::from("/apps/racelab/app-1.10.0/RaceLabApps.exe")
    );
    Ok(())
}

#[tokio::test]
async fn launch_arguments_and_hidden_flag_reach_the_os() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add_installed(
        ProgramSpecBuilder::new("Crew Chief", CREW_CHIEF)
            .args("-profile \"Road Racing\"")
            .hidden()
            .build(),
    );

    bed.supervisor.start(id).await?;

    let attempt = &bed.table.attempts()[0];
    assert_eq!(attempt.arguments, "-profile \"Road Racing\"");
    assert!(attempt.hidden);
    Ok(())
}

#[tokio::test]
async fn minimize_to_tray_minimizes_the_new_window() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add_installed(
        ProgramSpecBuilder::new("Crew Chief", CREW_CHIEF)
            .minimize_to_tray(Duration::from_millis(5))
            .close_to_tray(Duration::from_millis(5))
            .build(),
    );

    let pid = bed.supervisor.start(id).await?.pid();

    // Minimizing wins when both are configured.
    assert_eq!(bed.windows.calls(), vec![WindowCall::Minimize(pid)]);
    Ok(())
}

#[tokio::test]
async fn close_to_tray_falls_back_to_a_direct_close() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add_installed(
        ProgramSpecBuilder::new("Crew Chief", CREW_CHIEF)
            .close_to_tray(Duration::from_millis(5))
            .build(),
    );
    bed.windows.fail_graceful_close(true);

    let pid = bed.supervisor.start(id).await?.pid();

    assert_eq!(
        bed.windows.calls(),
        vec![WindowCall::CloseMain(pid), WindowCall::PostClose(pid)]
    );
    assert_eq!(bed.state(id), ProgramState::Running);
    Ok(())
}

#[tokio::test]
async fn splash_window_is_hidden_after_launch() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add_installed(
        ProgramSpecBuilder::new("1SimRacing", "/apps/1simracing/1SimRacing.exe").build(),
    );
    let window = bed.windows.show_window("1SimRacing");

    bed.supervisor.start(id).await?;

    let windows = bed.windows.clone();
    eventually(move || windows.is_hidden(window)).await;
    assert_eq!(
        bed.windows.calls(),
        vec![WindowCall::MinimizeWindow(window), WindowCall::Hide(window)]
    );
    Ok(())
}

#[tokio::test]
async fn stop_kills_every_matching_process() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);
    let pid = bed.supervisor.start(id).await?.pid();
    let helper = bed.table.add_process("CrewChiefV4");

    bed.supervisor.stop(id).await;

    assert!(!bed.table.is_running("CrewChiefV4"));
    let mut kills = bed.table.kills();
    kills.sort_unstable();
    assert_eq!(kills, vec![pid, helper]);
    assert_eq!(bed.state(id), ProgramState::Stopped);
    assert!(bed.entry(id).process().is_none());
    assert_eq!(bed.supervisor.exit_watcher().watched_pid(id), None);
    Ok(())
}

#[tokio::test]
async fn stopping_twice_is_harmless() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);
    bed.supervisor.start(id).await?;

    bed.supervisor.stop(id).await;
    bed.supervisor.stop(id).await;

    assert_eq!(bed.table.kills().len(), 1);
    assert_eq!(bed.state(id), ProgramState::Stopped);
    Ok(())
}

#[tokio::test]
async fn stop_also_kills_the_companion_service() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add_installed(
        ProgramSpecBuilder::new("Garage 61", "/apps/garage61/garage61-launcher.exe").build(),
    );
    bed.supervisor.start(id).await?;
    bed.table.add_process("Garage61.TelemetryService");
    bed.table.add_process("unrelated");

    bed.supervisor.stop(id).await;

    assert!(!bed.table.is_running("garage61-launcher"));
    assert!(!bed.table.is_running("Garage61.TelemetryService"));
    assert!(bed.table.is_running("unrelated"));
    Ok(())
}

#[tokio::test]
async fn stop_without_any_executable_kills_nothing() {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add(ProgramSpecBuilder::new("Notes", "").executable_name("").build());
    bed.table.add_process("anything");

    bed.supervisor.stop(id).await;

    assert!(bed.table.kills().is_empty());
    assert_eq!(bed.state(id), ProgramState::Stopped);
}

#[tokio::test]
async fn stop_keeps_a_not_found_program_not_found() {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add(ProgramSpecBuilder::new("Ghost", "/apps/ghost/ghost.exe").build());
    let _ = bed.supervisor.start(id).await;
    assert_eq!(bed.state(id), ProgramState::NotFound);

    bed.supervisor.stop(id).await;

    assert_eq!(bed.state(id), ProgramState::NotFound);
}

#[tokio::test]
async fn exit_with_nothing_left_moves_to_stopped() -> TestResult {
    init_tracing();
    let mut bed = TestBed::new();
    let mut events = bed.take_events();
    let id = crew_chief(&bed);
    let pid = bed.supervisor.start(id).await?.pid();

    bed.table.exit(pid);
    let event = with_timeout(events.recv()).await;
    assert_eq!(event, Some(EngineEvent::ProcessExited(ExitEvent { id, pid })));

    bed.supervisor.handle_exit(ExitEvent { id, pid }).await;

    assert_eq!(bed.state(id), ProgramState::Stopped);
    assert!(bed.entry(id).process().is_none());
    Ok(())
}

#[tokio::test]
async fn exit_with_a_replacement_stays_running() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);
    let pid = bed.supervisor.start(id).await?.pid();

    let replacement = bed.table.add_process("CrewChiefV4");
    bed.table.exit(pid);
    bed.supervisor.handle_exit(ExitEvent { id, pid }).await;

    assert_eq!(bed.state(id), ProgramState::Running);
    assert!(bed.entry(id).process().is_none());

    sidecar::engine::reconcile::reconcile_all(&bed.supervisor).await;
    assert_eq!(bed.entry(id).process().map(|h| h.pid), Some(replacement));
    Ok(())
}

#[tokio::test]
async fn stale_exit_is_ignored() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);
    let pid = bed.supervisor.start(id).await?.pid();

    bed.supervisor
        .handle_exit(ExitEvent { id, pid: pid + 1000 })
        .await;

    assert_eq!(bed.state(id), ProgramState::Running);
    assert_eq!(bed.entry(id).process().map(|h| h.pid), Some(pid));
    Ok(())
}

#[tokio::test]
async fn state_changes_are_published_in_order() -> TestResult {
    init_tracing();
    let bed = TestBed::new();
    let id = crew_chief(&bed);
    let mut changes = bed.registry.subscribe();

    bed.supervisor.start(id).await?;
    bed.supervisor.stop(id).await;

    let first = changes.recv().await?;
    let second = changes.recv().await?;
    assert_eq!((first.from, first.to), (ProgramState::Stopped, ProgramState::Running));
    assert_eq!((second.from, second.to), (ProgramState::Running, ProgramState::Stopped));
    Ok(())
}
