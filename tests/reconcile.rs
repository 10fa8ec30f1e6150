// tests/reconcile.rs

use std::sync::Arc;
use std::time::Duration;

use sidecar::engine::reconcile::reconcile_all;
use sidecar::types::ProgramState;
use sidecar_test_utils::builders::ProgramSpecBuilder;
use sidecar_test_utils::harness::TestBed;
use sidecar_test_utils::{init_tracing, with_timeout};

const OVERLAY: &str = "/apps/overlay/Overlay.exe";

#[tokio::test]
async fn externally_started_program_is_adopted() {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add_installed(ProgramSpecBuilder::new("Overlay", OVERLAY).build());
    let pid = bed.table.add_process("Overlay");

    let summary = reconcile_all(&bed.supervisor).await;

    assert_eq!(summary.adopted, 1);
    assert_eq!(bed.state(id), ProgramState::Running);
    assert_eq!(bed.entry(id).process().map(|h| h.pid), Some(pid));
    assert_eq!(bed.supervisor.exit_watcher().watched_pid(id), Some(pid));
}

#[tokio::test]
async fn running_program_without_a_process_becomes_stopped() {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add_installed(ProgramSpecBuilder::new("Overlay", OVERLAY).build());
    let pid = bed.table.add_process("Overlay");
    reconcile_all(&bed.supervisor).await;
    assert_eq!(bed.state(id), ProgramState::Running);

    // Vanish without the exit watcher getting a say.
    bed.supervisor.exit_watcher().unwatch(id);
    bed.table.exit(pid);
    let summary = reconcile_all(&bed.supervisor).await;

    assert_eq!(summary.stopped, 1);
    assert_eq!(bed.state(id), ProgramState::Stopped);
    assert!(bed.entry(id).process().is_none());
}

#[tokio::test]
async fn missing_executable_is_not_found_until_it_returns() {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add(ProgramSpecBuilder::new("Overlay", OVERLAY).build());

    let summary = reconcile_all(&bed.supervisor).await;
    assert_eq!(summary.not_found, 1);
    assert_eq!(bed.state(id), ProgramState::NotFound);

    // Stays put while still missing.
    let summary = reconcile_all(&bed.supervisor).await;
    assert_eq!(summary.not_found, 0);
    assert_eq!(bed.state(id), ProgramState::NotFound);

    bed.install(OVERLAY);
    let summary = reconcile_all(&bed.supervisor).await;
    assert_eq!(summary.recovered, 1);
    assert_eq!(bed.state(id), ProgramState::Stopped);
}

#[tokio::test]
async fn uninstalling_a_running_program_marks_it_not_found() {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add_installed(ProgramSpecBuilder::new("Overlay", OVERLAY).build());
    bed.table.add_process("Overlay");
    reconcile_all(&bed.supervisor).await;

    bed.uninstall(OVERLAY);
    reconcile_all(&bed.supervisor).await;

    assert_eq!(bed.state(id), ProgramState::NotFound);
    assert!(bed.entry(id).process().is_none());
    assert_eq!(bed.supervisor.exit_watcher().watched_pid(id), None);
}

#[tokio::test]
async fn program_known_only_by_process_name_counts_as_installed() {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add(
        ProgramSpecBuilder::new("Sim Hub", "")
            .executable_name("SimHubWPF")
            .build(),
    );

    reconcile_all(&bed.supervisor).await;
    assert_eq!(bed.state(id), ProgramState::Stopped);

    bed.table.add_process("SimHubWPF.exe");
    reconcile_all(&bed.supervisor).await;
    assert_eq!(bed.state(id), ProgramState::Running);
}

#[tokio::test]
async fn failed_enumeration_changes_nothing() {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add_installed(ProgramSpecBuilder::new("Overlay", OVERLAY).build());
    bed.table.add_process("Overlay");
    reconcile_all(&bed.supervisor).await;

    bed.table.fail_enumeration(true);
    let summary = reconcile_all(&bed.supervisor).await;

    assert_eq!(summary, Default::default());
    assert_eq!(bed.state(id), ProgramState::Running);
}

#[tokio::test]
async fn busy_programs_are_skipped() {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add(ProgramSpecBuilder::new("Overlay", OVERLAY).build());
    let entry = bed.entry(id);
    let _op = entry.lock_op().await;

    let summary = reconcile_all(&bed.supervisor).await;

    assert_eq!(summary.busy, 1);
    assert_eq!(bed.state(id), ProgramState::Stopped);
}

#[tokio::test]
async fn start_finishing_after_the_listing_is_not_undone() {
    init_tracing();
    let bed = TestBed::new();
    let id = bed.add_installed(ProgramSpecBuilder::new("Overlay", OVERLAY).build());

    // The pass snapshots an empty table and is slow to hand it back.
    bed.table.delay_next_listing(Duration::from_millis(300));
    let supervisor = Arc::clone(&bed.supervisor);
    let pass = tokio::spawn(async move { reconcile_all(&supervisor).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pid = bed.supervisor.start(id).await.unwrap().pid();
    assert_eq!(bed.state(id), ProgramState::Running);

    let summary = with_timeout(pass).await.unwrap();

    assert_eq!(summary.stopped, 0);
    assert_eq!(bed.state(id), ProgramState::Running);
    assert_eq!(bed.entry(id).process().map(|h| h.pid), Some(pid));
    assert_eq!(bed.supervisor.exit_watcher().watched_pid(id), Some(pid));
}
