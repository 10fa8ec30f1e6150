// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use crate::config::ProgramSpec;
use crate::engine::{CompanionUiEvent, ExitEvent, TelemetryEvent, UserCommand};
use crate::registry::ManagedProgram;
use crate::types::{ProgramId, ProgramState};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Start these programs (bounded parallelism).
    Start(Vec<ProgramId>),
    /// Stop these programs (sequentially).
    Stop(Vec<ProgramId>),
    /// Explicit single start; the result is reported back to the user.
    StartOne(ProgramId),
    StopOne(ProgramId),
    StartAll,
    StopAll,
    ConfirmExit(ExitEvent),
    Restore,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub(crate) fn cont(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    pub(crate) fn idle() -> Self {
        Self::cont(Vec::new())
    }
}

/// Programs to act on for an automation trigger.
///
/// Starts only consider `Stopped` programs and stops only `Running` ones;
/// `NotFound` programs are never touched by automation.
fn select(
    programs: &[ManagedProgram],
    flag: impl Fn(&ProgramSpec) -> bool,
    state: ProgramState,
) -> Vec<ProgramId> {
    programs
        .iter()
        .filter(|p| p.state == state && flag(&p.spec))
        .map(|p| p.id)
        .collect()
}

fn start_or_stop(ids: Vec<ProgramId>, start: bool) -> CoreStep {
    if ids.is_empty() {
        return CoreStep::idle();
    }
    let command = if start {
        CoreCommand::Start(ids)
    } else {
        CoreCommand::Stop(ids)
    };
    CoreStep::cont(vec![command])
}

pub fn handle_telemetry(event: TelemetryEvent, programs: &[ManagedProgram]) -> CoreStep {
    match event {
        TelemetryEvent::Connected => start_or_stop(
            select(programs, |s| s.start_with_sim, ProgramState::Stopped),
            true,
        ),
        TelemetryEvent::Disconnected => start_or_stop(
            select(programs, |s| s.stop_with_sim, ProgramState::Running),
            false,
        ),
    }
}

pub fn handle_companion(event: CompanionUiEvent, programs: &[ManagedProgram]) -> CoreStep {
    match event {
        CompanionUiEvent::Appeared { .. } => start_or_stop(
            select(programs, |s| s.start_with_companion_ui, ProgramState::Stopped),
            true,
        ),
        CompanionUiEvent::Gone => start_or_stop(
            select(programs, |s| s.stop_with_companion_ui, ProgramState::Running),
            false,
        ),
    }
}

pub fn handle_user(command: UserCommand) -> CoreStep {
    let command = match command {
        UserCommand::Start(id) => CoreCommand::StartOne(id),
        UserCommand::Stop(id) => CoreCommand::StopOne(id),
        UserCommand::StartAll => CoreCommand::StartAll,
        UserCommand::StopAll => CoreCommand::StopAll,
    };
    CoreStep::cont(vec![command])
}

pub fn handle_shutdown(stop_all_on_exit: bool) -> CoreStep {
    CoreStep {
        commands: if stop_all_on_exit {
            vec![CoreCommand::StopAll]
        } else {
            Vec::new()
        },
        keep_running: false,
    }
}
