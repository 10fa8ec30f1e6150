// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! Consumes [`EngineEvent`]s together with a registry snapshot and decides
//! which programs to start or stop. It has no channels, no Tokio types and
//! performs no IO, so it is unit tested directly.
//!
//! Duplicate edge events (a second `Connected` while already connected, a
//! `Gone` for a UI that was never seen) are dropped here.

use crate::engine::event_handlers::{
    CoreCommand, CoreStep, handle_companion, handle_shutdown, handle_telemetry, handle_user,
};
use crate::engine::{CompanionUiEvent, EngineEvent, EngineOptions, TelemetryEvent};
use crate::registry::ManagedProgram;

#[derive(Debug)]
pub struct CoreRuntime {
    sim_connected: bool,
    companion_present: bool,
    options: EngineOptions,
}

impl CoreRuntime {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            sim_connected: false,
            companion_present: false,
            options,
        }
    }

    pub fn sim_connected(&self) -> bool {
        self.sim_connected
    }

    pub fn companion_present(&self) -> bool {
        self.companion_present
    }

    /// Handle a single event against the current program snapshot.
    pub fn step(&mut self, event: EngineEvent, programs: &[ManagedProgram]) -> CoreStep {
        match event {
            EngineEvent::Telemetry(t) => {
                let connected = t == TelemetryEvent::Connected;
                if connected == self.sim_connected {
                    return CoreStep::idle();
                }
                self.sim_connected = connected;
                handle_telemetry(t, programs)
            }
            EngineEvent::CompanionUi(c) => {
                let present = matches!(c, CompanionUiEvent::Appeared { .. });
                if present == self.companion_present {
                    return CoreStep::idle();
                }
                self.companion_present = present;
                handle_companion(c, programs)
            }
            EngineEvent::ProcessExited(exit) => CoreStep::cont(vec![CoreCommand::ConfirmExit(exit)]),
            EngineEvent::User(command) => handle_user(command),
            EngineEvent::RestoreRequested => CoreStep::cont(vec![CoreCommand::Restore]),
            EngineEvent::ShutdownRequested => handle_shutdown(self.options.stop_all_on_exit),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ProgramSpec;
    use crate::engine::{ExitEvent, UserCommand};
    use crate::types::{ProgramId, ProgramState};

    fn options() -> EngineOptions {
        EngineOptions {
            reconcile_interval: Duration::from_secs(2),
            stop_all_on_exit: false,
        }
    }

    fn program(id: u64, state: ProgramState, tweak: impl FnOnce(&mut ProgramSpec)) -> ManagedProgram {
        let mut spec = ProgramSpec {
            name: format!("p{id}"),
            executable_path: format!("/opt/p{id}").into(),
            ..ProgramSpec::default()
        };
        tweak(&mut spec);
        ManagedProgram {
            id: ProgramId(id),
            executable_name: spec.default_executable_name(),
            spec,
            state,
            process: None,
        }
    }

    #[test]
    fn sim_connect_starts_only_stopped_opt_in_programs() {
        let programs = vec![
            program(1, ProgramState::Stopped, |_| {}),
            program(2, ProgramState::Running, |_| {}),
            program(3, ProgramState::NotFound, |_| {}),
            program(4, ProgramState::Stopped, |s| s.start_with_sim = false),
        ];
        let mut core = CoreRuntime::new(options());

        let step = core.step(EngineEvent::Telemetry(TelemetryEvent::Connected), &programs);
        assert_eq!(step.commands, vec![CoreCommand::Start(vec![ProgramId(1)])]);
        assert!(step.keep_running);
        assert!(core.sim_connected());
    }

    #[test]
    fn duplicate_edges_are_ignored() {
        let programs = vec![program(1, ProgramState::Stopped, |_| {})];
        let mut core = CoreRuntime::new(options());

        let connected = EngineEvent::Telemetry(TelemetryEvent::Connected);
        assert!(!core.step(connected.clone(), &programs).commands.is_empty());
        assert!(core.step(connected, &programs).commands.is_empty());

        // Never seen, so nothing to react to.
        let gone = EngineEvent::CompanionUi(CompanionUiEvent::Gone);
        assert!(core.step(gone, &programs).commands.is_empty());
    }

    #[test]
    fn sim_disconnect_stops_running_opt_in_programs() {
        let programs = vec![
            program(1, ProgramState::Running, |_| {}),
            program(2, ProgramState::Running, |s| s.stop_with_sim = false),
            program(3, ProgramState::Stopped, |_| {}),
        ];
        let mut core = CoreRuntime::new(options());
        core.step(EngineEvent::Telemetry(TelemetryEvent::Connected), &[]);

        let step = core.step(EngineEvent::Telemetry(TelemetryEvent::Disconnected), &programs);
        assert_eq!(step.commands, vec![CoreCommand::Stop(vec![ProgramId(1)])]);
    }

    #[test]
    fn companion_ui_drives_its_own_flags() {
        let programs = vec![
            program(1, ProgramState::Stopped, |s| s.start_with_companion_ui = true),
            program(2, ProgramState::Stopped, |_| {}),
        ];
        let mut core = CoreRuntime::new(options());

        let step = core.step(
            EngineEvent::CompanionUi(CompanionUiEvent::Appeared { pid: Some(77) }),
            &programs,
        );
        assert_eq!(step.commands, vec![CoreCommand::Start(vec![ProgramId(1)])]);
        assert!(core.companion_present());
    }

    #[test]
    fn pass_through_events() {
        let mut core = CoreRuntime::new(options());
        let exit = ExitEvent {
            id: ProgramId(5),
            pid: 99,
        };
        assert_eq!(
            core.step(EngineEvent::ProcessExited(exit), &[]).commands,
            vec![CoreCommand::ConfirmExit(exit)]
        );
        assert_eq!(
            core.step(EngineEvent::User(UserCommand::Start(ProgramId(5))), &[]).commands,
            vec![CoreCommand::StartOne(ProgramId(5))]
        );
        assert_eq!(
            core.step(EngineEvent::RestoreRequested, &[]).commands,
            vec![CoreCommand::Restore]
        );
    }

    #[test]
    fn shutdown_honours_stop_all_on_exit() {
        let mut core = CoreRuntime::new(options());
        let step = core.step(EngineEvent::ShutdownRequested, &[]);
        assert!(!step.keep_running);
        assert!(step.commands.is_empty());

        let mut core = CoreRuntime::new(EngineOptions {
            stop_all_on_exit: true,
            ..options()
        });
        let step = core.step(EngineEvent::ShutdownRequested, &[]);
        assert!(!step.keep_running);
        assert_eq!(step.commands, vec![CoreCommand::StopAll]);
    }
}
