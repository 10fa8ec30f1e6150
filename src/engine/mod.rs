// src/engine/mod.rs

//! Automation engine.
//!
//! Everything that can change what should be running arrives as an
//! [`EngineEvent`] on a single channel:
//! - sim connect/disconnect (telemetry probe or an external client)
//! - companion UI appearance and disappearance
//! - exit notifications from watched processes
//! - user commands (start/stop one or all)
//! - restore requests from a second instance, and shutdown
//!
//! The pure decision logic lives in [`core`]; the async shell that executes
//! its commands against the [`crate::exec::Supervisor`] is in [`runtime`].
//! [`reconcile`] holds the periodic state correction pass.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::types::ProgramId;

pub mod core;
pub mod event_handlers;
pub mod reconcile;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;

/// Capacity of the engine event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection state changes of the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryEvent {
    Connected,
    Disconnected,
}

/// Presence changes of the companion UI process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanionUiEvent {
    Appeared { pid: Option<u32> },
    Gone,
}

/// A watched process exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitEvent {
    pub id: ProgramId,
    pub pid: u32,
}

/// Explicit user requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Start(ProgramId),
    Stop(ProgramId),
    StartAll,
    StopAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Telemetry(TelemetryEvent),
    CompanionUi(CompanionUiEvent),
    ProcessExited(ExitEvent),
    User(UserCommand),
    /// A second instance asked this one to show itself.
    RestoreRequested,
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub reconcile_interval: Duration,
    /// Stop every `include_in_stop_all` program before exiting.
    pub stop_all_on_exit: bool,
}

/// Cloneable sender for feeding events into the engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineEvent>,
}

impl EngineHandle {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Create the engine channel and a handle for it.
    pub fn channel() -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self::new(tx), rx)
    }

    pub fn sender(&self) -> mpsc::Sender<EngineEvent> {
        self.tx.clone()
    }

    /// Returns `false` once the engine has stopped.
    pub async fn send(&self, event: EngineEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Entry point for an external telemetry client.
    pub async fn sim_connected(&self, connected: bool) -> bool {
        let event = if connected {
            TelemetryEvent::Connected
        } else {
            TelemetryEvent::Disconnected
        };
        self.send(EngineEvent::Telemetry(event)).await
    }

    pub async fn command(&self, command: UserCommand) -> bool {
        self.send(EngineEvent::User(command)).await
    }

    pub async fn shutdown(&self) -> bool {
        self.send(EngineEvent::ShutdownRequested).await
    }
}
