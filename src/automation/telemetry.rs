// src/automation/telemetry.rs

//! Sim connection probe.
//!
//! Without an external telemetry client attached, the presence of the sim
//! process stands in for the telemetry connection. External clients can
//! feed the same events through [`crate::engine::EngineHandle::sim_connected`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::LauncherConfig;
use crate::engine::{EngineEvent, TelemetryEvent};
use crate::exec::run_blocking;
use crate::os::ProcessTable;

#[derive(Debug, Clone)]
pub struct SimProbeSettings {
    pub process_name: String,
    pub poll_interval: Duration,
}

impl SimProbeSettings {
    pub fn from_config(cfg: &LauncherConfig) -> Self {
        Self {
            process_name: cfg.config.sim_process.clone(),
            poll_interval: cfg.config.sim_poll_interval,
        }
    }
}

/// Poll for the sim process and emit `Connected`/`Disconnected` on change.
pub fn spawn_sim_probe(
    table: Arc<dyn ProcessTable>,
    settings: SimProbeSettings,
    events: mpsc::Sender<EngineEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut connected = false;
        let mut ticker = tokio::time::interval(settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let processes = match run_blocking(&table, |t| t.processes()).await {
                Ok(list) => list,
                Err(e) => {
                    debug!(error = %e, "sim probe skipped a cycle");
                    continue;
                }
            };
            let present = processes
                .iter()
                .any(|p| p.matches_name(&settings.process_name));
            if present == connected {
                continue;
            }

            connected = present;
            let event = if present {
                info!(process = %settings.process_name, "sim connected");
                TelemetryEvent::Connected
            } else {
                info!(process = %settings.process_name, "sim disconnected");
                TelemetryEvent::Disconnected
            };
            if events.send(EngineEvent::Telemetry(event)).await.is_err() {
                break;
            }
        }
        debug!("sim probe stopped");
    })
}
