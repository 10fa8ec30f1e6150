// src/automation/mod.rs

//! Event sources that drive automation: the sim probe and the companion UI
//! monitor. Both only report edges; deciding what to start or stop is the
//! engine's job.

pub mod companion;
pub mod telemetry;

pub use companion::{CompanionMonitor, CompanionSettings};
pub use telemetry::{SimProbeSettings, spawn_sim_probe};
