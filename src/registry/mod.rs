// src/registry/mod.rs

//! In-memory registry of managed programs.
//!
//! The registry is an ordered arena keyed by [`ProgramId`]. It is shared by
//! `Arc` with every component; there is no global state. Synchronisation is
//! per entry (see [`ProgramEntry`]), so operations on unrelated programs
//! never block each other.

pub mod program;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::info;

use crate::config::{ProgramSpec, validate_program};
use crate::errors::{Result, SidecarError};
use crate::types::ProgramId;

pub use program::{ManagedProgram, OpGuard, ProcessHandle, ProgramEntry, StateChange};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct Registry {
    entries: RwLock<Vec<Arc<ProgramEntry>>>,
    next_id: AtomicU64,
    changes: broadcast::Sender<StateChange>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            changes,
        }
    }

    /// Build a registry from stored descriptors, preserving their order.
    pub fn from_specs(specs: impl IntoIterator<Item = ProgramSpec>) -> Result<Self> {
        let registry = Self::new();
        for spec in specs {
            registry.add(spec)?;
        }
        Ok(registry)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<ProgramEntry>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<ProgramEntry>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, spec: ProgramSpec) -> Result<ProgramId> {
        validate_program(&spec)?;
        let id = ProgramId(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(program = %spec.name, %id, "program registered");
        let entry = Arc::new(ProgramEntry::new(id, spec, self.changes.clone()));
        self.write().push(entry);
        Ok(id)
    }

    /// Remove a program. Running processes are left alone; stopping is the
    /// caller's decision.
    pub fn remove(&self, id: ProgramId) -> Option<Arc<ProgramEntry>> {
        let mut entries = self.write();
        let idx = entries.iter().position(|e| e.id() == id)?;
        let entry = entries.remove(idx);
        info!(program = %entry.name(), %id, "program removed");
        Some(entry)
    }

    /// Replace a program's descriptor, waiting for any in-flight operation
    /// on it to finish first.
    pub async fn update_spec(&self, id: ProgramId, spec: ProgramSpec) -> Result<()> {
        validate_program(&spec)?;
        let entry = self
            .get(id)
            .ok_or_else(|| SidecarError::ProgramNotFound(id.to_string()))?;
        let _op = entry.lock_op().await;
        entry.replace_spec(spec);
        Ok(())
    }

    pub fn get(&self, id: ProgramId) -> Option<Arc<ProgramEntry>> {
        self.read().iter().find(|e| e.id() == id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<ProgramEntry>> {
        self.read()
            .iter()
            .find(|e| e.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn entries(&self) -> Vec<Arc<ProgramEntry>> {
        self.read().clone()
    }

    pub fn ids(&self) -> Vec<ProgramId> {
        self.read().iter().map(|e| e.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Fresh copies of every program, in registry order.
    pub fn snapshot(&self) -> Vec<ManagedProgram> {
        self.entries().iter().map(|e| e.snapshot()).collect()
    }

    /// Descriptors in registry order, for persisting back to the store.
    pub fn specs(&self) -> Vec<ProgramSpec> {
        self.entries().iter().map(|e| e.spec()).collect()
    }

    /// Subscribe to state-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }
}
