// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime registry: the name→runtime map and the ownership graph.
//!
//! The map is the only state shared across threads. A reader/writer lock
//! guards membership; status readers snapshot under the read lock, set
//! mutations take the write lock. A runtime's live I/O state is not behind
//! this lock; it exists only on the engine thread.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use socketley_core::{
    Clock, Counters, RuntimeConfig, RuntimeId, RuntimeKind, RuntimeSpec, RuntimeState,
};
use thiserror::Error;

/// Metadata for an `attach`ed external runtime: the daemon tracks the
/// process but does not own its I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExternalInfo {
    pub port: u16,
    pub pid: u32,
}

/// The registry's shared per-runtime record. Counters are atomics; the
/// small mutable fields sit behind their own mutexes so status readers
/// never contend with engine I/O.
#[derive(Debug)]
pub struct RuntimeShared {
    pub id: RuntimeId,
    pub kind: RuntimeKind,
    pub created_at_ms: u64,
    pub name: RwLock<String>,
    pub state: Mutex<RuntimeState>,
    pub started_at_ms: Mutex<Option<u64>>,
    pub config: Mutex<RuntimeConfig>,
    pub counters: Counters,
    pub external: Mutex<Option<ExternalInfo>>,
    pub meta: Mutex<BTreeMap<String, String>>,
}

impl RuntimeShared {
    fn new(kind: RuntimeKind, name: &str, created_at_ms: u64) -> Self {
        Self {
            id: RuntimeId::generate(),
            kind,
            created_at_ms,
            name: RwLock::new(name.to_string()),
            state: Mutex::new(RuntimeState::Created),
            started_at_ms: Mutex::new(None),
            config: Mutex::new(RuntimeConfig::new(kind)),
            counters: Counters::default(),
            external: Mutex::new(None),
            meta: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: RuntimeState) {
        *self.state.lock() = state;
    }

    pub fn is_external(&self) -> bool {
        self.external.lock().is_some()
    }

    /// Build the persisted record from the current configuration.
    pub fn to_spec(&self) -> RuntimeSpec {
        RuntimeSpec {
            id: self.id.clone(),
            name: self.name(),
            created_at_ms: self.created_at_ms,
            was_running: self.state() == RuntimeState::Running,
            config: self.config.lock().clone(),
            meta: self.meta.lock().clone(),
        }
    }

    /// Rebuild a record from its sidecar (boot restore). `created`/`id`
    /// survive the restart; lifecycle state starts over at `created`.
    pub fn from_spec(spec: &RuntimeSpec) -> Self {
        Self {
            id: spec.id.clone(),
            kind: spec.config.kind(),
            created_at_ms: spec.created_at_ms,
            name: RwLock::new(spec.name.clone()),
            state: Mutex::new(RuntimeState::Created),
            started_at_ms: Mutex::new(None),
            config: Mutex::new(spec.config.clone()),
            counters: Counters::default(),
            external: Mutex::new(None),
            meta: Mutex::new(spec.meta.clone()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("name in use: {0}")]
    NameInUse(String),

    #[error("no such runtime: {0}")]
    NotFound(String),

    #[error("invalid name: {0}")]
    InvalidName(String),
}

/// Name→runtime map under a reader/writer lock.
#[derive(Debug, Default)]
pub struct Registry {
    map: RwLock<HashMap<String, Arc<RuntimeShared>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh runtime in state `created`.
    pub fn create(
        &self,
        kind: RuntimeKind,
        name: &str,
        clock: &impl Clock,
    ) -> Result<Arc<RuntimeShared>, RegistryError> {
        if !socketley_core::valid_name(name) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        let mut map = self.map.write();
        if map.contains_key(name) {
            return Err(RegistryError::NameInUse(name.to_string()));
        }
        let shared = Arc::new(RuntimeShared::new(kind, name, clock.epoch_ms()));
        map.insert(name.to_string(), Arc::clone(&shared));
        Ok(shared)
    }

    /// Insert a restored runtime (boot). The caller owns conflict handling.
    pub fn insert_restored(&self, shared: Arc<RuntimeShared>) -> Result<(), RegistryError> {
        let name = shared.name();
        let mut map = self.map.write();
        if map.contains_key(&name) {
            return Err(RegistryError::NameInUse(name));
        }
        map.insert(name, shared);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<RuntimeShared>> {
        self.map.read().get(name).cloned()
    }

    /// Snapshot of the full membership, sorted by name.
    pub fn list(&self) -> Vec<Arc<RuntimeShared>> {
        let map = self.map.read();
        let mut all: Vec<_> = map.values().cloned().collect();
        all.sort_by_key(|a| a.name());
        all
    }

    /// Remove from the map and hand the still-live record to the caller.
    /// Used by `remove` before deferred destruction.
    pub fn extract(&self, name: &str) -> Option<Arc<RuntimeShared>> {
        self.map.write().remove(name)
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<(), RegistryError> {
        if !socketley_core::valid_name(new) {
            return Err(RegistryError::InvalidName(new.to_string()));
        }
        let mut map = self.map.write();
        if map.contains_key(new) {
            return Err(RegistryError::NameInUse(new.to_string()));
        }
        let shared = map.remove(old).ok_or_else(|| RegistryError::NotFound(old.to_string()))?;
        *shared.name.write() = new.to_string();
        map.insert(new.to_string(), shared);
        Ok(())
    }

    /// Names of runtimes whose configured owner is `name`.
    pub fn children(&self, name: &str) -> Vec<String> {
        let map = self.map.read();
        let mut children: Vec<String> = map
            .values()
            .filter(|shared| shared.config.lock().owner.as_deref() == Some(name))
            .map(|shared| shared.name())
            .collect();
        children.sort();
        children
    }

    /// Resolve an exact name or a `*?[]` glob to matching runtimes,
    /// sorted by name.
    pub fn resolve(&self, pattern: &str) -> Vec<Arc<RuntimeShared>> {
        if socketley_core::is_pattern(pattern) {
            let map = self.map.read();
            let mut matched: Vec<_> = map
                .iter()
                .filter(|(name, _)| socketley_core::matches(pattern, name))
                .map(|(_, shared)| Arc::clone(shared))
                .collect();
            matched.sort_by_key(|a| a.name());
            matched
        } else {
            self.get(pattern).into_iter().collect()
        }
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
