//! Geofence registry - sole owner of geofence configs and their state
//!
//! Readers (evaluation snapshots, state queries) share a read lock; add,
//! update, remove and evaluation commits take the write lock. Each entry
//! carries a generation that changes whenever its config is replaced, so a
//! commit computed against an old config is dropped instead of applied to
//! the new one.

use crate::domain::error::{GeofenceError, GeofenceResult};
use crate::domain::geofence::{GeofenceConfig, GeofenceState};
use crate::domain::types::{GeofenceId, GeofenceStatus};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, info};

struct Entry {
    config: Arc<GeofenceConfig>,
    state: GeofenceState,
    generation: u64,
}

#[derive(Default)]
struct RegistryInner {
    entries: FxHashMap<GeofenceId, Entry>,
    /// Registration order
    order: Vec<GeofenceId>,
    next_generation: u64,
}

impl RegistryInner {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

/// Config and status of one geofence, captured under the read lock
#[derive(Debug, Clone)]
pub struct GeofenceSnapshot {
    pub config: Arc<GeofenceConfig>,
    pub status: GeofenceStatus,
    pub generation: u64,
}

/// Mutable view of the state table, only available inside [`GeofenceRegistry::commit`]
pub struct StateTable<'a> {
    inner: &'a mut RegistryInner,
}

impl StateTable<'_> {
    /// Config and state of `id`, if it still has the given generation
    pub fn entry_mut(
        &mut self,
        id: &GeofenceId,
        generation: u64,
    ) -> Option<(&GeofenceConfig, &mut GeofenceState)> {
        let entry = self.inner.entries.get_mut(id)?;
        if entry.generation != generation {
            debug!(geofence_id = %id, "commit_skipped_generation_changed");
            return None;
        }
        Some((&*entry.config, &mut entry.state))
    }
}

/// Thread-safe set of monitored geofences
pub struct GeofenceRegistry {
    inner: RwLock<RegistryInner>,
}

impl GeofenceRegistry {
    pub fn new() -> Self {
        Self { inner: RwLock::new(RegistryInner::default()) }
    }

    /// Register a geofence with a fresh OUTSIDE state
    pub fn add(&self, config: GeofenceConfig) -> GeofenceResult<()> {
        config.validate()?;

        let mut inner = self.inner.write();
        if inner.entries.contains_key(&config.id) {
            return Err(GeofenceError::DuplicateId { id: config.id });
        }

        info!(
            geofence_id = %config.id,
            vertices = %config.polygon.len(),
            area_m2 = format!("{:.1}", config.polygon.area_m2()),
            responsiveness_m = %config.responsiveness_m,
            dwell_ms = %config.dwell_ms(),
            enabled = %config.enabled,
            "geofence_added"
        );

        let generation = inner.next_generation();
        let id = config.id.clone();
        inner.order.push(id.clone());
        inner.entries.insert(
            id,
            Entry { config: Arc::new(config), state: GeofenceState::new(), generation },
        );
        Ok(())
    }

    /// Remove a geofence and its state
    pub fn remove(&self, id: &GeofenceId) -> GeofenceResult<Arc<GeofenceConfig>> {
        let mut inner = self.inner.write();
        let entry =
            inner.entries.remove(id).ok_or_else(|| GeofenceError::NotFound { id: id.clone() })?;
        inner.order.retain(|existing| existing != id);

        info!(geofence_id = %id, status = %entry.state.status.as_str(), "geofence_removed");
        Ok(entry.config)
    }

    /// Replace the config of `id` and reset its state to OUTSIDE.
    ///
    /// If `config.id` differs from `id` the geofence is re-keyed in place.
    pub fn update(&self, id: &GeofenceId, config: GeofenceConfig) -> GeofenceResult<()> {
        config.validate()?;

        let mut inner = self.inner.write();
        if !inner.entries.contains_key(id) {
            return Err(GeofenceError::NotFound { id: id.clone() });
        }
        if &config.id != id && inner.entries.contains_key(&config.id) {
            return Err(GeofenceError::DuplicateId { id: config.id });
        }

        let generation = inner.next_generation();
        let new_id = config.id.clone();
        inner.entries.remove(id);
        if let Some(slot) = inner.order.iter_mut().find(|existing| **existing == *id) {
            *slot = new_id.clone();
        }

        info!(
            geofence_id = %id,
            new_id = %new_id,
            vertices = %config.polygon.len(),
            enabled = %config.enabled,
            "geofence_updated"
        );

        inner.entries.insert(
            new_id,
            Entry { config: Arc::new(config), state: GeofenceState::new(), generation },
        );
        Ok(())
    }

    /// Remove every geofence, returns how many were removed
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.write();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        info!(count = %count, "geofences_cleared");
        count
    }

    /// Configs in registration order
    pub fn list(&self) -> Vec<Arc<GeofenceConfig>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|entry| Arc::clone(&entry.config))
            .collect()
    }

    pub fn get(&self, id: &GeofenceId) -> Option<Arc<GeofenceConfig>> {
        self.inner.read().entries.get(id).map(|entry| Arc::clone(&entry.config))
    }

    /// Copy of the current state of `id`
    pub fn state(&self, id: &GeofenceId) -> GeofenceResult<GeofenceState> {
        self.inner
            .read()
            .entries
            .get(id)
            .map(|entry| entry.state.clone())
            .ok_or_else(|| GeofenceError::NotFound { id: id.clone() })
    }

    /// States of all geofences in registration order
    pub fn states(&self) -> Vec<(GeofenceId, GeofenceState)> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).map(|entry| (id.clone(), entry.state.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Enabled geofences in registration order, for one evaluation pass
    pub fn snapshot_enabled(&self) -> Vec<GeofenceSnapshot> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .filter(|entry| entry.config.enabled)
            .map(|entry| GeofenceSnapshot {
                config: Arc::clone(&entry.config),
                status: entry.state.status,
                generation: entry.generation,
            })
            .collect()
    }

    /// Apply evaluation results under a single write lock
    pub fn commit<R>(&self, f: impl FnOnce(&mut StateTable<'_>) -> R) -> R {
        let mut inner = self.inner.write();
        let mut table = StateTable { inner: &mut *inner };
        f(&mut table)
    }
}

impl Default for GeofenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
