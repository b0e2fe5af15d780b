//! Geofence configuration and per-geofence runtime state

use crate::domain::error::{GeofenceError, GeofenceResult};
use crate::domain::polygon::Polygon;
use crate::domain::types::{GeofenceId, GeofenceStatus, TransitionKind};
use serde::Serialize;
use std::time::Duration;

/// Dwell duration used when a geofence doesn't specify one
pub const DEFAULT_DWELL: Duration = Duration::from_secs(60);

/// A registered polygonal region of interest
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceConfig {
    pub id: GeofenceId,
    pub polygon: Polygon,
    /// Extra margin (meters) a fix may stray outside before EXIT is allowed
    pub responsiveness_m: f64,
    /// Time inside before INSIDE is promoted to DWELL
    pub dwell: Duration,
    pub enabled: bool,
    /// Opaque payload forwarded with every event of this geofence
    pub data: Option<serde_json::Value>,
}

impl GeofenceConfig {
    pub fn new(id: impl Into<GeofenceId>, polygon: Polygon) -> Self {
        Self {
            id: id.into(),
            polygon,
            responsiveness_m: 0.0,
            dwell: DEFAULT_DWELL,
            enabled: true,
            data: None,
        }
    }

    pub fn with_responsiveness_m(mut self, meters: f64) -> Self {
        self.responsiveness_m = meters;
        self
    }

    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell = dwell;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    #[inline]
    pub fn dwell_ms(&self) -> u64 {
        self.dwell.as_millis() as u64
    }

    /// Check values the polygon constructor can't see
    pub fn validate(&self) -> GeofenceResult<()> {
        if self.id.as_str().is_empty() {
            return Err(GeofenceError::InvalidConfig {
                id: self.id.clone(),
                reason: "id cannot be empty".to_string(),
            });
        }
        if !self.responsiveness_m.is_finite() || self.responsiveness_m < 0.0 {
            return Err(GeofenceError::InvalidConfig {
                id: self.id.clone(),
                reason: format!(
                    "responsiveness_m {} must be a non-negative number",
                    self.responsiveness_m
                ),
            });
        }
        Ok(())
    }
}

/// Runtime state of one geofence, owned by the registry
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct GeofenceState {
    pub status: GeofenceStatus,
    /// Fix timestamp of the last committed transition
    pub last_transition_ms: Option<u64>,
    /// Fix timestamp of the last evaluation
    pub last_evaluated_ms: Option<u64>,
    /// Fix timestamp of the ENTER that started the current visit
    pub entered_at_ms: Option<u64>,
    /// Transition waiting for enough agreeing fixes
    pub pending: Option<TransitionKind>,
    /// Consecutive fixes agreeing with `pending`
    pub pending_count: u32,
    /// Distance to the boundary at the last exact evaluation
    pub last_distance_m: Option<f64>,
}

impl GeofenceState {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn clear_pending(&mut self) {
        self.pending = None;
        self.pending_count = 0;
    }
}
