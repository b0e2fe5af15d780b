//! Shared types for the geofence engine

use crate::domain::error::{GeofenceError, GeofenceResult};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for geofence IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeofenceId(pub String);

impl GeofenceId {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GeofenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GeofenceId {
    fn from(s: &str) -> Self {
        GeofenceId(s.to_string())
    }
}

impl From<String> for GeofenceId {
    fn from(s: String) -> Self {
        GeofenceId(s)
    }
}

/// Geographic coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    #[inline]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl From<(f64, f64)> for LatLng {
    fn from((lat, lng): (f64, f64)) -> Self {
        Self { lat, lng }
    }
}

/// A single position report from the location provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    /// Horizontal accuracy radius in meters
    #[serde(default)]
    pub accuracy_m: f64,
    /// Fix time (epoch ms)
    pub timestamp_ms: u64,
    /// Monotonic sequence number assigned by the provider
    pub sequence: u64,
    /// Reported by a mock location provider
    #[serde(default)]
    pub is_mock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
}

impl LocationFix {
    pub fn new(lat: f64, lng: f64, accuracy_m: f64, timestamp_ms: u64, sequence: u64) -> Self {
        Self { lat, lng, accuracy_m, timestamp_ms, sequence, is_mock: false, speed_mps: None }
    }

    pub fn at(position: LatLng, accuracy_m: f64, timestamp_ms: u64, sequence: u64) -> Self {
        Self::new(position.lat, position.lng, accuracy_m, timestamp_ms, sequence)
    }

    pub fn mocked(mut self) -> Self {
        self.is_mock = true;
        self
    }

    #[inline]
    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    /// Reject fixes that cannot be evaluated (NaN, out of range, bad accuracy)
    pub fn validate(&self) -> GeofenceResult<()> {
        let reason = if !self.lat.is_finite() || !self.lng.is_finite() {
            Some(format!("non-finite coordinates ({}, {})", self.lat, self.lng))
        } else if self.lat.abs() > 90.0 {
            Some(format!("latitude {} out of range", self.lat))
        } else if self.lng.abs() > 180.0 {
            Some(format!("longitude {} out of range", self.lng))
        } else if !self.accuracy_m.is_finite() || self.accuracy_m < 0.0 {
            Some(format!("accuracy {} must be a non-negative number", self.accuracy_m))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(GeofenceError::InvalidFix { sequence: self.sequence, reason }),
            None => Ok(()),
        }
    }
}

/// Containment status of a single geofence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceStatus {
    #[default]
    Outside,
    Inside,
    Dwell,
}

impl GeofenceStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            GeofenceStatus::Outside => "outside",
            GeofenceStatus::Inside => "inside",
            GeofenceStatus::Dwell => "dwell",
        }
    }

    /// Inside or dwelling
    #[inline]
    pub fn is_inside(&self) -> bool {
        !matches!(self, GeofenceStatus::Outside)
    }
}

/// Committed transition kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Enter,
    Exit,
    DwellStart,
}

impl TransitionKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Enter => "enter",
            TransitionKind::Exit => "exit",
            TransitionKind::DwellStart => "dwell_start",
        }
    }

    /// Status a geofence is in after this transition commits
    #[inline]
    pub fn target_status(&self) -> GeofenceStatus {
        match self {
            TransitionKind::Enter => GeofenceStatus::Inside,
            TransitionKind::Exit => GeofenceStatus::Outside,
            TransitionKind::DwellStart => GeofenceStatus::Dwell,
        }
    }
}

/// Event emitted to external consumers when a transition commits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceEvent {
    /// Unique event ID (UUIDv7)
    pub event_id: String,
    pub geofence_id: GeofenceId,
    pub kind: TransitionKind,
    /// Fix that committed the transition
    pub fix: LocationFix,
    /// Transition time (fix timestamp, epoch ms)
    pub timestamp_ms: u64,
    /// Wall clock time the event was created (epoch ms)
    pub emitted_at_ms: u64,
    /// Custom data attached to the geofence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl GeofenceEvent {
    pub fn new(
        geofence_id: GeofenceId,
        kind: TransitionKind,
        fix: &LocationFix,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_id: new_uuid_v7(),
            geofence_id,
            kind,
            timestamp_ms: fix.timestamp_ms,
            fix: fix.clone(),
            emitted_at_ms: epoch_ms(),
            data,
        }
    }

    /// Serialize to a single JSON line
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
