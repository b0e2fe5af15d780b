//! Error types for the geofence engine.
//!
//! Every error is local and recoverable: the caller gets it back, the
//! evaluation pipeline keeps running.

use thiserror::Error;

use crate::domain::types::GeofenceId;

/// Errors returned by the registry, the evaluator and the service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeofenceError {
    #[error("Invalid polygon: {reason}")]
    InvalidPolygon { reason: String },

    #[error("Geofence already registered: {id}")]
    DuplicateId { id: GeofenceId },

    #[error("Geofence not found: {id}")]
    NotFound { id: GeofenceId },

    #[error("Stale fix: timestamp {timestamp_ms} (seq {sequence}) is older than last accepted {last_timestamp_ms} (seq {last_sequence})")]
    StaleFix {
        timestamp_ms: u64,
        sequence: u64,
        last_timestamp_ms: u64,
        last_sequence: u64,
    },

    #[error("Invalid fix (seq {sequence}): {reason}")]
    InvalidFix { sequence: u64, reason: String },

    #[error("Invalid geofence config for {id}: {reason}")]
    InvalidConfig { id: GeofenceId, reason: String },
}

impl GeofenceError {
    pub(crate) fn invalid_polygon(reason: impl Into<String>) -> Self {
        GeofenceError::InvalidPolygon { reason: reason.into() }
    }

    /// Short snake_case label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            GeofenceError::InvalidPolygon { .. } => "invalid_polygon",
            GeofenceError::DuplicateId { .. } => "duplicate_id",
            GeofenceError::NotFound { .. } => "not_found",
            GeofenceError::StaleFix { .. } => "stale_fix",
            GeofenceError::InvalidFix { .. } => "invalid_fix",
            GeofenceError::InvalidConfig { .. } => "invalid_config",
        }
    }
}

/// Result alias used across the crate.
pub type GeofenceResult<T> = Result<T, GeofenceError>;
