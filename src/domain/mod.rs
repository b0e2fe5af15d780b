//! Domain models - core geofencing types
//!
//! This module contains the canonical data types used throughout the engine:
//! - `Polygon` - validated, immutable geofence outline and its local projection
//! - `GeofenceConfig` / `GeofenceState` - registered region and its runtime state
//! - `LocationFix` - position report from the location provider
//! - `GeofenceEvent` - committed ENTER / EXIT / DWELL_START transition
//! - `GeofenceError` - recoverable error kinds

pub mod error;
pub mod geofence;
pub mod polygon;
pub mod types;

// Re-export commonly used types at module level
pub use error::{GeofenceError, GeofenceResult};
pub use geofence::{GeofenceConfig, GeofenceState};
pub use polygon::{LocalProjection, Point2, Polygon};
pub use types::{
    GeofenceEvent, GeofenceId, GeofenceStatus, LatLng, LocationFix, TransitionKind,
};
