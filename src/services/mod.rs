//! Services - geofence evaluation and event delivery
//!
//! This module contains the core business logic services:
//! - `geometry` - Point-in-polygon and boundary distance
//! - `registry` - Thread-safe owner of geofence configs and state
//! - `evaluator` - Raw containment of a fix against every enabled geofence
//! - `state_machine` - OUTSIDE / INSIDE / DWELL transitions with debounce
//! - `dispatcher` - De-duplicated, retried fan-out to event sinks
//! - `service` - Fix-to-event pipeline and its control handle

pub mod dispatcher;
pub mod evaluator;
pub mod geometry;
pub mod registry;
pub mod service;
pub mod state_machine;

// Re-export commonly used types
pub use dispatcher::{
    CallbackSink, DispatchOutcome, DispatchPolicy, EventDispatcher, EventSink, SinkFull,
};
pub use evaluator::{ContainmentEvaluator, Evaluation};
pub use geometry::{contains_point, distance_to_boundary, Containment};
pub use registry::GeofenceRegistry;
pub use service::{Diagnostics, GeofenceService, ServiceHandle};
pub use state_machine::{FixCursor, TransitionPolicy, TransitionStateMachine};
