//! Containment evaluator - raw containment of one fix against every enabled geofence
//!
//! The buffer for a geofence is its responsiveness radius plus the fix's
//! accuracy radius. A fix whose exact position is inside counts as inside.
//! A fix that is outside but within the buffer is ambiguous and keeps the
//! previous containment: an OUTSIDE geofence is not entered, an INSIDE one is
//! not exited. This is the hysteresis that stops noisy fixes oscillating on a
//! boundary.

use crate::domain::error::GeofenceResult;
use crate::domain::types::{GeofenceId, LocationFix};
use crate::infra::metrics::Metrics;
use crate::services::geometry::{self, Containment};
use crate::services::registry::GeofenceRegistry;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::trace;

/// Containment of one geofence for one fix
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub geofence_id: GeofenceId,
    /// Registry generation the evaluation was computed against
    pub generation: u64,
    /// Raw containment after hysteresis
    pub inside: bool,
    pub containment: Containment,
    pub distance_m: Option<f64>,
}

/// Resolve a geometric classification against the previous containment
#[inline]
pub fn resolve(containment: Containment, previously_inside: bool) -> bool {
    match containment {
        Containment::Inside => true,
        Containment::Boundary => previously_inside,
        Containment::Outside => false,
    }
}

/// Mapping of geofence id to raw containment
pub fn containment_map(evaluations: &[Evaluation]) -> FxHashMap<GeofenceId, bool> {
    evaluations.iter().map(|e| (e.geofence_id.clone(), e.inside)).collect()
}

/// Evaluates fixes against the registry's enabled geofences
pub struct ContainmentEvaluator {
    metrics: Option<Arc<Metrics>>,
}

impl ContainmentEvaluator {
    pub fn new() -> Self {
        Self { metrics: None }
    }

    /// Create an evaluator that records evaluation counts
    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        Self { metrics: Some(metrics) }
    }

    /// Evaluate `fix` against every enabled geofence, in registration order
    pub fn evaluate(
        &self,
        registry: &GeofenceRegistry,
        fix: &LocationFix,
    ) -> GeofenceResult<Vec<Evaluation>> {
        fix.validate()?;

        let position = fix.position();
        let snapshot = registry.snapshot_enabled();
        let mut evaluations = Vec::with_capacity(snapshot.len());
        let mut prefiltered = 0u64;

        for geofence in &snapshot {
            let buffer_m = geofence.config.responsiveness_m + fix.accuracy_m;
            let measurement = geometry::measure(&geofence.config.polygon, position, buffer_m);
            if measurement.distance_m.is_none() {
                prefiltered += 1;
            }

            let inside = resolve(measurement.containment, geofence.status.is_inside());

            trace!(
                geofence_id = %geofence.config.id,
                seq = %fix.sequence,
                containment = ?measurement.containment,
                distance_m = ?measurement.distance_m,
                inside = %inside,
                "geofence_evaluated"
            );

            evaluations.push(Evaluation {
                geofence_id: geofence.config.id.clone(),
                generation: geofence.generation,
                inside,
                containment: measurement.containment,
                distance_m: measurement.distance_m,
            });
        }

        if let Some(ref metrics) = self.metrics {
            metrics.record_geofences_evaluated(evaluations.len() as u64, prefiltered);
        }

        Ok(evaluations)
    }
}

impl Default for ContainmentEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
