//! Event dispatcher - fan-out of committed transitions to registered sinks
//!
//! Delivery is at-least-once per sink: a failing sink is retried, and a sink
//! that still fails is logged and counted but never stops the pipeline or the
//! remaining sinks. Events are de-duplicated on `(geofence id, kind)` so the
//! same transition for the same fix is never delivered twice.

use crate::domain::types::{GeofenceEvent, GeofenceId, TransitionKind};
use crate::infra::metrics::Metrics;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Returned by a sink that is out of capacity
///
/// When every attempt ends with this error the event is counted as dropped
/// for that sink, on top of the sink failure.
#[derive(Debug, Error)]
#[error("sink {name} is full")]
pub struct SinkFull {
    pub name: String,
}

/// Consumer of geofence events
pub trait EventSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn deliver(&self, event: &GeofenceEvent) -> anyhow::Result<()>;
}

/// Sink wrapping a plain callback
pub struct CallbackSink<F> {
    name: String,
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(&GeofenceEvent) + Send + Sync,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self { name: name.into(), callback }
    }
}

impl<F> EventSink for CallbackSink<F>
where
    F: Fn(&GeofenceEvent) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &GeofenceEvent) -> anyhow::Result<()> {
        (self.callback)(event);
        Ok(())
    }
}

/// Result of a single `emit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to every sink; `failed` sinks gave up after all retries
    Delivered { sinks: usize, failed: usize },
    /// Already dispatched for this or a newer fix
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Extra attempts per sink after the first failure
    pub retry_attempts: u32,
    /// Dedup keys older than this (by fix time) are forgotten
    pub dedup_window_ms: u64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self { retry_attempts: 2, dedup_window_ms: 300_000 }
    }
}

pub struct EventDispatcher {
    sinks: Vec<Arc<dyn EventSink>>,
    policy: DispatchPolicy,
    /// (fix timestamp, fix sequence) of the last dispatch per key
    dispatched: FxHashMap<(GeofenceId, TransitionKind), (u64, u64)>,
    metrics: Option<Arc<Metrics>>,
}

impl EventDispatcher {
    pub fn new(policy: DispatchPolicy) -> Self {
        Self { sinks: Vec::new(), policy, dispatched: FxHashMap::default(), metrics: None }
    }

    pub fn with_metrics(policy: DispatchPolicy, metrics: Arc<Metrics>) -> Self {
        Self { metrics: Some(metrics), ..Self::new(policy) }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        debug!(sink = %sink.name(), "sink_registered");
        self.sinks.push(sink);
    }

    pub fn clear_sinks(&mut self) {
        self.sinks.clear();
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Deliver `event` to every sink unless it is a duplicate
    pub fn emit(&mut self, event: &GeofenceEvent) -> DispatchOutcome {
        let fix_at = (event.fix.timestamp_ms, event.fix.sequence);
        self.prune(event.fix.timestamp_ms);

        let key = (event.geofence_id.clone(), event.kind);
        if let Some(&last) = self.dispatched.get(&key) {
            if fix_at <= last {
                debug!(
                    geofence_id = %event.geofence_id,
                    kind = %event.kind.as_str(),
                    seq = %event.fix.sequence,
                    last_seq = %last.1,
                    "event_duplicate_dropped"
                );
                if let Some(ref metrics) = self.metrics {
                    metrics.record_duplicate();
                }
                return DispatchOutcome::Duplicate;
            }
        }
        self.dispatched.insert(key, fix_at);

        let mut failed = 0;
        for sink in &self.sinks {
            if !self.deliver_with_retry(sink.as_ref(), event) {
                failed += 1;
            }
        }

        if let Some(ref metrics) = self.metrics {
            metrics.record_event(event.kind);
        }

        DispatchOutcome::Delivered { sinks: self.sinks.len(), failed }
    }

    fn deliver_with_retry(&self, sink: &dyn EventSink, event: &GeofenceEvent) -> bool {
        let attempts = self.policy.retry_attempts.saturating_add(1);
        let mut full = false;
        for attempt in 1..=attempts {
            match sink.deliver(event) {
                Ok(()) => return true,
                Err(e) => {
                    full = e.is::<SinkFull>();
                    warn!(
                        sink = %sink.name(),
                        event_id = %event.event_id,
                        attempt = %attempt,
                        attempts = %attempts,
                        error = %e,
                        "sink_delivery_failed"
                    );
                }
            }
        }
        if let Some(ref metrics) = self.metrics {
            metrics.record_sink_failure();
            if full {
                metrics.record_event_dropped();
            }
        }
        false
    }

    fn prune(&mut self, now_ms: u64) {
        let window = self.policy.dedup_window_ms;
        self.dispatched.retain(|_, (ts, _)| ts.saturating_add(window) >= now_ms);
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DispatchPolicy::default())
    }
}
