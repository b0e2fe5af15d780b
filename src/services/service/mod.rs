//! Geofence service - the fix-to-event pipeline
//!
//! The service owns the evaluation pipeline and processes fixes strictly in
//! order:
//! - Quality filters (pause, replayed fixes, mock locations, accuracy)
//! - Ordering guard (stale fixes are rejected)
//! - Containment evaluation against a registry snapshot
//! - State machine steps committed back under the registry lock
//! - De-duplicated dispatch to every registered sink
//!
//! Registry mutations and diagnostics go through a cloneable [`ServiceHandle`]
//! that can be used from any thread while the service runs.

#[cfg(test)]
mod tests;

use crate::domain::error::{GeofenceError, GeofenceResult};
use crate::domain::geofence::{GeofenceConfig, GeofenceState};
use crate::domain::types::{GeofenceEvent, GeofenceId, LocationFix, TransitionKind};
use crate::infra::config::{Config, EngineConfig, GeofenceSpec};
use crate::infra::metrics::Metrics;
use crate::io::bridge::{create_fix_channel, BridgeSink, FixSender, PlatformBridge};
use crate::io::event_channel::create_event_channel;
use crate::services::dispatcher::{CallbackSink, DispatchOutcome, EventDispatcher, EventSink};
use crate::services::evaluator::ContainmentEvaluator;
use crate::services::registry::GeofenceRegistry;
use crate::services::state_machine::{FixCursor, TransitionStateMachine};
use serde::Serialize;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

type LocationObserver = Box<dyn Fn(&LocationFix) + Send + Sync>;

/// State shared between the service and its handles
#[derive(Default)]
struct SharedControl {
    paused: AtomicBool,
    /// (timestamp, sequence) of the last accepted fix
    last_fix: parking_lot::Mutex<Option<(u64, u64)>>,
}

/// Snapshot for diagnostics and UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub geofences: usize,
    pub enabled: usize,
    /// Geofences currently INSIDE or DWELL
    pub inside: usize,
    pub paused: bool,
    pub last_fix_timestamp_ms: Option<u64>,
    pub last_fix_sequence: Option<u64>,
    pub fixes_processed: u64,
    pub fixes_stale: u64,
    pub fixes_invalid: u64,
    pub fixes_filtered: u64,
    pub fixes_dropped: u64,
    pub events_total: u64,
    pub duplicates_suppressed: u64,
    pub sink_failures: u64,
    /// Events a full subscriber never received
    pub events_dropped: u64,
    pub fix_queue_depth: u64,
    pub last_rejection: Option<String>,
}

/// Cloneable control surface for the running service
#[derive(Clone)]
pub struct ServiceHandle {
    registry: Arc<GeofenceRegistry>,
    control: Arc<SharedControl>,
    metrics: Arc<Metrics>,
}

impl ServiceHandle {
    pub fn add_geofence(&self, config: GeofenceConfig) -> GeofenceResult<()> {
        self.registry.add(config).map_err(|e| self.reject(e))
    }

    pub fn update_geofence(&self, id: &GeofenceId, config: GeofenceConfig) -> GeofenceResult<()> {
        self.registry.update(id, config).map_err(|e| self.reject(e))
    }

    pub fn remove_geofence(&self, id: &GeofenceId) -> GeofenceResult<()> {
        self.registry.remove(id).map(|_| ()).map_err(|e| self.reject(e))
    }

    /// Remove every geofence; returns how many were removed
    pub fn clear_all(&self) -> usize {
        self.registry.clear()
    }

    pub fn get_state(&self, id: &GeofenceId) -> GeofenceResult<GeofenceState> {
        self.registry.state(id)
    }

    pub fn list(&self) -> Vec<Arc<GeofenceConfig>> {
        self.registry.list()
    }

    /// Skip incoming fixes until `resume`
    pub fn pause(&self) {
        if !self.control.paused.swap(true, Ordering::Relaxed) {
            info!("service_paused");
        }
    }

    pub fn resume(&self) {
        if self.control.paused.swap(false, Ordering::Relaxed) {
            info!("service_resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.control.paused.load(Ordering::Relaxed)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let configs = self.registry.list();
        let states = self.registry.states();
        let last_fix = *self.control.last_fix.lock();
        Diagnostics {
            geofences: configs.len(),
            enabled: configs.iter().filter(|c| c.enabled).count(),
            inside: states.iter().filter(|(_, s)| s.status.is_inside()).count(),
            paused: self.is_paused(),
            last_fix_timestamp_ms: last_fix.map(|(ts, _)| ts),
            last_fix_sequence: last_fix.map(|(_, seq)| seq),
            fixes_processed: self.metrics.fixes_total(),
            fixes_stale: self.metrics.fixes_stale(),
            fixes_invalid: self.metrics.fixes_invalid(),
            fixes_filtered: self.metrics.fixes_filtered(),
            fixes_dropped: self.metrics.fixes_dropped(),
            events_total: self.metrics.events_total(),
            duplicates_suppressed: self.metrics.duplicates_suppressed(),
            sink_failures: self.metrics.sink_failures(),
            events_dropped: self.metrics.events_dropped(),
            fix_queue_depth: self.metrics.fix_queue_depth(),
            last_rejection: self.metrics.last_rejection(),
        }
    }

    fn reject(&self, error: GeofenceError) -> GeofenceError {
        warn!(kind = %error.kind(), error = %error, "geofence_request_rejected");
        self.metrics.record_rejection(&error);
        error
    }
}

/// Fix-to-event pipeline
pub struct GeofenceService {
    registry: Arc<GeofenceRegistry>,
    evaluator: ContainmentEvaluator,
    machine: TransitionStateMachine,
    dispatcher: EventDispatcher,
    cursor: FixCursor,
    control: Arc<SharedControl>,
    observers: Vec<LocationObserver>,
    engine: EngineConfig,
    fix_queue_capacity: usize,
    metrics: Arc<Metrics>,
}

impl GeofenceService {
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Self {
        info!(
            debounce_fixes = %config.transition_policy().debounce_fixes,
            status_change_delay_ms = %config.transition_policy().status_change_delay_ms,
            max_accuracy_m = %config.max_accuracy_m(),
            allow_mock_locations = %config.allow_mock_locations(),
            "geofence_service_initialized"
        );
        Self {
            registry: Arc::new(GeofenceRegistry::new()),
            evaluator: ContainmentEvaluator::with_metrics(metrics.clone()),
            machine: TransitionStateMachine::new(config.transition_policy()),
            dispatcher: EventDispatcher::with_metrics(config.dispatch_policy(), metrics.clone()),
            cursor: FixCursor::new(),
            control: Arc::new(SharedControl::default()),
            observers: Vec::new(),
            engine: config.engine().clone(),
            fix_queue_capacity: config.fix_queue_capacity(),
            metrics,
        }
    }

    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            registry: self.registry.clone(),
            control: self.control.clone(),
            metrics: self.metrics.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<GeofenceRegistry> {
        &self.registry
    }

    /// Register persisted geofences; invalid entries are logged and skipped
    ///
    /// Returns the number of geofences registered.
    pub fn load_geofences(&self, specs: &[GeofenceSpec]) -> usize {
        let mut loaded = 0;
        for spec in specs {
            match spec.to_config(&self.engine).and_then(|config| self.registry.add(config)) {
                Ok(()) => loaded += 1,
                Err(e) => {
                    warn!(geofence_id = %spec.id, error = %e, "geofence_load_failed");
                    self.metrics.record_rejection(&e);
                }
            }
        }
        let skipped = specs.len() - loaded;
        info!(loaded = %loaded, skipped = %skipped, "geofences_loaded");
        loaded
    }

    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.dispatcher.add_sink(sink);
    }

    /// Invoke `callback` for every dispatched event
    pub fn on_geofence_event<F>(&mut self, name: &str, callback: F)
    where
        F: Fn(&GeofenceEvent) + Send + Sync + 'static,
    {
        self.add_sink(Arc::new(CallbackSink::new(name, callback)));
    }

    /// Receive dispatched events on a bounded channel
    pub fn subscribe(&mut self, capacity: usize) -> mpsc::Receiver<GeofenceEvent> {
        let (sink, rx) = create_event_channel(capacity);
        self.add_sink(Arc::new(sink));
        rx
    }

    /// Invoke `observer` for every accepted fix
    pub fn on_location_change<F>(&mut self, observer: F)
    where
        F: Fn(&LocationFix) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Bounded fix queue sized from config
    pub fn fix_channel(&self) -> (FixSender, mpsc::Receiver<LocationFix>) {
        create_fix_channel(self.fix_queue_capacity, Some(self.metrics.clone()))
    }

    /// Wire a platform bridge in both directions
    ///
    /// The bridge receives a fix sender and every dispatched event. Pass the
    /// returned receiver to [`GeofenceService::run`].
    pub fn attach_bridge(
        &mut self,
        bridge: Arc<dyn PlatformBridge>,
    ) -> mpsc::Receiver<LocationFix> {
        let (sender, rx) = self.fix_channel();
        bridge.register_location_sink(sender);
        self.add_sink(Arc::new(BridgeSink::new(bridge)));
        info!("platform_bridge_attached");
        rx
    }

    /// Run the pipeline over the given fix queue
    ///
    /// Stops when the queue closes or shutdown is signalled. Rejected fixes
    /// are logged and counted; they never stop the loop.
    pub async fn run(
        &mut self,
        mut fix_rx: mpsc::Receiver<LocationFix>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(geofences = %self.registry.len(), "geofence_service_started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("geofence_service_shutdown");
                        break;
                    }
                }
                fix = fix_rx.recv() => {
                    match fix {
                        Some(fix) => {
                            self.metrics.set_fix_queue_depth(fix_rx.len() as u64);
                            // Rejections are already logged and counted
                            let _ = self.process_fix(fix);
                        }
                        None => {
                            info!("fix_queue_closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Evaluate one fix and dispatch the resulting events
    ///
    /// Filtered fixes (paused, replayed, mock, inaccurate) return no events
    /// and leave all state untouched.
    pub fn process_fix(
        &mut self,
        fix: LocationFix,
    ) -> GeofenceResult<SmallVec<[GeofenceEvent; 4]>> {
        let process_start = Instant::now();

        if self.control.paused.load(Ordering::Relaxed) {
            debug!(seq = %fix.sequence, "fix_skipped_paused");
            self.metrics.record_fix_filtered();
            return Ok(SmallVec::new());
        }

        if let Err(e) = fix.validate().and_then(|()| self.cursor.check(&fix)) {
            warn!(
                seq = %fix.sequence,
                ts = %fix.timestamp_ms,
                kind = %e.kind(),
                error = %e,
                "fix_rejected"
            );
            self.metrics.record_rejection(&e);
            return Err(e);
        }

        // Same fix delivered again: already counted towards debounce
        if self.cursor.last() == Some((fix.timestamp_ms, fix.sequence)) {
            debug!(seq = %fix.sequence, ts = %fix.timestamp_ms, "fix_replayed");
            self.metrics.record_fix_filtered();
            return Ok(SmallVec::new());
        }

        if let Some(reason) = self.filter_reason(&fix) {
            debug!(seq = %fix.sequence, reason = %reason, "fix_filtered");
            self.metrics.record_fix_filtered();
            return Ok(SmallVec::new());
        }

        self.cursor.advance(&fix);
        *self.control.last_fix.lock() = Some((fix.timestamp_ms, fix.sequence));

        for observer in &self.observers {
            observer(&fix);
        }

        let evaluations = self.evaluator.evaluate(&self.registry, &fix)?;

        let machine = &self.machine;
        let transitions: SmallVec<[(GeofenceId, TransitionKind, Option<serde_json::Value>); 4]> =
            self.registry.commit(|table| {
                let mut transitions = SmallVec::new();
                for evaluation in &evaluations {
                    let Some((config, state)) =
                        table.entry_mut(&evaluation.geofence_id, evaluation.generation)
                    else {
                        continue;
                    };
                    state.last_distance_m = evaluation.distance_m;
                    if let Some(kind) = machine.step(config, state, evaluation.inside, &fix) {
                        transitions.push((config.id.clone(), kind, config.data.clone()));
                    }
                }
                transitions
            });

        let mut events = SmallVec::new();
        for (geofence_id, kind, data) in transitions {
            let event = GeofenceEvent::new(geofence_id, kind, &fix, data);
            if self.dispatcher.emit(&event) == DispatchOutcome::Duplicate {
                continue;
            }
            info!(
                geofence_id = %event.geofence_id,
                kind = %kind.as_str(),
                seq = %fix.sequence,
                ts = %fix.timestamp_ms,
                event_id = %event.event_id,
                "geofence_transition"
            );
            events.push(event);
        }

        self.metrics.record_fix_processed(process_start.elapsed().as_micros() as u64);
        Ok(events)
    }

    /// Unregister all sinks and observers and drop every geofence
    ///
    /// Returns the number of geofences removed.
    pub fn teardown(&mut self) -> usize {
        self.dispatcher.clear_sinks();
        self.observers.clear();
        let removed = self.registry.clear();
        info!(removed = %removed, "geofence_service_teardown");
        removed
    }

    fn filter_reason(&self, fix: &LocationFix) -> Option<&'static str> {
        if fix.is_mock && !self.engine.allow_mock_locations {
            Some("mock_location")
        } else if self.engine.max_accuracy_m > 0.0 && fix.accuracy_m > self.engine.max_accuracy_m {
            Some("low_accuracy")
        } else {
            None
        }
    }
}
