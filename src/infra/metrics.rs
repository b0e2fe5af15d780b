//! Lock-free metrics collection and periodic reporting
//!
//! Fix-processing counters are updated from the pipeline with Relaxed
//! atomics; `report()` swaps the periodic ones to zero. The last rejection
//! reason is the only value behind a lock.
//!
//! NOTE: Relaxed ordering only. These counters feed logs and diagnostics,
//! never control flow.

use crate::domain::error::GeofenceError;
use crate::domain::types::TransitionKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries (microseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
const BUCKET_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Fixes fully evaluated (monotonic)
    fixes_total: AtomicU64,
    /// Fixes evaluated since last report (reset on report)
    fixes_since_report: AtomicU64,
    /// Fixes rejected as out of order (monotonic)
    fixes_stale: AtomicU64,
    /// Fixes rejected as malformed (monotonic)
    fixes_invalid: AtomicU64,
    /// Fixes skipped by accuracy / mock / pause filters (monotonic)
    fixes_filtered: AtomicU64,
    /// Fixes dropped because the input queue was full (monotonic)
    fixes_dropped: AtomicU64,
    /// Geofence evaluations (monotonic)
    geofences_evaluated: AtomicU64,
    /// Evaluations settled by the bounding box alone (monotonic)
    prefilter_skips: AtomicU64,
    /// Evaluation latency per fix (reset on report)
    latency_sum_us: AtomicU64,
    latency_max_us: AtomicU64,
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    enters_total: AtomicU64,
    exits_total: AtomicU64,
    dwells_total: AtomicU64,
    /// Events dropped by the dispatcher as duplicates (monotonic)
    duplicates_suppressed: AtomicU64,
    /// Sink deliveries that failed after every retry (monotonic)
    sink_failures: AtomicU64,
    /// Events dropped because a subscriber channel was full (monotonic)
    events_dropped: AtomicU64,
    /// Current input queue depth (snapshot)
    fix_queue_depth: AtomicU64,
    last_rejection: parking_lot::Mutex<Option<String>>,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            fixes_total: AtomicU64::new(0),
            fixes_since_report: AtomicU64::new(0),
            fixes_stale: AtomicU64::new(0),
            fixes_invalid: AtomicU64::new(0),
            fixes_filtered: AtomicU64::new(0),
            fixes_dropped: AtomicU64::new(0),
            geofences_evaluated: AtomicU64::new(0),
            prefilter_skips: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            enters_total: AtomicU64::new(0),
            exits_total: AtomicU64::new(0),
            dwells_total: AtomicU64::new(0),
            duplicates_suppressed: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            fix_queue_depth: AtomicU64::new(0),
            last_rejection: parking_lot::Mutex::new(None),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_fix_processed(&self, latency_us: u64) {
        self.fixes_total.fetch_add(1, Ordering::Relaxed);
        self.fixes_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    /// Count a rejected fix and keep its reason for diagnostics
    pub fn record_rejection(&self, error: &GeofenceError) {
        match error {
            GeofenceError::StaleFix { .. } => {
                self.fixes_stale.fetch_add(1, Ordering::Relaxed);
            }
            GeofenceError::InvalidFix { .. } => {
                self.fixes_invalid.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        *self.last_rejection.lock() = Some(error.to_string());
    }

    #[inline]
    pub fn record_fix_filtered(&self) {
        self.fixes_filtered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fix_dropped(&self) {
        self.fixes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_geofences_evaluated(&self, evaluated: u64, prefiltered: u64) {
        self.geofences_evaluated.fetch_add(evaluated, Ordering::Relaxed);
        self.prefilter_skips.fetch_add(prefiltered, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event(&self, kind: TransitionKind) {
        let counter = match kind {
            TransitionKind::Enter => &self.enters_total,
            TransitionKind::Exit => &self.exits_total,
            TransitionKind::DwellStart => &self.dwells_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_duplicate(&self) {
        self.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_fix_queue_depth(&self, depth: u64) {
        self.fix_queue_depth.store(depth, Ordering::Relaxed);
    }

    #[inline]
    pub fn fixes_total(&self) -> u64 {
        self.fixes_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fixes_stale(&self) -> u64 {
        self.fixes_stale.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fixes_invalid(&self) -> u64 {
        self.fixes_invalid.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fixes_filtered(&self) -> u64 {
        self.fixes_filtered.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fixes_dropped(&self) -> u64 {
        self.fixes_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn geofences_evaluated(&self) -> u64 {
        self.geofences_evaluated.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn prefilter_skips(&self) -> u64 {
        self.prefilter_skips.load(Ordering::Relaxed)
    }

    /// Events delivered, all kinds
    #[inline]
    pub fn events_total(&self) -> u64 {
        self.enters_total.load(Ordering::Relaxed)
            + self.exits_total.load(Ordering::Relaxed)
            + self.dwells_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn duplicates_suppressed(&self) -> u64 {
        self.duplicates_suppressed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    pub fn fix_queue_depth(&self) -> u64 {
        self.fix_queue_depth.load(Ordering::Relaxed)
    }

    pub fn last_rejection(&self) -> Option<String> {
        self.last_rejection.lock().clone()
    }

    pub fn report(&self, geofences: usize, inside: usize) -> MetricsSummary {
        // Swap periodic counters to zero and get their values
        let fixes_count = self.fixes_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let fixes_per_sec = if elapsed.as_secs_f64() > 0.0 {
            fixes_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if fixes_count > 0 { latency_sum / fixes_count } else { 0 };

        MetricsSummary {
            fixes_total: self.fixes_total(),
            fixes_per_sec,
            fixes_stale: self.fixes_stale(),
            fixes_invalid: self.fixes_invalid(),
            fixes_filtered: self.fixes_filtered(),
            fixes_dropped: self.fixes_dropped(),
            geofences_evaluated: self.geofences_evaluated(),
            prefilter_skips: self.prefilter_skips(),
            avg_eval_latency_us: avg_latency,
            max_eval_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            enters_total: self.enters_total.load(Ordering::Relaxed),
            exits_total: self.exits_total.load(Ordering::Relaxed),
            dwells_total: self.dwells_total.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed(),
            sink_failures: self.sink_failures(),
            events_dropped: self.events_dropped(),
            fix_queue_depth: self.fix_queue_depth(),
            geofences,
            inside,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub fixes_total: u64,
    pub fixes_per_sec: f64,
    pub fixes_stale: u64,
    pub fixes_invalid: u64,
    pub fixes_filtered: u64,
    pub fixes_dropped: u64,
    pub geofences_evaluated: u64,
    pub prefilter_skips: u64,
    pub avg_eval_latency_us: u64,
    pub max_eval_latency_us: u64,
    /// Evaluation latency histogram buckets
    /// Bounds: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub enters_total: u64,
    pub exits_total: u64,
    pub dwells_total: u64,
    pub duplicates_suppressed: u64,
    pub sink_failures: u64,
    pub events_dropped: u64,
    pub fix_queue_depth: u64,
    /// Registered geofences at report time
    pub geofences: usize,
    /// Geofences currently INSIDE or DWELL
    pub inside: usize,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            fixes_total = %self.fixes_total,
            fixes_per_sec = format!("{:.1}", self.fixes_per_sec),
            stale = %self.fixes_stale,
            invalid = %self.fixes_invalid,
            filtered = %self.fixes_filtered,
            dropped = %self.fixes_dropped,
            avg_latency_us = %self.avg_eval_latency_us,
            max_latency_us = %self.max_eval_latency_us,
            p50_us = %self.lat_p50_us,
            p95_us = %self.lat_p95_us,
            p99_us = %self.lat_p99_us,
            enters = %self.enters_total,
            exits = %self.exits_total,
            dwells = %self.dwells_total,
            duplicates = %self.duplicates_suppressed,
            sink_failures = %self.sink_failures,
            events_dropped = %self.events_dropped,
            queue_depth = %self.fix_queue_depth,
            geofences = %self.geofences,
            inside = %self.inside,
            "metrics"
        );
    }
}
