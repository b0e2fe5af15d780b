//! Platform bridge - the seam between the engine and the host platform
//!
//! The host pushes fixes through a [`FixSender`] and receives committed
//! events through [`PlatformBridge::deliver_event`]. Permission handling,
//! background lifecycle and message serialisation stay on the host side.

use crate::domain::types::{GeofenceEvent, LocationFix};
use crate::infra::metrics::Metrics;
use crate::services::dispatcher::EventSink;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// Capabilities the host platform provides
pub trait PlatformBridge: Send + Sync {
    /// Hand the platform a sender for location updates
    fn register_location_sink(&self, sender: FixSender);

    /// Forward a committed event to the platform
    fn deliver_event(&self, event: &GeofenceEvent) -> anyhow::Result<()>;
}

/// Producer side of the fix queue
///
/// Clone this to share across producers. `push` never blocks: when the
/// queue is full the fix is dropped and counted.
#[derive(Clone)]
pub struct FixSender {
    tx: mpsc::Sender<LocationFix>,
    metrics: Option<Arc<Metrics>>,
    last_drop_warn: Arc<parking_lot::Mutex<Instant>>,
}

impl FixSender {
    pub fn new(tx: mpsc::Sender<LocationFix>, metrics: Option<Arc<Metrics>>) -> Self {
        let long_ago =
            Instant::now().checked_sub(Duration::from_secs(2)).unwrap_or_else(Instant::now);
        Self { tx, metrics, last_drop_warn: Arc::new(parking_lot::Mutex::new(long_ago)) }
    }

    /// Enqueue without waiting; returns false if the fix was dropped
    pub fn push(&self, fix: LocationFix) -> bool {
        let seq = fix.sequence;
        match self.tx.try_send(fix) {
            Ok(()) => {
                self.update_depth();
                true
            }
            Err(TrySendError::Full(_)) => {
                if let Some(ref metrics) = self.metrics {
                    metrics.record_fix_dropped();
                }
                // Rate-limit warning to 1 per second
                let mut last = self.last_drop_warn.lock();
                if last.elapsed() > Duration::from_secs(1) {
                    warn!(seq = %seq, "fix_dropped: queue full");
                    *last = Instant::now();
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(seq = %seq, "fix_queue_closed");
                false
            }
        }
    }

    /// Enqueue, waiting for capacity
    pub async fn send(&self, fix: LocationFix) -> anyhow::Result<()> {
        self.tx
            .send(fix)
            .await
            .map_err(|e| anyhow::anyhow!("fix queue closed (seq {})", e.0.sequence))?;
        self.update_depth();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn update_depth(&self) {
        if let Some(ref metrics) = self.metrics {
            let depth = self.tx.max_capacity() - self.tx.capacity();
            metrics.set_fix_queue_depth(depth as u64);
        }
    }
}

/// Create a bounded fix queue
pub fn create_fix_channel(
    capacity: usize,
    metrics: Option<Arc<Metrics>>,
) -> (FixSender, mpsc::Receiver<LocationFix>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FixSender::new(tx, metrics), rx)
}

/// Event sink forwarding to a [`PlatformBridge`]
pub struct BridgeSink {
    bridge: Arc<dyn PlatformBridge>,
}

impl BridgeSink {
    pub fn new(bridge: Arc<dyn PlatformBridge>) -> Self {
        Self { bridge }
    }
}

impl EventSink for BridgeSink {
    fn name(&self) -> &str {
        "platform_bridge"
    }

    fn deliver(&self, event: &GeofenceEvent) -> anyhow::Result<()> {
        self.bridge.deliver_event(event)
    }
}
