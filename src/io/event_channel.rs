//! Typed channel for event subscribers
//!
//! Provides a non-blocking way to hand events to async consumers.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::types::GeofenceEvent;
use crate::services::dispatcher::{EventSink, SinkFull};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Event sink feeding a bounded channel
///
/// A full channel fails the delivery with [`SinkFull`], so the dispatcher's
/// retry, failure and drop accounting apply to slow subscribers too.
pub struct ChannelSink {
    name: String,
    tx: mpsc::Sender<GeofenceEvent>,
}

impl ChannelSink {
    pub fn new(name: &str, tx: mpsc::Sender<GeofenceEvent>) -> Self {
        Self { name: name.to_string(), tx }
    }
}

impl EventSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &GeofenceEvent) -> anyhow::Result<()> {
        match self.tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SinkFull { name: self.name.clone() }.into()),
            Err(TrySendError::Closed(_)) => anyhow::bail!("subscriber channel closed"),
        }
    }
}

/// Create a new subscriber channel pair
///
/// Buffer size determines how many events can be queued.
pub fn create_event_channel(buffer_size: usize) -> (ChannelSink, mpsc::Receiver<GeofenceEvent>) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (ChannelSink::new("subscriber", tx), rx)
}
