//! Event egress - writes committed geofence events to file
//!
//! Events are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::domain::types::GeofenceEvent;
use crate::services::dispatcher::EventSink;
use anyhow::Context;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Short-key line written per event
#[derive(Debug, Clone, Serialize)]
pub struct EventPayload<'a> {
    /// Site identifier
    pub site: &'a str,
    /// Event ID (UUIDv7)
    pub eid: &'a str,
    /// Geofence ID
    pub gid: &'a str,
    /// Event type (enter, exit, dwell_start)
    pub t: &'static str,
    /// Transition time (fix timestamp, epoch ms)
    pub ts: u64,
    /// Wall clock time of emission (epoch ms)
    pub emitted_at: u64,
    pub lat: f64,
    pub lng: f64,
    /// Fix accuracy (meters)
    pub acc: f64,
    /// Fix sequence number
    pub seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a serde_json::Value>,
}

impl<'a> EventPayload<'a> {
    pub fn new(site: &'a str, event: &'a GeofenceEvent) -> Self {
        Self {
            site,
            eid: &event.event_id,
            gid: event.geofence_id.as_str(),
            t: event.kind.as_str(),
            ts: event.timestamp_ms,
            emitted_at: event.emitted_at_ms,
            lat: event.fix.lat,
            lng: event.fix.lng,
            acc: event.fix.accuracy_m,
            seq: event.fix.sequence,
            data: event.data.as_ref(),
        }
    }
}

/// Egress writer for geofence events
pub struct EventEgress {
    file_path: String,
    site_id: String,
}

impl EventEgress {
    pub fn new(file_path: &str, site_id: &str) -> Self {
        info!(file_path = %file_path, site = %site_id, "egress_initialized");
        Self { file_path: file_path.to_string(), site_id: site_id.to_string() }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Write an event to the egress file
    pub fn write_event(&self, event: &GeofenceEvent) -> anyhow::Result<()> {
        let json = serde_json::to_string(&EventPayload::new(&self.site_id, event))
            .context("Failed to serialize event")?;
        self.append_line(&json)
            .with_context(|| format!("Failed to append to {}", self.file_path))?;

        debug!(
            event_id = %event.event_id,
            geofence_id = %event.geofence_id,
            kind = %event.kind.as_str(),
            "event_egressed"
        );
        Ok(())
    }

    /// Append a line to the egress file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl EventSink for EventEgress {
    fn name(&self) -> &str {
        "jsonl_egress"
    }

    fn deliver(&self, event: &GeofenceEvent) -> anyhow::Result<()> {
        self.write_event(event)
    }
}
