//! Fix source - replays JSONL location fixes into the fix queue
//!
//! One `LocationFix` JSON object per line. The fix time is either
//! `timestamp_ms` (epoch ms) or `time` (RFC 3339). Blank lines and lines
//! starting with `#` are skipped; malformed lines are logged and skipped.

use crate::domain::types::LocationFix;
use crate::io::bridge::FixSender;
use anyhow::Context;
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Wire shape of a fix line
#[derive(Debug, Deserialize)]
struct FixLine {
    lat: f64,
    lng: f64,
    #[serde(default)]
    accuracy_m: f64,
    timestamp_ms: Option<u64>,
    time: Option<String>,
    sequence: u64,
    #[serde(default)]
    is_mock: bool,
    #[serde(default)]
    speed_mps: Option<f64>,
}

/// Parse "2026-01-05T16:41:30.048+00:00" (RFC 3339) to epoch ms
fn parse_iso_time(time_str: &str) -> Option<u64> {
    OffsetDateTime::parse(time_str, &Rfc3339)
        .ok()
        .and_then(|dt| u64::try_from(dt.unix_timestamp_nanos() / 1_000_000).ok())
}

/// Parse one line; `Ok(None)` for blank and comment lines
pub fn parse_fix_line(line: &str) -> anyhow::Result<Option<LocationFix>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let raw: FixLine = serde_json::from_str(line).context("Failed to parse fix")?;

    let timestamp_ms = match (raw.timestamp_ms, raw.time.as_deref()) {
        (Some(ts), _) => ts,
        (None, Some(t)) => {
            parse_iso_time(t).with_context(|| format!("Invalid fix time {:?}", t))?
        }
        (None, None) => anyhow::bail!("Fix has neither timestamp_ms nor time"),
    };

    let mut fix = LocationFix::new(raw.lat, raw.lng, raw.accuracy_m, timestamp_ms, raw.sequence);
    fix.is_mock = raw.is_mock;
    fix.speed_mps = raw.speed_mps;
    Ok(Some(fix))
}

/// Read fixes until EOF or shutdown, waiting for queue capacity
///
/// Returns the number of fixes enqueued.
pub async fn replay_fixes<R>(
    reader: R,
    sender: FixSender,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    let mut sent = 0usize;

    loop {
        let line = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(sent = %sent, "fix_replay_shutdown");
                    break;
                }
                continue;
            }
            line = lines.next_line() => line.context("Failed to read fix line")?,
        };

        let Some(line) = line else {
            break;
        };
        line_no += 1;

        match parse_fix_line(&line) {
            Ok(Some(fix)) => {
                sender.send(fix).await?;
                sent += 1;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(line_no = %line_no, error = %format!("{:#}", e), "fix_line_skipped");
            }
        }
    }

    debug!(lines = %line_no, sent = %sent, "fix_replay_finished");
    Ok(sent)
}

/// Spawn a reader for `source`: a file path, or `-` for stdin
pub fn start_fix_reader(
    source: &str,
    sender: FixSender,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<anyhow::Result<usize>> {
    let source = source.to_string();
    tokio::spawn(async move {
        info!(source = %source, "fix_reader_started");
        if source == "-" {
            replay_fixes(BufReader::new(tokio::io::stdin()), sender, shutdown).await
        } else {
            let file = tokio::fs::File::open(&source)
                .await
                .with_context(|| format!("Failed to open fix source {}", source))?;
            replay_fixes(BufReader::new(file), sender, shutdown).await
        }
    })
}
