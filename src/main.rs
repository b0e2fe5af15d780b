//! Polygon geofence engine
//!
//! Replays location fixes against a set of polygon geofences and reports
//! ENTER, EXIT and DWELL_START transitions.
//!
//! Module structure:
//! - `domain/` - Core types (LocationFix, Polygon, GeofenceConfig, events)
//! - `io/` - External interfaces (fix source, JSONL egress, platform bridge)
//! - `services/` - Geometry, registry, evaluator, state machine, dispatcher
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use poly_geofence::infra::{Config, Metrics};
use poly_geofence::io::{start_fix_reader, EventEgress};
use poly_geofence::services::GeofenceService;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Polygon geofence engine
#[derive(Parser, Debug)]
#[command(name = "poly-geofence", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// JSONL fix source, `-` for stdin
    #[arg(short, long, default_value = "-")]
    fixes: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default: INFO, use RUST_LOG=debug for per-fix visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "poly-geofence starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        debounce_fixes = %config.engine().debounce_fixes,
        status_change_delay_ms = %config.engine().status_change_delay_ms,
        default_dwell_ms = %config.engine().default_dwell_ms,
        dedup_window_ms = %config.engine().dedup_window_ms,
        geofences = %config.geofences().len(),
        egress_enabled = %config.egress_enabled(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    let mut service = GeofenceService::new(&config, metrics.clone());
    service.load_geofences(config.geofences());

    if config.egress_enabled() {
        let egress = EventEgress::new(config.egress_file(), config.site_id());
        info!(file = %egress.file_path(), "event_egress_enabled");
        service.add_sink(Arc::new(egress));
    }

    // Start fix reader (file or stdin); closes the queue at EOF
    let (fix_sender, fix_rx) = service.fix_channel();
    let reader = start_fix_reader(&args.fixes, fix_sender, shutdown_rx.clone());

    // Start metrics reporter
    let handle = service.handle();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let diagnostics = handle.diagnostics();
            let summary = metrics.report(diagnostics.geofences, diagnostics.inside);
            summary.log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run pipeline - consumes fixes until the queue closes
    service.run(fix_rx, shutdown_rx).await;

    match reader.await {
        Ok(Ok(sent)) => info!(fixes = %sent, "fix_reader_finished"),
        Ok(Err(e)) => error!(error = %format!("{:#}", e), "fix_reader_failed"),
        Err(e) => error!(error = %e, "fix_reader_panicked"),
    }

    let diagnostics = service.handle().diagnostics();
    info!(
        fixes_processed = %diagnostics.fixes_processed,
        fixes_stale = %diagnostics.fixes_stale,
        fixes_invalid = %diagnostics.fixes_invalid,
        fixes_filtered = %diagnostics.fixes_filtered,
        events_total = %diagnostics.events_total,
        inside = %diagnostics.inside,
        "final_diagnostics"
    );
    service.teardown();

    info!("poly-geofence shutdown complete");
    Ok(())
}
