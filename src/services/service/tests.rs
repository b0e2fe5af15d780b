//! Tests for the GeofenceService pipeline

use super::*;
use crate::domain::geofence::GeofenceConfig;
use crate::domain::polygon::Polygon;
use crate::domain::types::{GeofenceStatus, LatLng};
use crate::services::geometry::offset_meters;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;

const ORIGIN: LatLng = LatLng::new(64.1466, -21.9426);

fn square(id: &str, x0: f64, y0: f64, size: f64) -> GeofenceConfig {
    let polygon = Polygon::from_local_meters(
        ORIGIN,
        &[(x0, y0), (x0, y0 + size), (x0 + size, y0 + size), (x0 + size, y0)],
    )
    .unwrap();
    GeofenceConfig::new(id, polygon)
}

fn square_10m(id: &str) -> GeofenceConfig {
    square(id, 0.0, 0.0, 10.0)
}

fn fix_at(x: f64, y: f64, ts: u64, seq: u64) -> LocationFix {
    LocationFix::at(offset_meters(ORIGIN, x, y), 1.0, ts, seq)
}

fn create_service() -> GeofenceService {
    create_service_with(EngineConfig::default())
}

fn create_service_with(engine: EngineConfig) -> GeofenceService {
    let config = Config::default().with_engine(engine);
    GeofenceService::new(&config, Arc::new(Metrics::new()))
}

fn kinds(events: &[GeofenceEvent]) -> Vec<TransitionKind> {
    events.iter().map(|e| e.kind).collect()
}

fn id(s: &str) -> GeofenceId {
    GeofenceId::from(s)
}

#[test]
fn test_square_enter_repeat_exit() {
    let mut service = create_service();
    service.handle().add_geofence(square_10m("square")).unwrap();

    let inside = fix_at(5.0, 5.0, 1_000, 1);
    let events = service.process_fix(inside.clone()).unwrap();
    assert_eq!(kinds(&events), vec![TransitionKind::Enter]);
    assert_eq!(events[0].geofence_id, id("square"));
    assert_eq!(events[0].timestamp_ms, 1_000);

    // Same fix again: nothing new
    let events = service.process_fix(inside).unwrap();
    assert!(events.is_empty());

    let events = service.process_fix(fix_at(50.0, 50.0, 3_000, 3)).unwrap();
    assert_eq!(kinds(&events), vec![TransitionKind::Exit]);

    let state = service.handle().get_state(&id("square")).unwrap();
    assert_eq!(state.status, GeofenceStatus::Outside);
    assert_eq!(state.last_transition_ms, Some(3_000));
}

#[test]
fn test_dwell_after_sixty_seconds_inside() {
    let mut service = create_service();
    service
        .handle()
        .add_geofence(square_10m("square").with_dwell(Duration::from_secs(60)))
        .unwrap();

    let mut all = Vec::new();
    for s in 0..=90u64 {
        for event in service.process_fix(fix_at(5.0, 5.0, s * 1_000, s + 1)).unwrap() {
            all.push((event.timestamp_ms, event.kind));
        }
    }

    assert_eq!(all, vec![(0, TransitionKind::Enter), (60_000, TransitionKind::DwellStart)]);
    let state = service.handle().get_state(&id("square")).unwrap();
    assert_eq!(state.status, GeofenceStatus::Dwell);
}

#[test]
fn test_stale_fix_rejected_and_state_untouched() {
    let mut service = create_service();
    let handle = service.handle();
    handle.add_geofence(square_10m("square")).unwrap();

    service.process_fix(fix_at(5.0, 5.0, 2_000, 2)).unwrap();
    let before = handle.get_state(&id("square")).unwrap();

    let err = service.process_fix(fix_at(50.0, 50.0, 1_000, 3)).unwrap_err();
    assert!(matches!(err, GeofenceError::StaleFix { timestamp_ms: 1_000, .. }));

    let after = handle.get_state(&id("square")).unwrap();
    assert_eq!(before, after);

    let diagnostics = handle.diagnostics();
    assert_eq!(diagnostics.fixes_stale, 1);
    assert_eq!(diagnostics.last_fix_timestamp_ms, Some(2_000));
    assert!(diagnostics.last_rejection.unwrap().contains("Stale fix"));
}

#[test]
fn test_invalid_fix_rejected() {
    let mut service = create_service();
    service.handle().add_geofence(square_10m("square")).unwrap();

    let fix = LocationFix::new(91.0, 0.0, 1.0, 1_000, 1);
    let err = service.process_fix(fix).unwrap_err();
    assert!(matches!(err, GeofenceError::InvalidFix { sequence: 1, .. }));

    let fix = LocationFix::new(64.0, -21.0, -1.0, 1_000, 2);
    assert!(service.process_fix(fix).is_err());

    let diagnostics = service.handle().diagnostics();
    assert_eq!(diagnostics.fixes_invalid, 2);
    assert_eq!(diagnostics.last_fix_sequence, None);
}

#[test]
fn test_two_vertex_polygon_leaves_registry_unchanged() {
    let service = create_service();
    let specs = vec![
        GeofenceSpec {
            id: "line".to_string(),
            vertices: vec![[64.0, -21.0], [64.001, -21.0]],
            responsiveness_m: None,
            dwell_ms: None,
            enabled: true,
            data: None,
        },
        GeofenceSpec {
            id: "triangle".to_string(),
            vertices: vec![[64.0, -21.0], [64.001, -21.0], [64.0, -21.001]],
            responsiveness_m: Some(5.0),
            dwell_ms: Some(30_000),
            enabled: true,
            data: None,
        },
    ];

    assert_eq!(service.load_geofences(&specs[..1]), 0);
    assert_eq!(service.registry().len(), 0);
    let diagnostics = service.handle().diagnostics();
    assert!(diagnostics.last_rejection.unwrap().contains("Invalid polygon"));

    assert_eq!(service.load_geofences(&specs), 1);
    let configs = service.handle().list();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].responsiveness_m, 5.0);
    assert_eq!(configs[0].dwell_ms(), 30_000);
}

#[test]
fn test_duplicate_and_missing_ids() {
    let service = create_service();
    let handle = service.handle();
    handle.add_geofence(square_10m("a")).unwrap();

    let err = handle.add_geofence(square_10m("a")).unwrap_err();
    assert!(matches!(err, GeofenceError::DuplicateId { .. }));

    let err = handle.remove_geofence(&id("missing")).unwrap_err();
    assert!(matches!(err, GeofenceError::NotFound { .. }));

    let err = handle.update_geofence(&id("missing"), square_10m("missing")).unwrap_err();
    assert!(matches!(err, GeofenceError::NotFound { .. }));

    assert!(matches!(handle.get_state(&id("missing")), Err(GeofenceError::NotFound { .. })));
    assert_eq!(handle.list().len(), 1);
}

#[test]
fn test_boundary_fix_does_not_exit() {
    let mut service = create_service();
    service.handle().add_geofence(square_10m("square")).unwrap();

    service.process_fix(fix_at(5.0, 5.0, 1_000, 1)).unwrap();

    // 2m outside, 5m accuracy: ambiguous, stays inside
    let mut noisy = fix_at(12.0, 5.0, 2_000, 2);
    noisy.accuracy_m = 5.0;
    assert!(service.process_fix(noisy).unwrap().is_empty());

    let mut clear = fix_at(30.0, 5.0, 3_000, 3);
    clear.accuracy_m = 5.0;
    assert_eq!(kinds(&service.process_fix(clear).unwrap()), vec![TransitionKind::Exit]);
}

#[test]
fn test_boundary_fix_does_not_enter() {
    let mut service = create_service();
    service.handle().add_geofence(square_10m("square")).unwrap();

    let mut noisy = fix_at(12.0, 5.0, 1_000, 1);
    noisy.accuracy_m = 5.0;
    assert!(service.process_fix(noisy).unwrap().is_empty());
    let state = service.handle().get_state(&id("square")).unwrap();
    assert_eq!(state.status, GeofenceStatus::Outside);
    assert!(state.last_distance_m.unwrap() > 1.9);
}

#[test]
fn test_responsiveness_suppresses_exit() {
    let mut service = create_service();
    service
        .handle()
        .add_geofence(square_10m("square").with_responsiveness_m(20.0))
        .unwrap();

    service.process_fix(fix_at(5.0, 5.0, 1_000, 1)).unwrap();
    assert!(service.process_fix(fix_at(25.0, 5.0, 2_000, 2)).unwrap().is_empty());
    assert_eq!(
        kinds(&service.process_fix(fix_at(40.0, 5.0, 3_000, 3)).unwrap()),
        vec![TransitionKind::Exit]
    );
}

#[test]
fn test_debounce_from_config() {
    let mut service =
        create_service_with(EngineConfig { debounce_fixes: 2, ..EngineConfig::default() });
    service.handle().add_geofence(square_10m("square")).unwrap();

    assert!(service.process_fix(fix_at(5.0, 5.0, 1_000, 1)).unwrap().is_empty());
    assert_eq!(
        kinds(&service.process_fix(fix_at(5.0, 5.0, 2_000, 2)).unwrap()),
        vec![TransitionKind::Enter]
    );
}

#[test]
fn test_replayed_fix_does_not_count_towards_debounce() {
    let mut service =
        create_service_with(EngineConfig { debounce_fixes: 2, ..EngineConfig::default() });
    let handle = service.handle();
    handle.add_geofence(square_10m("square")).unwrap();

    let noisy = fix_at(5.0, 5.0, 1_000, 1);
    assert!(service.process_fix(noisy.clone()).unwrap().is_empty());
    assert!(service.process_fix(noisy).unwrap().is_empty());

    let state = handle.get_state(&id("square")).unwrap();
    assert_eq!(state.status, GeofenceStatus::Outside);
    assert_eq!(state.pending_count, 1);
    assert_eq!(handle.diagnostics().fixes_filtered, 1);

    // A genuinely new fix completes the debounce
    assert_eq!(
        kinds(&service.process_fix(fix_at(5.0, 5.0, 2_000, 2)).unwrap()),
        vec![TransitionKind::Enter]
    );
}

#[test]
fn test_full_subscriber_counts_one_drop_per_event() {
    let mut service = create_service();
    let handle = service.handle();
    handle.add_geofence(square_10m("square")).unwrap();
    let mut rx = service.subscribe(1);

    // ENTER fills the channel, EXIT finds it full
    service.process_fix(fix_at(5.0, 5.0, 1_000, 1)).unwrap();
    let events = service.process_fix(fix_at(50.0, 5.0, 2_000, 2)).unwrap();
    assert_eq!(kinds(&events), vec![TransitionKind::Exit]);

    let diagnostics = handle.diagnostics();
    assert_eq!(diagnostics.events_dropped, 1);
    assert_eq!(diagnostics.sink_failures, 1);
    assert_eq!(diagnostics.events_total, 2);

    assert_eq!(rx.try_recv().unwrap().kind, TransitionKind::Enter);
    assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
}

#[test]
fn test_pause_and_resume() {
    let mut service = create_service();
    let handle = service.handle();
    handle.add_geofence(square_10m("square")).unwrap();

    handle.pause();
    assert!(handle.is_paused());
    assert!(service.process_fix(fix_at(5.0, 5.0, 1_000, 1)).unwrap().is_empty());
    assert_eq!(handle.get_state(&id("square")).unwrap().status, GeofenceStatus::Outside);

    handle.resume();
    assert!(!handle.is_paused());
    assert_eq!(
        kinds(&service.process_fix(fix_at(5.0, 5.0, 2_000, 2)).unwrap()),
        vec![TransitionKind::Enter]
    );
    assert_eq!(handle.diagnostics().fixes_filtered, 1);
}

#[test]
fn test_mock_locations_filtered_unless_allowed() {
    let mut service = create_service();
    service.handle().add_geofence(square_10m("square")).unwrap();
    assert!(service.process_fix(fix_at(5.0, 5.0, 1_000, 1).mocked()).unwrap().is_empty());
    // Filtered fixes don't advance the cursor
    assert_eq!(service.handle().diagnostics().last_fix_sequence, None);

    let mut permissive =
        create_service_with(EngineConfig { allow_mock_locations: true, ..EngineConfig::default() });
    permissive.handle().add_geofence(square_10m("square")).unwrap();
    assert_eq!(
        kinds(&permissive.process_fix(fix_at(5.0, 5.0, 1_000, 1).mocked()).unwrap()),
        vec![TransitionKind::Enter]
    );
}

#[test]
fn test_inaccurate_fixes_filtered() {
    let mut service =
        create_service_with(EngineConfig { max_accuracy_m: 50.0, ..EngineConfig::default() });
    service.handle().add_geofence(square_10m("square")).unwrap();

    let mut coarse = fix_at(5.0, 5.0, 1_000, 1);
    coarse.accuracy_m = 120.0;
    assert!(service.process_fix(coarse).unwrap().is_empty());
    assert_eq!(service.handle().diagnostics().fixes_filtered, 1);

    assert_eq!(
        kinds(&service.process_fix(fix_at(5.0, 5.0, 2_000, 2)).unwrap()),
        vec![TransitionKind::Enter]
    );
}

#[test]
fn test_update_resets_state_without_exit() {
    let mut service = create_service();
    let handle = service.handle();
    handle.add_geofence(square_10m("square")).unwrap();
    service.process_fix(fix_at(5.0, 5.0, 1_000, 1)).unwrap();

    handle.update_geofence(&id("square"), square("square", 0.0, 0.0, 20.0)).unwrap();
    assert_eq!(handle.get_state(&id("square")).unwrap(), GeofenceState::new());

    // Still inside the new outline: a fresh visit starts
    assert_eq!(
        kinds(&service.process_fix(fix_at(15.0, 15.0, 2_000, 2)).unwrap()),
        vec![TransitionKind::Enter]
    );
}

#[test]
fn test_removed_geofence_emits_nothing() {
    let mut service = create_service();
    let handle = service.handle();
    handle.add_geofence(square_10m("square")).unwrap();
    service.process_fix(fix_at(5.0, 5.0, 1_000, 1)).unwrap();

    handle.remove_geofence(&id("square")).unwrap();
    assert!(service.process_fix(fix_at(50.0, 50.0, 2_000, 2)).unwrap().is_empty());
    assert!(handle.list().is_empty());
}

#[test]
fn test_disabled_geofence_emits_nothing() {
    let mut service = create_service();
    service.handle().add_geofence(square_10m("square").with_enabled(false)).unwrap();
    assert!(service.process_fix(fix_at(5.0, 5.0, 1_000, 1)).unwrap().is_empty());
    assert_eq!(service.handle().diagnostics().enabled, 0);
}

#[test]
fn test_overlapping_geofences_each_emit() {
    let mut service = create_service();
    let handle = service.handle();
    handle.add_geofence(square("a", 0.0, 0.0, 10.0)).unwrap();
    handle.add_geofence(square("b", 5.0, 5.0, 10.0)).unwrap();
    handle.add_geofence(square("far", 500.0, 500.0, 10.0)).unwrap();

    let events = service.process_fix(fix_at(7.0, 7.0, 1_000, 1)).unwrap();
    let ids: Vec<&str> = events.iter().map(|e| e.geofence_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(handle.diagnostics().inside, 2);
}

#[test]
fn test_event_carries_geofence_data() {
    let mut service = create_service();
    service
        .handle()
        .add_geofence(square_10m("shop").with_data(serde_json::json!({ "name": "Bakery" })))
        .unwrap();

    let events = service.process_fix(fix_at(5.0, 5.0, 1_000, 1)).unwrap();
    assert_eq!(events[0].data.as_ref().unwrap()["name"], "Bakery");
    assert_eq!(events[0].fix.sequence, 1);
}

#[test]
fn test_visit_sequence_alternates() {
    let mut service = create_service();
    service
        .handle()
        .add_geofence(square_10m("square").with_dwell(Duration::from_secs(20)))
        .unwrap();

    // Walk in and out with long stays inside
    let path: Vec<(f64, f64)> = (0..60)
        .map(|i| if (i / 10) % 2 == 0 { (5.0, 5.0) } else { (40.0, 5.0) })
        .collect();

    let mut all = Vec::new();
    for (i, (x, y)) in path.into_iter().enumerate() {
        let i = i as u64;
        let events = service.process_fix(fix_at(x, y, i * 5_000, i)).unwrap();
        all.extend(events.into_iter().map(|e| e.kind));
    }

    let enter_exit: Vec<TransitionKind> =
        all.iter().copied().filter(|k| *k != TransitionKind::DwellStart).collect();
    assert_eq!(enter_exit.first(), Some(&TransitionKind::Enter));
    for pair in enter_exit.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }

    // One DWELL_START per visit, always between ENTER and EXIT
    let mut inside = false;
    let mut dwelled = false;
    for kind in all {
        match kind {
            TransitionKind::Enter => {
                inside = true;
                dwelled = false;
            }
            TransitionKind::DwellStart => {
                assert!(inside && !dwelled);
                dwelled = true;
            }
            TransitionKind::Exit => inside = false,
        }
    }
}

#[test]
fn test_subscribers_and_observers() {
    let mut service = create_service();
    service.handle().add_geofence(square_10m("square")).unwrap();

    let mut rx = service.subscribe(8);
    let callback_count = Arc::new(AtomicUsize::new(0));
    let counter = callback_count.clone();
    service.on_geofence_event("counter", move |_event| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    let fixes_seen = Arc::new(AtomicUsize::new(0));
    let observed = fixes_seen.clone();
    service.on_location_change(move |_fix| {
        observed.fetch_add(1, Ordering::Relaxed);
    });

    service.process_fix(fix_at(5.0, 5.0, 1_000, 1)).unwrap();
    service.process_fix(fix_at(5.0, 6.0, 2_000, 2)).unwrap();
    service.process_fix(fix_at(50.0, 5.0, 3_000, 3)).unwrap();

    assert_eq!(rx.try_recv().unwrap().kind, TransitionKind::Enter);
    assert_eq!(rx.try_recv().unwrap().kind, TransitionKind::Exit);
    assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(callback_count.load(Ordering::Relaxed), 2);
    assert_eq!(fixes_seen.load(Ordering::Relaxed), 3);
}

#[test]
fn test_teardown_clears_everything() {
    let mut service = create_service();
    let handle = service.handle();
    handle.add_geofence(square_10m("a")).unwrap();
    handle.add_geofence(square("b", 20.0, 0.0, 10.0)).unwrap();
    let mut rx = service.subscribe(4);

    assert_eq!(service.teardown(), 2);
    assert!(handle.list().is_empty());

    // Sinks were dropped with the dispatcher's references
    assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Disconnected);
    assert_eq!(handle.clear_all(), 0);
}

#[test]
fn test_attach_bridge() {
    #[derive(Default)]
    struct TestBridge {
        sender: parking_lot::Mutex<Option<FixSender>>,
        delivered: parking_lot::Mutex<Vec<TransitionKind>>,
    }

    impl PlatformBridge for TestBridge {
        fn register_location_sink(&self, sender: FixSender) {
            *self.sender.lock() = Some(sender);
        }

        fn deliver_event(&self, event: &GeofenceEvent) -> anyhow::Result<()> {
            self.delivered.lock().push(event.kind);
            Ok(())
        }
    }

    let mut service = create_service();
    service.handle().add_geofence(square_10m("square")).unwrap();
    let bridge = Arc::new(TestBridge::default());
    let mut fix_rx = service.attach_bridge(bridge.clone());

    let sender = bridge.sender.lock().clone().unwrap();
    assert!(sender.push(fix_at(5.0, 5.0, 1_000, 1)));

    let fix = fix_rx.try_recv().unwrap();
    service.process_fix(fix).unwrap();
    assert_eq!(*bridge.delivered.lock(), vec![TransitionKind::Enter]);
}

#[tokio::test]
async fn test_run_drains_queue_until_closed() {
    let mut service = create_service();
    let handle = service.handle();
    handle.add_geofence(square_10m("square")).unwrap();
    let mut events = service.subscribe(16);

    let (sender, fix_rx) = service.fix_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    sender.send(fix_at(5.0, 5.0, 1_000, 1)).await.unwrap();
    // Stale and invalid fixes don't stop the loop
    sender.send(fix_at(5.0, 5.0, 500, 2)).await.unwrap();
    sender.send(LocationFix::new(f64::NAN, 0.0, 1.0, 2_000, 3)).await.unwrap();
    sender.send(fix_at(50.0, 5.0, 3_000, 4)).await.unwrap();
    drop(sender);

    service.run(fix_rx, shutdown_rx).await;

    assert_eq!(events.recv().await.unwrap().kind, TransitionKind::Enter);
    assert_eq!(events.recv().await.unwrap().kind, TransitionKind::Exit);

    let diagnostics = handle.diagnostics();
    // Queue fully drained
    assert_eq!(diagnostics.fix_queue_depth, 0);
    assert_eq!(diagnostics.fixes_processed, 2);
    assert_eq!(diagnostics.fixes_stale, 1);
    assert_eq!(diagnostics.fixes_invalid, 1);
    assert_eq!(diagnostics.events_total, 2);
    assert_eq!(diagnostics.last_fix_sequence, Some(4));
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let mut service = create_service();
    let (_sender, fix_rx) = service.fix_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        service.run(fix_rx, shutdown_rx).await;
        service
    });

    shutdown_tx.send(true).unwrap();
    let service = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert_eq!(service.handle().diagnostics().fixes_processed, 0);
}

#[test]
fn test_handle_is_usable_from_other_threads() {
    let mut service = create_service();
    let handle = service.handle();

    let writer = {
        let handle = handle.clone();
        std::thread::spawn(move || {
            for i in 0..20 {
                let geofence = square(&format!("g{}", i), i as f64 * 30.0, 0.0, 10.0);
                handle.add_geofence(geofence).unwrap();
            }
        })
    };

    for seq in 0..50u64 {
        service.process_fix(fix_at(5.0, 5.0, seq * 1_000, seq)).unwrap();
    }
    writer.join().unwrap();

    assert_eq!(handle.list().len(), 20);

    // Every geofence is registered now; the position is only inside g0
    service.process_fix(fix_at(5.0, 5.0, 50_000, 50)).unwrap();
    let g0 = handle.get_state(&id("g0")).unwrap();
    assert_eq!(g0.status, GeofenceStatus::Inside);
    assert_eq!(g0.last_evaluated_ms, Some(50_000));
    let g1 = handle.get_state(&id("g1")).unwrap();
    assert_eq!(g1.status, GeofenceStatus::Outside);
    assert_eq!(g1.last_evaluated_ms, Some(50_000));
    assert_eq!(handle.diagnostics().inside, 1);
}
