//! End-to-end trip workflows through the engine facade.
//!
//! Each test drives a trip through its buttons with a manual clock so segment
//! windows and statistics are deterministic.

use std::sync::Arc;

use trip_tracker::{
    Action, DayPlan, GpsPoint, LocationSource, ManualClock, NamedLocation, Phase, SampleInput,
    StartDay, StaticDeviceRegistry, TourPhase, TrackingEngine, TrackingError, TrekPath,
    TrekPhase, TripKind, TripStatus, TripType, UserId, WorkflowResponse,
};

const TOURIST: UserId = UserId(11);

/// Degrees of latitude spanning `meters` on the haversine sphere.
fn lat_for(meters: f64) -> f64 {
    (meters / 6_371_008.8).to_degrees()
}

fn hotel() -> NamedLocation {
    NamedLocation::new("Riverside Hotel", GpsPoint::new(30.0, 79.0))
}

fn tour_plan() -> DayPlan {
    DayPlan::tour(
        NamedLocation::new("Hotel", GpsPoint::new(12.97, 77.59)),
        NamedLocation::new("Palace", GpsPoint::new(12.99, 77.61)),
    )
}

fn trek_plan() -> DayPlan {
    DayPlan::trek(
        hotel(),
        Some(4),
        NamedLocation::new("Trailhead", GpsPoint::new(30.05, 79.0)),
        Some(NamedLocation::new("Ridge", GpsPoint::new(30.1, 79.0))),
    )
}

fn engine(clock: &Arc<ManualClock>) -> TrackingEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    let paths = vec![TrekPath {
        id: 77,
        trek_id: 4,
        name: "Ridge Trail".into(),
        total_distance_meters: 5_500.0,
        estimated_duration_hours: 3.5,
        waypoints: serde_json::json!([[30.05, 79.0], [30.1, 79.0]]),
        safety_notes: Some("Carry water".into()),
    }];
    TrackingEngine::builder()
        .clock(clock.clone())
        .devices(Arc::new(StaticDeviceRegistry::new(["TRK-1", "TRK-2"])))
        .trek_paths(Arc::new(paths))
        .build()
}

/// Samples walking north from `start_lat`, one every `step_secs`, 100 m apart.
fn walk(from_ts: i64, to_ts: i64, step_secs: i64, start_lat: f64) -> Vec<SampleInput> {
    (0..=(to_ts - from_ts) / step_secs)
        .map(|i| {
            SampleInput::new(
                from_ts + i * step_secs,
                start_lat + lat_for(100.0 * i as f64),
                79.0,
            )
        })
        .collect()
}

#[test]
fn test_tour_day_start_opens_outbound_segment() {
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = engine(&clock);
    let plan = tour_plan();
    let trip = engine.assign_trip(TOURIST, &plan).unwrap();
    assert_eq!(trip.status, TripStatus::Assigned);

    let outcome = engine.start_day(trip.id, StartDay::from_plan(&plan)).unwrap();
    assert_eq!(outcome.trip.status, TripStatus::Started);
    assert_eq!(outcome.trip.phase(), Some(Phase::Tour(TourPhase::ToDestination)));
    assert_eq!(outcome.route_from.name, "Hotel");
    assert_eq!(outcome.route_to.name, "Palace");

    let segments = engine.segments_for_trip(trip.id).unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].segment_type, "outbound");
    assert!(!segments[0].is_completed);
    assert_eq!(segments[0].id, outcome.segment_id);

    let status = engine.get_trip_status(trip.id).unwrap();
    assert!(status.tracking_active);
    assert_eq!(status.available_actions, vec![Action::SetVisiting, Action::Cancel]);
}

#[test]
fn test_tour_day_full_cycle() {
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = engine(&clock);
    let plan = tour_plan();
    let trip = engine.assign_trip(TOURIST, &plan).unwrap();
    engine.start_day(trip.id, StartDay::from_plan(&plan)).unwrap();

    clock.set(1_600);
    let visiting = engine.set_visiting(trip.id).unwrap();
    assert_eq!(visiting.trip.phase(), Some(Phase::Tour(TourPhase::AtDestination)));
    assert_eq!(visiting.outbound.unwrap().duration_seconds, 600);

    clock.set(5_000);
    let back = engine
        .request_return(trip.id, GpsPoint::new(12.99, 77.61))
        .unwrap();
    assert_eq!(back.trip.status, TripStatus::Returning);
    assert_eq!(back.trip.phase(), Some(Phase::Tour(TourPhase::ToHotel)));
    assert_eq!(back.route_to.name, "Hotel");

    clock.set(6_200);
    let done = engine.complete_day(trip.id).unwrap();
    assert_eq!(done.trip.status, TripStatus::Completed);
    assert!(!done.trip.tracking_active);
    assert_eq!(done.trip.tracking_ended_at, Some(6_200));
    assert_eq!(done.stats.segments_completed, 2);
    assert_eq!(done.stats.total_duration_seconds, 600 + 1_200);

    // No samples were recorded, so the return leg ends at the hotel
    let segments = engine.segments_for_trip(trip.id).unwrap();
    assert_eq!(segments[1].end_location, Some(plan.hotel.location));
}

#[test]
fn test_start_trek_requires_linked_device() {
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = engine(&clock);
    let plan = trek_plan();
    let trip = engine.assign_trip(TOURIST, &plan).unwrap();
    engine.start_day(trip.id, StartDay::from_plan(&plan)).unwrap();
    engine.set_visiting(trip.id).unwrap();

    let result = engine.start_trek(trip.id, "TRK-1");
    assert!(matches!(
        result,
        Err(TrackingError::DeviceNotLinked { trip_id }) if trip_id == trip.id.0
    ));

    let status = engine.get_trip_status(trip.id).unwrap();
    assert_eq!(status.status, TripStatus::Visiting);
    assert_eq!(status.phase, Some(Phase::Trek(TrekPhase::ToTrekStart)));
    assert_eq!(status.available_actions, vec![Action::LinkDevice, Action::Cancel]);

    let response = WorkflowResponse::from(engine.start_trek(trip.id, "TRK-1"));
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["kind"], "device_not_linked");
}

#[test]
fn test_trek_day_full_cycle() {
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = engine(&clock);
    let plan = trek_plan();
    let trip = engine.assign_trip(TOURIST, &plan).unwrap();
    assert_eq!(trip.trip_type(), TripType::TrekDay);

    engine.start_day(trip.id, StartDay::from_plan(&plan)).unwrap();
    let report = engine
        .ingest_batch(trip.id, TOURIST, &walk(1_000, 1_600, 60, 30.0), None, None)
        .unwrap();
    assert_eq!(report.accepted, 11);

    clock.set(1_600);
    engine.set_visiting(trip.id).unwrap();
    clock.set(1_700);
    let linked = engine.link_device(trip.id, "TRK-2").unwrap();
    assert_eq!(linked.device.linked_at, 1_700);

    clock.set(1_800);
    let trek = engine.start_trek(trip.id, "TRK-2").unwrap();
    assert_eq!(trek.trip.phase(), Some(Phase::Trek(TrekPhase::TrekActive)));
    assert_eq!(trek.trek_path.as_ref().map(|p| p.id), Some(77));
    assert_eq!(trek.trek_end.as_ref().map(|e| e.name.as_str()), Some("Ridge"));

    let device_samples: Vec<SampleInput> = walk(1_800, 3_600, 60, 30.05)
        .into_iter()
        .map(|s| s.from_device("TRK-2"))
        .collect();
    let report = engine
        .ingest_batch(trip.id, TOURIST, &device_samples, None, Some("device upload"))
        .unwrap();
    assert!(report.is_complete());
    assert!(report
        .stored
        .iter()
        .all(|s| s.source == LocationSource::TrackingDevice
            && s.trip_phase == Some(Phase::Trek(TrekPhase::TrekActive))));

    clock.set(3_600);
    let ended = engine.end_trek(trip.id, GpsPoint::new(30.1, 79.0)).unwrap();
    assert_eq!(ended.trip.status, TripStatus::Returning);
    assert_eq!(ended.trip.phase(), Some(Phase::Trek(TrekPhase::FromTrekEnd)));
    match &ended.trip.kind {
        TripKind::Trek { trek_end, .. } => assert_eq!(
            trek_end,
            &Some(NamedLocation::new("Trek End", GpsPoint::new(30.1, 79.0)))
        ),
        other => panic!("expected a trek trip, got {other:?}"),
    }
    let trek_stats = ended.trek.unwrap();
    assert_eq!(trek_stats.duration_seconds, 1_800);
    assert_eq!(trek_stats.sample_count, 31);
    // 30 steps of 100 m, one per minute
    assert!((trek_stats.total_distance_meters - 3_000.0).abs() < 1.0);
    assert!((trek_stats.avg_speed_mps - 100.0 / 60.0).abs() < 0.01);

    clock.set(4_200);
    let done = engine.complete_day(trip.id).unwrap();
    assert_eq!(done.trip.status, TripStatus::Completed);
    assert!(!done.trip.tracking_active);

    let segments = engine.segments_for_trip(trip.id).unwrap();
    let kinds: Vec<&str> = segments.iter().map(|s| s.segment_type.as_str()).collect();
    assert_eq!(kinds, vec!["outbound", "trek", "return"]);
    assert!(segments.iter().all(|s| s.is_completed));
    assert_eq!(segments[1].path_ref.as_deref(), Some("77"));

    let stats = engine.get_trip_stats(trip.id).unwrap();
    assert_eq!(stats.segments_completed, 3);
    assert_eq!(stats.total_duration_seconds, 600 + 1_800 + 600);
    assert_eq!(stats.locations_recorded, 11 + 31);
    assert_eq!(stats.tracking_started_at, Some(1_000));
    assert_eq!(stats.tracking_ended_at, Some(4_200));

    // Tracking is off, so later samples are refused
    let late = engine
        .ingest_batch(trip.id, TOURIST, &[SampleInput::new(4_300, 30.0, 79.0)], None, None)
        .unwrap();
    assert!(matches!(
        late.rejected[0].reason,
        TrackingError::TrackingInactive { .. }
    ));
}

#[test]
fn test_invalid_transitions_leave_trip_unchanged() {
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = engine(&clock);
    let plan = tour_plan();
    let trip = engine.assign_trip(TOURIST, &plan).unwrap();

    assert!(matches!(
        engine.complete_day(trip.id),
        Err(TrackingError::InvalidTransition { operation: "complete_day", .. })
    ));
    assert!(matches!(
        engine.set_visiting(trip.id),
        Err(TrackingError::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine.link_device(trip.id, "TRK-1"),
        Err(TrackingError::InvalidTransition { .. })
    ));

    engine.start_day(trip.id, StartDay::from_plan(&plan)).unwrap();
    let before = engine.get_trip(trip.id).unwrap();
    let open_before = engine.store().open_segment(trip.id).unwrap();

    clock.set(2_000);
    assert!(engine.start_day(trip.id, StartDay::from_plan(&plan)).is_err());
    assert!(engine.request_return(trip.id, GpsPoint::new(12.98, 77.6)).is_err());
    assert!(engine.end_trek(trip.id, GpsPoint::new(12.98, 77.6)).is_err());

    assert_eq!(engine.get_trip(trip.id).unwrap(), before);
    assert_eq!(engine.store().open_segment(trip.id).unwrap(), open_before);
}

#[test]
fn test_start_day_from_itinerary() {
    let clock = Arc::new(ManualClock::new(1_000));
    let itinerary = |trip: &trip_tracker::Trip| {
        (trip.user_id == TOURIST).then(tour_plan)
    };
    let engine = TrackingEngine::builder()
        .clock(clock.clone())
        .itinerary(Arc::new(itinerary))
        .build();

    let ours = engine.assign_trip(TOURIST, &tour_plan()).unwrap();
    let outcome = engine.start_day_from_itinerary(ours.id).unwrap();
    assert_eq!(outcome.route_to.name, "Palace");

    let theirs = engine.assign_trip(UserId(99), &tour_plan()).unwrap();
    assert!(matches!(
        engine.start_day_from_itinerary(theirs.id),
        Err(TrackingError::NotFound { entity: "day plan", .. })
    ));
}

#[test]
fn test_cancel_mid_trek_closes_open_segment() {
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = engine(&clock);
    let plan = trek_plan();
    let trip = engine.assign_trip(TOURIST, &plan).unwrap();
    engine.start_day(trip.id, StartDay::from_plan(&plan)).unwrap();
    engine.set_visiting(trip.id).unwrap();
    engine.link_device(trip.id, "TRK-1").unwrap();
    engine.start_trek(trip.id, "TRK-1").unwrap();

    engine
        .ingest_batch(trip.id, TOURIST, &[SampleInput::new(1_050, 30.06, 79.0)], None, None)
        .unwrap();
    clock.set(1_100);
    let cancelled = engine
        .cancel(trip.id, Some("weather".to_string()))
        .unwrap();
    assert_eq!(cancelled.trip.status, TripStatus::Cancelled);
    assert_eq!(cancelled.trip.cancellation_reason.as_deref(), Some("weather"));
    assert!(cancelled.closed_segment.is_some());
    assert!(engine.store().open_segment(trip.id).unwrap().is_none());

    // The trek leg ends at the last known position
    let segments = engine.segments_for_trip(trip.id).unwrap();
    assert_eq!(segments.last().unwrap().end_location, Some(GpsPoint::new(30.06, 79.0)));

    assert!(engine.cancel(trip.id, None).is_err());
    assert!(engine.get_trip_status(trip.id).unwrap().available_actions.is_empty());
}

#[test]
fn test_concurrent_start_trek_succeeds_once() {
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = Arc::new(engine(&clock));
    let plan = trek_plan();
    let trip = engine.assign_trip(TOURIST, &plan).unwrap();
    engine.start_day(trip.id, StartDay::from_plan(&plan)).unwrap();
    engine.set_visiting(trip.id).unwrap();
    engine.link_device(trip.id, "TRK-1").unwrap();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                scope.spawn(move || engine.start_trek(trip.id, "TRK-1"))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, TrackingError::InvalidTransition { .. })));

    let trek_segments = engine
        .segments_for_trip(trip.id)
        .unwrap()
        .into_iter()
        .filter(|s| s.segment_type == "trek")
        .count();
    assert_eq!(trek_segments, 1);
}

#[test]
fn test_start_trek_rejects_other_device() {
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = engine(&clock);
    let plan = trek_plan();
    let trip = engine.assign_trip(TOURIST, &plan).unwrap();
    engine.start_day(trip.id, StartDay::from_plan(&plan)).unwrap();
    engine.link_device(trip.id, "TRK-1").unwrap();
    engine.set_visiting(trip.id).unwrap();

    assert!(matches!(
        engine.start_trek(trip.id, "TRK-2"),
        Err(TrackingError::DeviceMismatch { .. })
    ));
    assert!(matches!(
        engine.link_device(trip.id, "TRK-2"),
        Err(TrackingError::InvalidTransition { .. })
    ));
}
