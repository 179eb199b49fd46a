//! Geofence evaluation through the engine: entries, approaches, isolation of
//! corrupt areas and the violation lifecycle.

use std::sync::Arc;

use trip_tracker::{
    AreaStatus, AreaType, GpsPoint, ManualClock, MemoryStore, RestrictedArea, Subject,
    TrackingEngine, TrackingError, TrackingStore, UserId, ViolationType,
};

fn square(lat: f64, lng: f64, half: f64) -> Vec<GpsPoint> {
    vec![
        GpsPoint::new(lat - half, lng - half),
        GpsPoint::new(lat - half, lng + half),
        GpsPoint::new(lat + half, lng + half),
        GpsPoint::new(lat + half, lng - half),
    ]
}

fn engine_at(now: i64) -> (TrackingEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = TrackingEngine::builder()
        .store(store.clone())
        .clock(Arc::new(ManualClock::new(now)))
        .build();
    (engine, store)
}

#[test]
fn test_entry_creates_violation_for_user() {
    let (engine, _) = engine_at(1_000);
    let area = engine
        .save_area(
            RestrictedArea::new("Rashtrapati Estate", AreaType::RestrictedZone, &square(28.6139, 77.2090, 0.005))
                .unwrap()
                .with_severity(4)
                .with_alerts(true, true),
        )
        .unwrap();

    let result = engine
        .evaluate_location(28.6139, 77.2090, Some(Subject::user(UserId(42))))
        .unwrap();

    assert!(result.is_restricted);
    assert_eq!(result.max_severity, 4);
    assert_eq!(result.areas.len(), 1);
    assert!(result.areas[0].auto_alert_authorities);
    assert_eq!(result.areas[0].distance_meters, 0.0);

    let violations = engine.violations_for_user(UserId(42)).unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].violation_type, ViolationType::Entry);
    assert_eq!(violations[0].user_id, UserId(42));
    assert_eq!(violations[0].area_id, area.id);
    assert_eq!(violations[0].trip_id, None);
}

#[test]
fn test_anonymous_check_records_nothing() {
    let (engine, store) = engine_at(1_000);
    engine
        .save_area(RestrictedArea::new("Depot", AreaType::MilitaryZone, &square(0.0, 0.0, 0.01)).unwrap())
        .unwrap();

    let result = engine.evaluate_location(0.0, 0.0, None).unwrap();
    assert!(result.is_restricted);
    assert!(result.violations.is_empty());
    assert!(store.unresolved_violations().unwrap().is_empty());
}

#[test]
fn test_far_point_is_not_restricted() {
    let (engine, _) = engine_at(1_000);
    engine
        .save_area(RestrictedArea::new("Depot", AreaType::MilitaryZone, &square(0.0, 0.0, 0.01)).unwrap())
        .unwrap();

    let result = engine
        .evaluate_location(1.0, 1.0, Some(Subject::user(UserId(1))))
        .unwrap();
    assert!(!result.is_restricted);
    assert!(result.areas.is_empty());
    assert!(result.warnings.is_empty());
    assert_eq!(result.max_severity, 0);
}

#[test]
fn test_buffer_controls_approach_warning() {
    let (engine, _) = engine_at(1_000);
    engine
        .save_area(
            RestrictedArea::new("Nest", AreaType::ProtectedArea, &square(0.0, 0.0, 0.01))
                .unwrap()
                .with_buffer(Some(500.0)),
        )
        .unwrap();

    // About 222 m outside the northern edge
    let near = engine.evaluate_location(0.012, 0.0, None).unwrap();
    assert!(!near.is_restricted);
    assert_eq!(
        near.warnings,
        vec!["Warning: You are approaching a restricted protected area: Nest".to_string()]
    );
    let distance = near.areas[0].distance_meters;
    assert!((distance - 222.4).abs() < 1.0, "distance was {distance}");

    // About 1.1 km out, beyond the buffer
    let far = engine.evaluate_location(0.02, 0.0, None).unwrap();
    assert!(far.areas.is_empty());
}

#[test]
fn test_corrupt_area_does_not_hide_valid_areas() {
    let (engine, store) = engine_at(1_000);
    let mut broken = RestrictedArea::new("Broken", AreaType::DangerZone, &square(0.0, 0.0, 0.01))
        .unwrap()
        .with_severity(5);
    // Bowtie written behind the engine's back
    broken.boundary = vec![
        GpsPoint::new(0.0, 0.0),
        GpsPoint::new(0.02, 0.02),
        GpsPoint::new(0.0, 0.02),
        GpsPoint::new(0.01, 0.0),
    ];
    store.save_area(broken.clone()).unwrap();
    assert!(matches!(
        engine.save_area(broken),
        Err(TrackingError::Geometry { .. })
    ));

    engine
        .save_area(
            RestrictedArea::new("Quarry", AreaType::DangerZone, &square(0.0, 0.0, 0.01))
                .unwrap()
                .with_severity(2),
        )
        .unwrap();

    let result = engine.evaluate_location(0.0, 0.0, None).unwrap();
    assert!(result.is_restricted);
    assert_eq!(result.areas.len(), 1);
    assert_eq!(result.areas[0].name, "Quarry");
}

#[test]
fn test_disabled_and_expired_areas_are_skipped() {
    let (engine, _) = engine_at(10_000);
    let ring = square(0.0, 0.0, 0.01);
    engine
        .save_area(
            RestrictedArea::new("Closed trail", AreaType::SeasonalClosure, &ring)
                .unwrap()
                .with_status(AreaStatus::Inactive),
        )
        .unwrap();
    engine
        .save_area(
            RestrictedArea::new("Monsoon closure", AreaType::SeasonalClosure, &ring)
                .unwrap()
                .with_window(Some(1_000), Some(5_000)),
        )
        .unwrap();

    let result = engine.evaluate_location(0.0, 0.0, None).unwrap();
    assert!(!result.is_restricted);
    assert!(result.areas.is_empty());
}

#[test]
fn test_routing_export_lists_areas_in_force() {
    let (engine, _) = engine_at(10_000);
    let open = square(30.0, 79.0, 0.02);
    engine
        .save_area(RestrictedArea::new("Border post", AreaType::MilitaryZone, &open).unwrap())
        .unwrap();
    engine
        .save_area(
            RestrictedArea::new("Monsoon closure", AreaType::SeasonalClosure, &square(0.0, 0.0, 0.01))
                .unwrap()
                .with_window(Some(1_000), Some(5_000)),
        )
        .unwrap();

    let polygons = engine.active_areas_for_routing().unwrap();
    assert_eq!(polygons.len(), 1);
    assert_eq!(polygons[0].vertices(), open.as_slice());
}

#[test]
fn test_resolving_violation() {
    let (engine, _) = engine_at(1_000);
    engine
        .save_area(RestrictedArea::new("Depot", AreaType::MilitaryZone, &square(0.0, 0.0, 0.01)).unwrap())
        .unwrap();
    engine
        .evaluate_location(0.0, 0.0, Some(Subject::user(UserId(3))))
        .unwrap();

    let open = engine.unresolved_violations().unwrap();
    assert_eq!(open.len(), 1);

    let resolved = engine
        .resolve_violation(open[0].id, UserId(900), Some("guided out".into()))
        .unwrap();
    assert_eq!(resolved.resolved_by, Some(UserId(900)));
    assert_eq!(resolved.resolved_at, Some(1_000));
    assert_eq!(resolved.notes.as_deref(), Some("guided out"));
    assert!(engine.unresolved_violations().unwrap().is_empty());

    assert!(matches!(
        engine.resolve_violation(open[0].id, UserId(900), None),
        Err(TrackingError::ViolationAlreadyResolved { .. })
    ));
}

#[test]
fn test_area_validation() {
    let (engine, _) = engine_at(1_000);
    let area = RestrictedArea::new("Range", AreaType::MilitaryZone, &square(0.0, 0.0, 0.01)).unwrap();

    assert!(engine.save_area(area.clone().with_severity(6)).is_err());
    assert!(engine.save_area(area.clone().with_buffer(Some(-1.0))).is_err());
    assert!(engine
        .save_area(area.clone().with_window(Some(5_000), Some(1_000)))
        .is_err());

    let mut unnamed = area.clone();
    unnamed.name = "  ".into();
    assert!(engine.save_area(unnamed).is_err());

    assert!(engine.list_areas().unwrap().is_empty());

    // Too few vertices never becomes an area
    assert!(RestrictedArea::new(
        "Line",
        AreaType::DangerZone,
        &[GpsPoint::new(0.0, 0.0), GpsPoint::new(0.0, 1.0)]
    )
    .is_err());
}
