//! # Tracking Engine
//!
//! Wires the store, clock and collaborators into the tracking components and
//! exposes every operation hosts call: trip assignment, telemetry
//! ingestion, geofence checks, workflow buttons, statistics and violation
//! management.
//!
//! The engine is internally synchronized; share it behind an `Arc` or use
//! the process-wide [`ENGINE`].

use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;

use crate::collaborators::{
    AcceptAllDevices, Clock, DeviceRegistry, ItineraryProvider, NoItinerary, NoTrekPaths,
    SystemClock, TrekPathProvider,
};
use crate::config::TrackingConfig;
use crate::error::{OptionExt, Result, TrackingError};
use crate::geofence::{GeofenceEvaluator, GeofenceResult, Subject};
use crate::geometry::Polygon;
use crate::model::{
    AreaId, DayPlan, GeofenceViolation, LocationSample, Phase, RestrictedArea, RouteSegment,
    SegmentId, SegmentStats, Trip, TripId, UserId, ViolationId,
};
use crate::segments::SegmentTracker;
use crate::stats::{ActiveTripSnapshot, TripStatsAggregator, TripTrackingStats};
use crate::store::{MemoryStore, TrackingStore};
use crate::telemetry::{BatchIngestReport, LiveUpdate, SampleAck, SampleInput, TelemetryIngestor};
use crate::workflow::{
    CancelOutcome, CompleteDayOutcome, EndTrekOutcome, LinkDeviceOutcome, ReturnOutcome,
    StartDay, StartDayOutcome, StartTrekOutcome, TripPhaseController, TripStatusView,
    VisitingOutcome,
};
use crate::GpsPoint;

// ============================================================================
// Builder
// ============================================================================

/// Configures a [`TrackingEngine`]. Anything not set gets an in-memory or
/// permissive default.
pub struct TrackingEngineBuilder {
    config: TrackingConfig,
    store: Option<Arc<dyn TrackingStore>>,
    clock: Arc<dyn Clock>,
    devices: Arc<dyn DeviceRegistry>,
    trek_paths: Arc<dyn TrekPathProvider>,
    itinerary: Arc<dyn ItineraryProvider>,
}

impl Default for TrackingEngineBuilder {
    fn default() -> Self {
        Self {
            config: TrackingConfig::default(),
            store: None,
            clock: Arc::new(SystemClock),
            devices: Arc::new(AcceptAllDevices),
            trek_paths: Arc::new(NoTrekPaths),
            itinerary: Arc::new(NoItinerary),
        }
    }
}

impl TrackingEngineBuilder {
    pub fn config(mut self, config: TrackingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn TrackingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn devices(mut self, devices: Arc<dyn DeviceRegistry>) -> Self {
        self.devices = devices;
        self
    }

    pub fn trek_paths(mut self, trek_paths: Arc<dyn TrekPathProvider>) -> Self {
        self.trek_paths = trek_paths;
        self
    }

    pub fn itinerary(mut self, itinerary: Arc<dyn ItineraryProvider>) -> Self {
        self.itinerary = itinerary;
        self
    }

    pub fn build(self) -> TrackingEngine {
        let store: Arc<dyn TrackingStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let clock = self.clock;

        TrackingEngine {
            ingestor: TelemetryIngestor::new(Arc::clone(&store), self.config.max_batch_size),
            evaluator: GeofenceEvaluator::new(Arc::clone(&store), Arc::clone(&clock), &self.config),
            controller: TripPhaseController::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                self.devices,
                self.trek_paths,
                self.itinerary,
            ),
            segments: SegmentTracker::new(Arc::clone(&store), Arc::clone(&clock)),
            stats: TripStatsAggregator::new(Arc::clone(&store), Arc::clone(&clock)),
            config: self.config,
            store,
            clock,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Facade over all tracking components.
pub struct TrackingEngine {
    config: TrackingConfig,
    store: Arc<dyn TrackingStore>,
    clock: Arc<dyn Clock>,
    ingestor: TelemetryIngestor,
    evaluator: GeofenceEvaluator,
    controller: TripPhaseController,
    segments: SegmentTracker,
    stats: TripStatsAggregator,
}

impl TrackingEngine {
    pub fn builder() -> TrackingEngineBuilder {
        TrackingEngineBuilder::default()
    }

    /// Engine over a fresh [`MemoryStore`] with default collaborators.
    pub fn in_memory() -> Self {
        Self::builder().build()
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Trips
    // ------------------------------------------------------------------

    /// Create an ASSIGNED trip from an approved day plan.
    pub fn assign_trip(&self, user_id: UserId, plan: &DayPlan) -> Result<Trip> {
        for (what, place) in [("hotel", &plan.hotel), ("target", &plan.target)] {
            if !place.location.is_valid() {
                return Err(TrackingError::validation(format!(
                    "{what} '{}' has an invalid coordinate",
                    place.name
                )));
            }
        }
        let trip = self
            .store
            .insert_trip(Trip::from_plan(user_id, plan, self.clock.now()))?;
        log::info!(
            "[TrackingEngine] Assigned {} trip {} to user {}",
            trip.trip_type(),
            trip.id,
            user_id
        );
        Ok(trip)
    }

    pub fn get_trip(&self, trip_id: TripId) -> Result<Trip> {
        self.store.get_trip(trip_id)?.or_not_found("trip", trip_id.0)
    }

    // ------------------------------------------------------------------
    // Telemetry
    // ------------------------------------------------------------------

    pub fn ingest_batch(
        &self,
        trip_id: TripId,
        user_id: UserId,
        samples: &[SampleInput],
        phase_tag: Option<Phase>,
        notes: Option<&str>,
    ) -> Result<BatchIngestReport> {
        let report = self
            .ingestor
            .ingest_batch(trip_id, user_id, samples, phase_tag, notes)?;
        if self.config.evaluate_geofences_on_ingest {
            for sample in &report.stored {
                self.evaluate_stored(sample);
            }
        }
        Ok(report)
    }

    pub fn ingest_live(&self, update: &LiveUpdate) -> Result<SampleAck> {
        let (stored, ack) = self.ingestor.ingest_live_stored(update)?;
        if self.config.evaluate_geofences_on_ingest {
            self.evaluate_stored(&stored);
        }
        Ok(ack)
    }

    /// Post-ingest geofence check. The sample is already stored, so a
    /// failure here is logged rather than returned.
    fn evaluate_stored(&self, sample: &LocationSample) {
        let subject = Subject::on_trip(sample.user_id, sample.trip_id);
        if let Err(e) = self
            .evaluator
            .evaluate(sample.location, sample.timestamp, Some(subject))
        {
            log::error!(
                "[TrackingEngine] Geofence check failed for trip {} sample {}: {}",
                sample.trip_id,
                sample.seq,
                e
            );
        }
    }

    // ------------------------------------------------------------------
    // Geofencing
    // ------------------------------------------------------------------

    /// Check a coordinate against the areas in force now.
    pub fn evaluate_location(
        &self,
        latitude: f64,
        longitude: f64,
        subject: Option<Subject>,
    ) -> Result<GeofenceResult> {
        self.evaluator.evaluate(
            GpsPoint::new(latitude, longitude),
            self.clock.now(),
            subject,
        )
    }

    /// Create or update a restricted area after full validation.
    pub fn save_area(&self, area: RestrictedArea) -> Result<RestrictedArea> {
        area.validate()?;
        let saved = self.store.save_area(area)?;
        self.evaluator.invalidate();
        log::info!(
            "[TrackingEngine] Saved restricted area {} '{}'",
            saved.id,
            saved.name
        );
        Ok(saved)
    }

    pub fn delete_area(&self, area_id: AreaId) -> Result<bool> {
        let removed = self.store.delete_area(area_id)?;
        if removed {
            self.evaluator.invalidate();
        }
        Ok(removed)
    }

    pub fn get_area(&self, area_id: AreaId) -> Result<RestrictedArea> {
        self.store.get_area(area_id)?.or_not_found("area", area_id.0)
    }

    pub fn list_areas(&self) -> Result<Vec<RestrictedArea>> {
        self.store.list_areas()
    }

    /// Drop cached areas after out-of-band edits to the store.
    pub fn refresh_areas(&self) {
        self.evaluator.invalidate();
    }

    pub fn resolve_violation(
        &self,
        violation_id: ViolationId,
        resolved_by: UserId,
        notes: Option<String>,
    ) -> Result<GeofenceViolation> {
        self.evaluator
            .resolve_violation(violation_id, resolved_by, notes)
    }

    pub fn violations_for_user(&self, user_id: UserId) -> Result<Vec<GeofenceViolation>> {
        self.evaluator.violations_for_user(user_id)
    }

    pub fn violations_for_trip(&self, trip_id: TripId) -> Result<Vec<GeofenceViolation>> {
        self.evaluator.violations_for_trip(trip_id)
    }

    pub fn unresolved_violations(&self) -> Result<Vec<GeofenceViolation>> {
        self.evaluator.unresolved_violations()
    }

    /// Polygons of the areas in force now, for route planning.
    pub fn active_areas_for_routing(&self) -> Result<Vec<Polygon>> {
        self.evaluator.active_areas_for_routing(self.clock.now())
    }

    // ------------------------------------------------------------------
    // Workflow
    // ------------------------------------------------------------------

    pub fn start_day(&self, trip_id: TripId, request: StartDay) -> Result<StartDayOutcome> {
        self.controller.start_day(trip_id, request)
    }

    pub fn start_day_from_itinerary(&self, trip_id: TripId) -> Result<StartDayOutcome> {
        self.controller.start_day_from_itinerary(trip_id)
    }

    pub fn set_visiting(&self, trip_id: TripId) -> Result<VisitingOutcome> {
        self.controller.set_visiting(trip_id)
    }

    pub fn link_device(&self, trip_id: TripId, device_id: &str) -> Result<LinkDeviceOutcome> {
        self.controller.link_device(trip_id, device_id)
    }

    pub fn start_trek(&self, trip_id: TripId, device_id: &str) -> Result<StartTrekOutcome> {
        self.controller.start_trek(trip_id, device_id)
    }

    pub fn end_trek(&self, trip_id: TripId, end: GpsPoint) -> Result<EndTrekOutcome> {
        self.controller.end_trek(trip_id, end)
    }

    pub fn request_return(&self, trip_id: TripId, current: GpsPoint) -> Result<ReturnOutcome> {
        self.controller.request_return(trip_id, current)
    }

    pub fn complete_day(&self, trip_id: TripId) -> Result<CompleteDayOutcome> {
        self.controller.complete_day(trip_id)
    }

    pub fn cancel(&self, trip_id: TripId, reason: Option<String>) -> Result<CancelOutcome> {
        self.controller.cancel(trip_id, reason)
    }

    pub fn get_trip_status(&self, trip_id: TripId) -> Result<TripStatusView> {
        self.controller.current_status(trip_id)
    }

    // ------------------------------------------------------------------
    // Segments and statistics
    // ------------------------------------------------------------------

    pub fn segments_for_trip(&self, trip_id: TripId) -> Result<Vec<RouteSegment>> {
        self.segments.segments_for_trip(trip_id)
    }

    /// Open a custom leg outside the workflow buttons.
    pub fn open_segment(
        &self,
        trip_id: TripId,
        segment_type: &str,
        start: GpsPoint,
        path_ref: Option<String>,
    ) -> Result<SegmentId> {
        self.controller.locks().with_trip(trip_id, || {
            self.segments.open(trip_id, segment_type, start, path_ref)
        })
    }

    pub fn close_segment(&self, segment_id: SegmentId, end: GpsPoint) -> Result<SegmentStats> {
        let segment = self
            .store
            .get_segment(segment_id)?
            .or_not_found("segment", segment_id.0)?;
        self.controller
            .locks()
            .with_trip(segment.trip_id, || self.segments.close(segment_id, end))
    }

    pub fn get_trip_stats(&self, trip_id: TripId) -> Result<TripTrackingStats> {
        self.stats.trip_stats(trip_id)
    }

    pub fn get_active_trips_snapshot(&self) -> Result<Vec<ActiveTripSnapshot>> {
        self.stats.active_trips_snapshot()
    }
}

// ============================================================================
// Global engine
// ============================================================================

/// Process-wide engine for hosts that want a singleton.
pub static ENGINE: Lazy<RwLock<Arc<TrackingEngine>>> =
    Lazy::new(|| RwLock::new(Arc::new(TrackingEngine::in_memory())));

/// Replace the global engine, e.g. with one backed by SQLite.
pub fn install_engine(engine: TrackingEngine) {
    let mut slot = ENGINE.write().unwrap_or_else(PoisonError::into_inner);
    *slot = Arc::new(engine);
}

/// Run `f` against the global engine.
///
/// The global lock is only held long enough to clone the handle, so calls
/// for different trips proceed in parallel.
pub fn with_engine<F, R>(f: F) -> R
where
    F: FnOnce(&TrackingEngine) -> R,
{
    let engine = Arc::clone(&ENGINE.read().unwrap_or_else(PoisonError::into_inner));
    f(&engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ManualClock;
    use crate::model::{AreaType, ViolationType};
    use crate::NamedLocation;

    fn square(lat: f64, lng: f64, half: f64) -> Vec<GpsPoint> {
        vec![
            GpsPoint::new(lat - half, lng - half),
            GpsPoint::new(lat - half, lng + half),
            GpsPoint::new(lat + half, lng + half),
            GpsPoint::new(lat + half, lng - half),
        ]
    }

    fn tour() -> DayPlan {
        DayPlan::tour(
            NamedLocation::new("Hotel", GpsPoint::new(12.97, 77.59)),
            NamedLocation::new("Palace", GpsPoint::new(12.99, 77.61)),
        )
    }

    #[test]
    fn test_assign_rejects_invalid_plan() {
        let engine = TrackingEngine::in_memory();
        let mut plan = tour();
        plan.target.location = GpsPoint::new(0.0, 200.0);
        assert!(matches!(
            engine.assign_trip(UserId(1), &plan),
            Err(TrackingError::Validation { .. })
        ));
    }

    #[test]
    fn test_save_area_validates_and_refreshes_cache() {
        let engine = TrackingEngine::builder()
            .clock(Arc::new(ManualClock::new(0)))
            .build();
        assert!(!engine.evaluate_location(0.0, 0.0, None).unwrap().is_restricted);

        let area = RestrictedArea::new("Range", AreaType::MilitaryZone, &square(0.0, 0.0, 0.01))
            .unwrap();
        assert!(engine.save_area(area.clone().with_severity(0)).is_err());
        let saved = engine.save_area(area).unwrap();

        // Visible immediately despite the cached snapshot
        assert!(engine.evaluate_location(0.0, 0.0, None).unwrap().is_restricted);

        assert!(engine.delete_area(saved.id).unwrap());
        assert!(!engine.evaluate_location(0.0, 0.0, None).unwrap().is_restricted);
    }

    #[test]
    fn test_geofences_on_ingest() {
        let config = TrackingConfig {
            evaluate_geofences_on_ingest: true,
            ..TrackingConfig::default()
        };
        let engine = TrackingEngine::builder()
            .config(config)
            .clock(Arc::new(ManualClock::new(1_000)))
            .build();
        engine
            .save_area(
                RestrictedArea::new("Palace grounds", AreaType::PrivateProperty, &square(12.99, 77.61, 0.001))
                    .unwrap()
                    .with_severity(3),
            )
            .unwrap();

        let plan = tour();
        let trip = engine.assign_trip(UserId(9), &plan).unwrap();
        engine.start_day(trip.id, StartDay::from_plan(&plan)).unwrap();
        let report = engine
            .ingest_batch(
                trip.id,
                UserId(9),
                &[
                    SampleInput::new(1_010, 12.98, 77.60),
                    SampleInput::new(1_020, 12.99, 77.61),
                ],
                None,
                None,
            )
            .unwrap();
        assert_eq!(report.accepted, 2);

        let violations = engine.violations_for_trip(trip.id).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].violation_type, ViolationType::Entry);
        assert_eq!(violations[0].detected_at, 1_020);
    }

    #[test]
    fn test_global_engine() {
        install_engine(TrackingEngine::in_memory());
        let trip = with_engine(|engine| engine.assign_trip(UserId(2), &tour())).unwrap();
        let status = with_engine(|engine| engine.get_trip_status(trip.id)).unwrap();
        assert_eq!(status.trip_id, trip.id);
    }
}
