//! # Tracking Store
//!
//! The storage seam between the tracking components and whatever persists
//! their records. [`MemoryStore`] is the default implementation; the
//! `persistence` feature adds a SQLite one.
//!
//! ## Guarantees every implementation provides
//!
//! - Location samples are append-only and keep arrival order per trip.
//! - A trip has at most one open segment; completing a segment twice fails.
//! - [`TrackingStore::commit_transition`] applies a trip update and its
//!   segment close/open as one unit: either all of it is visible or none.
//! - Violations are only ever inserted or marked resolved once.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::error::{OptionExt, Result, TrackingError};
use crate::model::{
    AreaId, GeofenceViolation, LastKnownLocation, LocationSample, RestrictedArea, RouteSegment,
    SegmentClose, SegmentId, Trip, TripId, UserId, ViolationId,
};

/// Sample totals for one trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SampleCounts {
    pub total: usize,
    pub waypoints: usize,
}

/// A trip state change together with the segment bookkeeping it implies.
#[derive(Debug, Clone)]
pub struct TripTransition {
    pub trip: Trip,
    pub close: Option<(SegmentId, SegmentClose)>,
    pub open: Option<RouteSegment>,
}

/// Persistence seam for trips, telemetry, segments, areas and violations.
pub trait TrackingStore: Send + Sync {
    // Trips
    fn insert_trip(&self, trip: Trip) -> Result<Trip>;
    fn get_trip(&self, id: TripId) -> Result<Option<Trip>>;
    fn update_trip(&self, trip: &Trip) -> Result<()>;
    /// Trips with tracking currently active.
    fn active_trips(&self) -> Result<Vec<Trip>>;

    // Telemetry
    /// Append a sample, assigning its sequence number, and fold it into the
    /// trip's last known location.
    fn append_sample(&self, sample: LocationSample) -> Result<LocationSample>;
    /// Samples of a trip in arrival order, filtered to an inclusive
    /// timestamp range.
    fn samples_for_trip(
        &self,
        trip_id: TripId,
        from: Option<i64>,
        until: Option<i64>,
    ) -> Result<Vec<LocationSample>>;
    fn sample_counts(&self, trip_id: TripId) -> Result<SampleCounts>;
    fn last_known(&self, trip_id: TripId) -> Result<Option<LastKnownLocation>>;
    /// Last known locations for many trips in one call.
    fn last_known_many(&self, trip_ids: &[TripId]) -> Result<HashMap<TripId, LastKnownLocation>>;

    // Segments
    fn insert_segment(&self, segment: RouteSegment) -> Result<RouteSegment>;
    fn get_segment(&self, id: SegmentId) -> Result<Option<RouteSegment>>;
    fn open_segment(&self, trip_id: TripId) -> Result<Option<RouteSegment>>;
    /// Segments of a trip ordered by start time.
    fn segments_for_trip(&self, trip_id: TripId) -> Result<Vec<RouteSegment>>;
    fn complete_segment(&self, id: SegmentId, close: &SegmentClose) -> Result<RouteSegment>;
    /// Apply a trip update plus an optional segment close and open
    /// atomically. Returns the id of the opened segment, if any.
    fn commit_transition(&self, transition: TripTransition) -> Result<Option<SegmentId>>;

    // Restricted areas
    /// Insert when `area.id` is unassigned, update otherwise.
    fn save_area(&self, area: RestrictedArea) -> Result<RestrictedArea>;
    fn get_area(&self, id: AreaId) -> Result<Option<RestrictedArea>>;
    fn list_areas(&self) -> Result<Vec<RestrictedArea>>;
    fn delete_area(&self, id: AreaId) -> Result<bool>;

    // Violations
    fn insert_violation(&self, violation: GeofenceViolation) -> Result<GeofenceViolation>;
    fn get_violation(&self, id: ViolationId) -> Result<Option<GeofenceViolation>>;
    fn resolve_violation(
        &self,
        id: ViolationId,
        resolved_by: UserId,
        resolved_at: i64,
        notes: Option<String>,
    ) -> Result<GeofenceViolation>;
    /// Newest first.
    fn violations_for_user(&self, user_id: UserId) -> Result<Vec<GeofenceViolation>>;
    /// Newest first.
    fn violations_for_trip(&self, trip_id: TripId) -> Result<Vec<GeofenceViolation>>;
    /// Newest first.
    fn unresolved_violations(&self) -> Result<Vec<GeofenceViolation>>;
}

/// Checks shared by every store before a segment is completed.
pub(crate) fn check_segment_close(segment: &RouteSegment, close: &SegmentClose) -> Result<()> {
    if segment.is_completed {
        return Err(TrackingError::SegmentAlreadyCompleted {
            segment_id: segment.id.0,
        });
    }
    if close.end_timestamp < segment.start_timestamp {
        return Err(TrackingError::validation(format!(
            "segment {} cannot end at {} before it started at {}",
            segment.id, close.end_timestamp, segment.start_timestamp
        )));
    }
    Ok(())
}

pub(crate) fn apply_segment_close(segment: &mut RouteSegment, close: &SegmentClose) {
    segment.end_timestamp = Some(close.end_timestamp);
    segment.end_location = Some(close.end_location);
    segment.stats = close.stats;
    segment.is_completed = true;
}

fn newest_first(mut violations: Vec<GeofenceViolation>) -> Vec<GeofenceViolation> {
    violations.sort_by(|a, b| b.detected_at.cmp(&a.detected_at).then(b.id.cmp(&a.id)));
    violations
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
struct TripLog {
    samples: Vec<LocationSample>,
    last_known: Option<LastKnownLocation>,
}

/// Thread-safe in-memory [`TrackingStore`].
///
/// Telemetry is kept in one log per trip behind its own mutex; the map of
/// logs is only write-locked when a trip logs its first sample, so ingestion
/// for different trips never contends.
#[derive(Debug)]
pub struct MemoryStore {
    trips: RwLock<BTreeMap<TripId, Trip>>,
    logs: RwLock<HashMap<TripId, Arc<Mutex<TripLog>>>>,
    segments: RwLock<BTreeMap<SegmentId, RouteSegment>>,
    areas: RwLock<BTreeMap<AreaId, RestrictedArea>>,
    violations: RwLock<BTreeMap<ViolationId, GeofenceViolation>>,
    next_trip: AtomicI64,
    next_segment: AtomicI64,
    next_area: AtomicI64,
    next_violation: AtomicI64,
    next_seq: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| TrackingError::storage("store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| TrackingError::storage("store lock poisoned"))
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| TrackingError::storage("trip log lock poisoned"))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            trips: RwLock::new(BTreeMap::new()),
            logs: RwLock::new(HashMap::new()),
            segments: RwLock::new(BTreeMap::new()),
            areas: RwLock::new(BTreeMap::new()),
            violations: RwLock::new(BTreeMap::new()),
            next_trip: AtomicI64::new(1),
            next_segment: AtomicI64::new(1),
            next_area: AtomicI64::new(1),
            next_violation: AtomicI64::new(1),
            next_seq: AtomicI64::new(1),
        }
    }

    fn existing_log(&self, trip_id: TripId) -> Result<Option<Arc<Mutex<TripLog>>>> {
        Ok(read(&self.logs)?.get(&trip_id).cloned())
    }

    fn log_for(&self, trip_id: TripId) -> Result<Arc<Mutex<TripLog>>> {
        if let Some(log) = self.existing_log(trip_id)? {
            return Ok(log);
        }
        let mut logs = write(&self.logs)?;
        Ok(Arc::clone(logs.entry(trip_id).or_default()))
    }

    fn violations_where(
        &self,
        pred: impl Fn(&GeofenceViolation) -> bool,
    ) -> Result<Vec<GeofenceViolation>> {
        let found = read(&self.violations)?
            .values()
            .filter(|v| pred(v))
            .cloned()
            .collect();
        Ok(newest_first(found))
    }
}

fn open_segment_in(
    segments: &BTreeMap<SegmentId, RouteSegment>,
    trip_id: TripId,
) -> Option<&RouteSegment> {
    segments
        .values()
        .find(|s| s.trip_id == trip_id && !s.is_completed)
}

impl TrackingStore for MemoryStore {
    fn insert_trip(&self, mut trip: Trip) -> Result<Trip> {
        trip.id = TripId(self.next_trip.fetch_add(1, Ordering::SeqCst));
        write(&self.trips)?.insert(trip.id, trip.clone());
        Ok(trip)
    }

    fn get_trip(&self, id: TripId) -> Result<Option<Trip>> {
        Ok(read(&self.trips)?.get(&id).cloned())
    }

    fn update_trip(&self, trip: &Trip) -> Result<()> {
        let mut trips = write(&self.trips)?;
        let slot = trips.get_mut(&trip.id).or_not_found("trip", trip.id.0)?;
        *slot = trip.clone();
        Ok(())
    }

    fn active_trips(&self) -> Result<Vec<Trip>> {
        Ok(read(&self.trips)?
            .values()
            .filter(|t| t.tracking_active)
            .cloned()
            .collect())
    }

    fn append_sample(&self, mut sample: LocationSample) -> Result<LocationSample> {
        let log = self.log_for(sample.trip_id)?;
        let mut log = lock(&log)?;
        sample.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        log.last_known = Some(LastKnownLocation::merged(log.last_known.take(), &sample));
        log.samples.push(sample.clone());
        Ok(sample)
    }

    fn samples_for_trip(
        &self,
        trip_id: TripId,
        from: Option<i64>,
        until: Option<i64>,
    ) -> Result<Vec<LocationSample>> {
        let Some(log) = self.existing_log(trip_id)? else {
            return Ok(Vec::new());
        };
        let log = lock(&log)?;
        Ok(log
            .samples
            .iter()
            .filter(|s| from.is_none_or(|f| s.timestamp >= f))
            .filter(|s| until.is_none_or(|u| s.timestamp <= u))
            .cloned()
            .collect())
    }

    fn sample_counts(&self, trip_id: TripId) -> Result<SampleCounts> {
        let Some(log) = self.existing_log(trip_id)? else {
            return Ok(SampleCounts::default());
        };
        let log = lock(&log)?;
        Ok(SampleCounts {
            total: log.samples.len(),
            waypoints: log.samples.iter().filter(|s| s.is_waypoint).count(),
        })
    }

    fn last_known(&self, trip_id: TripId) -> Result<Option<LastKnownLocation>> {
        match self.existing_log(trip_id)? {
            Some(log) => Ok(lock(&log)?.last_known.clone()),
            None => Ok(None),
        }
    }

    fn last_known_many(&self, trip_ids: &[TripId]) -> Result<HashMap<TripId, LastKnownLocation>> {
        let logs = read(&self.logs)?;
        let mut result = HashMap::with_capacity(trip_ids.len());
        for id in trip_ids {
            if let Some(log) = logs.get(id) {
                if let Some(row) = lock(log)?.last_known.clone() {
                    result.insert(*id, row);
                }
            }
        }
        Ok(result)
    }

    fn insert_segment(&self, mut segment: RouteSegment) -> Result<RouteSegment> {
        let mut segments = write(&self.segments)?;
        if let Some(open) = open_segment_in(&segments, segment.trip_id) {
            return Err(TrackingError::SegmentAlreadyOpen {
                trip_id: segment.trip_id.0,
                segment_id: open.id.0,
            });
        }
        segment.id = SegmentId(self.next_segment.fetch_add(1, Ordering::SeqCst));
        segments.insert(segment.id, segment.clone());
        Ok(segment)
    }

    fn get_segment(&self, id: SegmentId) -> Result<Option<RouteSegment>> {
        Ok(read(&self.segments)?.get(&id).cloned())
    }

    fn open_segment(&self, trip_id: TripId) -> Result<Option<RouteSegment>> {
        Ok(open_segment_in(&*read(&self.segments)?, trip_id).cloned())
    }

    fn segments_for_trip(&self, trip_id: TripId) -> Result<Vec<RouteSegment>> {
        let mut found: Vec<RouteSegment> = read(&self.segments)?
            .values()
            .filter(|s| s.trip_id == trip_id)
            .cloned()
            .collect();
        found.sort_by_key(|s| (s.start_timestamp, s.id));
        Ok(found)
    }

    fn complete_segment(&self, id: SegmentId, close: &SegmentClose) -> Result<RouteSegment> {
        let mut segments = write(&self.segments)?;
        let segment = segments.get_mut(&id).or_not_found("segment", id.0)?;
        check_segment_close(segment, close)?;
        apply_segment_close(segment, close);
        Ok(segment.clone())
    }

    fn commit_transition(&self, transition: TripTransition) -> Result<Option<SegmentId>> {
        // Lock order: segments, then trips
        let mut segments = write(&self.segments)?;
        let mut trips = write(&self.trips)?;

        let trip_id = transition.trip.id;
        if !trips.contains_key(&trip_id) {
            return Err(TrackingError::NotFound {
                entity: "trip",
                id: trip_id.0,
            });
        }

        let closing = transition.close.as_ref().map(|(id, _)| *id);
        if let Some((id, close)) = &transition.close {
            let segment = segments.get(id).or_not_found("segment", id.0)?;
            check_segment_close(segment, close)?;
        }
        if let Some(open) = &transition.open {
            let other_open = segments
                .values()
                .find(|s| s.trip_id == open.trip_id && !s.is_completed && Some(s.id) != closing);
            if let Some(other) = other_open {
                return Err(TrackingError::SegmentAlreadyOpen {
                    trip_id: open.trip_id.0,
                    segment_id: other.id.0,
                });
            }
        }

        // Validated; apply everything
        if let Some((id, close)) = &transition.close {
            if let Some(segment) = segments.get_mut(id) {
                apply_segment_close(segment, close);
            }
        }
        let opened = transition.open.map(|mut segment| {
            segment.id = SegmentId(self.next_segment.fetch_add(1, Ordering::SeqCst));
            let id = segment.id;
            segments.insert(id, segment);
            id
        });
        trips.insert(trip_id, transition.trip);

        Ok(opened)
    }

    fn save_area(&self, mut area: RestrictedArea) -> Result<RestrictedArea> {
        let mut areas = write(&self.areas)?;
        if area.id == AreaId::default() {
            area.id = AreaId(self.next_area.fetch_add(1, Ordering::SeqCst));
        } else if !areas.contains_key(&area.id) {
            return Err(TrackingError::NotFound {
                entity: "area",
                id: area.id.0,
            });
        }
        areas.insert(area.id, area.clone());
        Ok(area)
    }

    fn get_area(&self, id: AreaId) -> Result<Option<RestrictedArea>> {
        Ok(read(&self.areas)?.get(&id).cloned())
    }

    fn list_areas(&self) -> Result<Vec<RestrictedArea>> {
        Ok(read(&self.areas)?.values().cloned().collect())
    }

    fn delete_area(&self, id: AreaId) -> Result<bool> {
        Ok(write(&self.areas)?.remove(&id).is_some())
    }

    fn insert_violation(&self, mut violation: GeofenceViolation) -> Result<GeofenceViolation> {
        violation.id = ViolationId(self.next_violation.fetch_add(1, Ordering::SeqCst));
        write(&self.violations)?.insert(violation.id, violation.clone());
        Ok(violation)
    }

    fn get_violation(&self, id: ViolationId) -> Result<Option<GeofenceViolation>> {
        Ok(read(&self.violations)?.get(&id).cloned())
    }

    fn resolve_violation(
        &self,
        id: ViolationId,
        resolved_by: UserId,
        resolved_at: i64,
        notes: Option<String>,
    ) -> Result<GeofenceViolation> {
        let mut violations = write(&self.violations)?;
        let violation = violations.get_mut(&id).or_not_found("violation", id.0)?;
        if violation.is_resolved() {
            return Err(TrackingError::ViolationAlreadyResolved {
                violation_id: id.0,
            });
        }
        violation.resolved_at = Some(resolved_at);
        violation.resolved_by = Some(resolved_by);
        if notes.is_some() {
            violation.notes = notes;
        }
        Ok(violation.clone())
    }

    fn violations_for_user(&self, user_id: UserId) -> Result<Vec<GeofenceViolation>> {
        self.violations_where(|v| v.user_id == user_id)
    }

    fn violations_for_trip(&self, trip_id: TripId) -> Result<Vec<GeofenceViolation>> {
        self.violations_where(|v| v.trip_id == Some(trip_id))
    }

    fn unresolved_violations(&self) -> Result<Vec<GeofenceViolation>> {
        self.violations_where(|v| !v.is_resolved())
    }
}
