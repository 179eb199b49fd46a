//! # Route Segments
//!
//! Opens and closes the legs of a trip and derives their statistics from the
//! telemetry recorded during each leg.
//!
//! ## Statistics
//!
//! On close, samples with `start_timestamp <= t <= now` are sorted by their
//! caller-supplied timestamp (arrival order does not matter, so late uploads
//! land in the right leg). Re-ingested copies of a sample, same timestamp
//! and coordinate, are counted once. Distance is the sum of great-circle
//! distances between consecutive samples. Speed is only computed for pairs
//! whose time delta is strictly positive; the average is the mean of those
//! pair speeds and the maximum is the largest. A leg with no samples gets
//! all-zero statistics.

use std::collections::HashSet;
use std::sync::Arc;

use crate::collaborators::Clock;
use crate::error::{OptionExt, Result, TrackingError};
use crate::geometry::haversine_distance;
use crate::model::{
    LocationSample, RouteSegment, SegmentClose, SegmentId, SegmentStats, TripId,
};
use crate::store::TrackingStore;
use crate::GpsPoint;

/// Hotel to destination or trek start.
pub const SEGMENT_OUTBOUND: &str = "outbound";
/// Trek start to trek end.
pub const SEGMENT_TREK: &str = "trek";
/// Back to the hotel.
pub const SEGMENT_RETURN: &str = "return";

/// Derive leg statistics from samples.
///
/// `samples` may be in any order and may contain samples outside
/// `[start, end]`; those are ignored.
pub fn compute_segment_stats(samples: &[LocationSample], start: i64, end: i64) -> SegmentStats {
    let mut window: Vec<&LocationSample> = samples
        .iter()
        .filter(|s| s.timestamp >= start && s.timestamp <= end)
        .collect();
    if window.is_empty() {
        return SegmentStats::default();
    }

    window.sort_by_key(|s| (s.timestamp, s.seq));
    // First copy of each observation wins, wherever its re-uploads landed
    let mut seen = HashSet::with_capacity(window.len());
    window.retain(|s| seen.insert(observation_key(s)));

    let mut total_distance = 0.0;
    let mut speeds = Vec::with_capacity(window.len());
    for pair in window.windows(2) {
        let distance = haversine_distance(&pair[0].location, &pair[1].location);
        total_distance += distance;

        let dt = pair[1].timestamp - pair[0].timestamp;
        if dt > 0 {
            speeds.push(distance / dt as f64);
        }
    }

    let (avg_speed, max_speed) = if speeds.is_empty() {
        (0.0, 0.0)
    } else {
        (
            speeds.iter().sum::<f64>() / speeds.len() as f64,
            speeds.iter().copied().fold(0.0, f64::max),
        )
    };

    SegmentStats {
        total_distance_meters: total_distance,
        duration_seconds: end - start,
        avg_speed_mps: avg_speed,
        max_speed_mps: max_speed,
        sample_count: window.len(),
    }
}

/// Identity of an observation: timestamp plus exact coordinate bits.
fn observation_key(sample: &LocationSample) -> (i64, u64, u64) {
    (
        sample.timestamp,
        sample.location.latitude.to_bits(),
        sample.location.longitude.to_bits(),
    )
}

/// Opens and closes route segments.
pub struct SegmentTracker {
    store: Arc<dyn TrackingStore>,
    clock: Arc<dyn Clock>,
}

impl SegmentTracker {
    pub fn new(store: Arc<dyn TrackingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Open a new leg starting now. Fails if the trip already has one open.
    pub fn open(
        &self,
        trip_id: TripId,
        segment_type: &str,
        start: GpsPoint,
        path_ref: Option<String>,
    ) -> Result<SegmentId> {
        check_point(&start)?;
        self.store
            .get_trip(trip_id)?
            .or_not_found("trip", trip_id.0)?;

        let segment = self.store.insert_segment(RouteSegment::open(
            trip_id,
            segment_type,
            start,
            self.clock.now(),
            path_ref,
        ))?;
        log::debug!(
            "[SegmentTracker] Opened {} segment {} for trip {}",
            segment.segment_type,
            segment.id,
            trip_id
        );
        Ok(segment.id)
    }

    /// Close a leg at `end` and freeze its statistics.
    pub fn close(&self, segment_id: SegmentId, end: GpsPoint) -> Result<SegmentStats> {
        let segment = self
            .store
            .get_segment(segment_id)?
            .or_not_found("segment", segment_id.0)?;
        let close = self.prepare_close(&segment, end)?;
        let closed = self.store.complete_segment(segment_id, &close)?;
        Ok(closed.stats)
    }

    /// Compute the end fields for `segment` without writing them.
    pub fn prepare_close(&self, segment: &RouteSegment, end: GpsPoint) -> Result<SegmentClose> {
        check_point(&end)?;
        if segment.is_completed {
            return Err(TrackingError::SegmentAlreadyCompleted {
                segment_id: segment.id.0,
            });
        }

        let end_timestamp = self.clock.now().max(segment.start_timestamp);
        let samples = self.store.samples_for_trip(
            segment.trip_id,
            Some(segment.start_timestamp),
            Some(end_timestamp),
        )?;
        let stats = compute_segment_stats(&samples, segment.start_timestamp, end_timestamp);

        log::debug!(
            "[SegmentTracker] Closing {} segment {}: {:.0} m over {} s from {} samples",
            segment.segment_type,
            segment.id,
            stats.total_distance_meters,
            stats.duration_seconds,
            stats.sample_count
        );

        Ok(SegmentClose {
            end_timestamp,
            end_location: end,
            stats,
        })
    }

    pub fn open_segment(&self, trip_id: TripId) -> Result<Option<RouteSegment>> {
        self.store.open_segment(trip_id)
    }

    pub fn segments_for_trip(&self, trip_id: TripId) -> Result<Vec<RouteSegment>> {
        self.store.segments_for_trip(trip_id)
    }
}

fn check_point(point: &GpsPoint) -> Result<()> {
    if point.is_valid() {
        Ok(())
    } else {
        Err(TrackingError::validation(format!(
            "coordinate ({}, {}) is out of range",
            point.latitude, point.longitude
        )))
    }
}
