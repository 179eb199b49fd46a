//! # Trip Statistics
//!
//! Read-only rollups over stored telemetry and segments, plus the snapshot
//! of every actively tracked trip used by admin monitoring.

use std::sync::Arc;

use serde::Serialize;

use crate::collaborators::{format_timestamp, Clock};
use crate::error::{OptionExt, Result};
use crate::model::{LastKnownLocation, Phase, Trip, TripId, TripStatus, TripType, UserId};
use crate::store::TrackingStore;

/// Totals for one trip. Distance and duration sum the closed segments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripTrackingStats {
    pub trip_id: TripId,
    pub status: TripStatus,
    pub locations_recorded: usize,
    pub waypoints_recorded: usize,
    pub segments_completed: usize,
    pub total_distance_meters: f64,
    pub total_duration_seconds: i64,
    /// Total distance over total duration
    pub avg_speed_mps: f64,
    /// Highest segment maximum
    pub max_speed_mps: f64,
    pub current_phase: Option<Phase>,
    pub tracking_started_at: Option<i64>,
    pub tracking_ended_at: Option<i64>,
}

/// One row of the admin monitoring view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveTripSnapshot {
    pub trip_id: TripId,
    pub user_id: UserId,
    pub trip_type: TripType,
    pub status: TripStatus,
    pub phase: Option<Phase>,
    pub linked_device: Option<String>,
    pub last_known_location: Option<LastKnownLocation>,
    /// RFC 3339 form of the last update
    pub last_update_at: Option<String>,
    pub minutes_since_last_update: Option<i64>,
    pub last_emergency_at: Option<i64>,
}

pub(crate) fn compute_trip_stats(store: &dyn TrackingStore, trip: &Trip) -> Result<TripTrackingStats> {
    let counts = store.sample_counts(trip.id)?;
    let segments = store.segments_for_trip(trip.id)?;

    let completed: Vec<_> = segments.iter().filter(|s| s.is_completed).collect();
    let total_distance: f64 = completed.iter().map(|s| s.stats.total_distance_meters).sum();
    let total_duration: i64 = completed.iter().map(|s| s.stats.duration_seconds).sum();
    let max_speed = completed
        .iter()
        .map(|s| s.stats.max_speed_mps)
        .fold(0.0, f64::max);
    let avg_speed = if total_duration > 0 {
        total_distance / total_duration as f64
    } else {
        0.0
    };

    Ok(TripTrackingStats {
        trip_id: trip.id,
        status: trip.status,
        locations_recorded: counts.total,
        waypoints_recorded: counts.waypoints,
        segments_completed: completed.len(),
        total_distance_meters: total_distance,
        total_duration_seconds: total_duration,
        avg_speed_mps: avg_speed,
        max_speed_mps: max_speed,
        current_phase: trip.current_phase(),
        tracking_started_at: trip.tracking_started_at,
        tracking_ended_at: trip.tracking_ended_at,
    })
}

pub struct TripStatsAggregator {
    store: Arc<dyn TrackingStore>,
    clock: Arc<dyn Clock>,
}

impl TripStatsAggregator {
    pub fn new(store: Arc<dyn TrackingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn trip_stats(&self, trip_id: TripId) -> Result<TripTrackingStats> {
        let trip = self
            .store
            .get_trip(trip_id)?
            .or_not_found("trip", trip_id.0)?;
        compute_trip_stats(self.store.as_ref(), &trip)
    }

    /// Every trip with tracking active, with its last known location.
    ///
    /// Positions are fetched with a single batched lookup.
    pub fn active_trips_snapshot(&self) -> Result<Vec<ActiveTripSnapshot>> {
        let now = self.clock.now();
        let mut trips = self.store.active_trips()?;
        trips.sort_by_key(|t| t.id);

        let ids: Vec<TripId> = trips.iter().map(|t| t.id).collect();
        let mut positions = self.store.last_known_many(&ids)?;

        Ok(trips
            .into_iter()
            .map(|trip| {
                let last = positions.remove(&trip.id);
                ActiveTripSnapshot {
                    trip_id: trip.id,
                    user_id: trip.user_id,
                    trip_type: trip.trip_type(),
                    status: trip.status,
                    phase: trip.current_phase(),
                    linked_device: trip.linked_device().map(|d| d.device_id.clone()),
                    last_update_at: last.as_ref().map(|l| format_timestamp(l.timestamp)),
                    minutes_since_last_update: last
                        .as_ref()
                        .map(|l| ((now - l.timestamp) / 60).max(0)),
                    last_emergency_at: last.as_ref().and_then(|l| l.last_waypoint_at),
                    last_known_location: last,
                }
            })
            .collect())
    }
}
