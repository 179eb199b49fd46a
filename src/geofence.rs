//! # Geofence Evaluation
//!
//! Evaluates a coordinate against the restricted areas in force and records
//! violations.
//!
//! ## Algorithm
//!
//! 1. Load every stored area once into a snapshot, validating its polygon.
//!    Corrupt rows are logged and left out so one bad area cannot blind the
//!    evaluator to the rest.
//! 2. Index the snapshot in an R-tree of buffered bounding boxes.
//! 3. For a query point, take the areas whose box contains it and keep the
//!    ones that are ACTIVE and inside their validity window at `now`.
//! 4. Containment produces an entry (and a violation when a subject is
//!    given); otherwise a distance within the buffer produces an approach
//!    warning.
//!
//! Snapshots are reused for `area_cache_ttl_secs` and dropped explicitly when
//! areas change through the engine.

use std::sync::{Arc, RwLock};

use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::collaborators::Clock;
use crate::config::TrackingConfig;
use crate::error::{Result, TrackingError};
use crate::geometry::{buffered_envelope, distance_to_polygon, point_in_polygon, Polygon};
use crate::model::{
    AreaId, AreaType, GeofenceViolation, RestrictedArea, TripId, UserId, ViolationId,
    ViolationType,
};
use crate::store::TrackingStore;
use crate::GpsPoint;

/// Growth applied to the buffer when building index boxes, so the
/// degree-based box never cuts off a point the metric check would accept.
const ENVELOPE_SLACK: f64 = 1.25;

/// Who is at the evaluated location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub user_id: UserId,
    pub trip_id: Option<TripId>,
}

impl Subject {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            trip_id: None,
        }
    }

    pub fn on_trip(user_id: UserId, trip_id: TripId) -> Self {
        Self {
            user_id,
            trip_id: Some(trip_id),
        }
    }
}

/// One area triggered by an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaHit {
    pub area_id: AreaId,
    pub name: String,
    pub area_type: AreaType,
    pub severity_level: u8,
    pub is_inside: bool,
    /// 0 when inside
    pub distance_meters: f64,
    pub warning: String,
    pub send_warning_notification: bool,
    pub auto_alert_authorities: bool,
    pub restriction_reason: Option<String>,
    pub contact_info: Option<String>,
}

/// Outcome of evaluating one coordinate.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeofenceResult {
    pub is_restricted: bool,
    /// Ordered by descending severity, then ascending distance
    pub areas: Vec<AreaHit>,
    pub warnings: Vec<String>,
    /// Highest severity among triggered areas, 0 if none
    pub max_severity: u8,
    pub violations: Vec<GeofenceViolation>,
}

// ============================================================================
// Area snapshot
// ============================================================================

struct IndexedArea {
    area: RestrictedArea,
    polygon: Polygon,
    buffer_meters: f64,
}

/// Index entry pointing into the snapshot's area list.
struct AreaEnvelope {
    slot: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for AreaEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

struct AreaSnapshot {
    loaded_at: i64,
    areas: Vec<IndexedArea>,
    index: RTree<AreaEnvelope>,
}

impl AreaSnapshot {
    fn build(stored: Vec<RestrictedArea>, default_buffer: f64, loaded_at: i64) -> Self {
        let mut areas = Vec::with_capacity(stored.len());
        for area in stored {
            match area.polygon() {
                Ok(polygon) => {
                    let buffer_meters = area.buffer_distance_meters.unwrap_or(default_buffer);
                    areas.push(IndexedArea {
                        area,
                        polygon,
                        buffer_meters,
                    });
                }
                Err(e) => log::warn!(
                    "[GeofenceEvaluator] Skipping area {} '{}': {}",
                    area.id,
                    area.name,
                    e
                ),
            }
        }

        let entries: Vec<AreaEnvelope> = areas
            .iter()
            .enumerate()
            .map(|(slot, a)| AreaEnvelope {
                slot,
                envelope: buffered_envelope(&a.polygon, a.buffer_meters.max(0.0) * ENVELOPE_SLACK),
            })
            .collect();

        Self {
            loaded_at,
            areas,
            index: RTree::bulk_load(entries),
        }
    }

    fn candidates(&self, point: &GpsPoint, now: i64) -> Vec<&IndexedArea> {
        let query = AABB::from_point([point.longitude, point.latitude]);
        self.index
            .locate_in_envelope_intersecting(&query)
            .map(|e| &self.areas[e.slot])
            .filter(|a| a.area.is_enforced_at(now))
            .collect()
    }
}

fn check_area(indexed: &IndexedArea, point: &GpsPoint) -> Option<AreaHit> {
    let area = &indexed.area;
    let is_inside = point_in_polygon(point, &indexed.polygon);
    let distance_meters = if is_inside {
        0.0
    } else {
        distance_to_polygon(point, &indexed.polygon)
    };

    let warning = if is_inside {
        format!(
            "You are currently in a restricted {}: {}",
            area.area_type.label(),
            area.name
        )
    } else if distance_meters <= indexed.buffer_meters {
        format!(
            "Warning: You are approaching a restricted {}: {}",
            area.area_type.label(),
            area.name
        )
    } else {
        return None;
    };

    Some(AreaHit {
        area_id: area.id,
        name: area.name.clone(),
        area_type: area.area_type,
        severity_level: area.severity_level,
        is_inside,
        distance_meters,
        warning,
        send_warning_notification: area.send_warning_notification,
        auto_alert_authorities: area.auto_alert_authorities,
        restriction_reason: area.restriction_reason.clone(),
        contact_info: area.contact_info.clone(),
    })
}

#[cfg(feature = "parallel")]
fn check_candidates(candidates: &[&IndexedArea], point: &GpsPoint) -> Vec<AreaHit> {
    candidates
        .par_iter()
        .filter_map(|a| check_area(a, point))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn check_candidates(candidates: &[&IndexedArea], point: &GpsPoint) -> Vec<AreaHit> {
    candidates
        .iter()
        .filter_map(|a| check_area(a, point))
        .collect()
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluates coordinates against restricted areas and manages violations.
pub struct GeofenceEvaluator {
    store: Arc<dyn TrackingStore>,
    clock: Arc<dyn Clock>,
    default_buffer_meters: f64,
    cache_ttl_secs: i64,
    log_approach_warnings: bool,
    snapshot: RwLock<Option<Arc<AreaSnapshot>>>,
}

impl GeofenceEvaluator {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        clock: Arc<dyn Clock>,
        config: &TrackingConfig,
    ) -> Self {
        Self {
            store,
            clock,
            default_buffer_meters: config.default_buffer_distance_meters,
            cache_ttl_secs: config.area_cache_ttl_secs,
            log_approach_warnings: config.log_approach_warnings,
            snapshot: RwLock::new(None),
        }
    }

    /// Drop the cached area snapshot; the next evaluation reloads.
    pub fn invalidate(&self) {
        match self.snapshot.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    fn current_snapshot(&self) -> Result<Arc<AreaSnapshot>> {
        let now = self.clock.now();
        let cached = match self.snapshot.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(snapshot) = cached {
            let age = now - snapshot.loaded_at;
            if (0..self.cache_ttl_secs).contains(&age) {
                return Ok(snapshot);
            }
        }

        let snapshot = Arc::new(AreaSnapshot::build(
            self.store.list_areas()?,
            self.default_buffer_meters,
            now,
        ));
        log::debug!(
            "[GeofenceEvaluator] Loaded {} restricted areas",
            snapshot.areas.len()
        );
        match self.snapshot.write() {
            Ok(mut slot) => *slot = Some(Arc::clone(&snapshot)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::clone(&snapshot)),
        }
        Ok(snapshot)
    }

    /// Evaluate `point` against the areas in force at `now`.
    ///
    /// With a subject, every containment is recorded as an `entry`
    /// violation. Approaches only produce warnings unless
    /// `log_approach_warnings` is configured.
    pub fn evaluate(
        &self,
        point: GpsPoint,
        now: i64,
        subject: Option<Subject>,
    ) -> Result<GeofenceResult> {
        if !point.is_valid() {
            return Err(TrackingError::validation(format!(
                "coordinate ({}, {}) is out of range",
                point.latitude, point.longitude
            )));
        }

        let snapshot = self.current_snapshot()?;
        let candidates = snapshot.candidates(&point, now);
        let mut hits = check_candidates(&candidates, &point);
        hits.sort_by(|a, b| {
            b.severity_level
                .cmp(&a.severity_level)
                .then(a.distance_meters.total_cmp(&b.distance_meters))
        });

        let mut result = GeofenceResult {
            is_restricted: hits.iter().any(|h| h.is_inside),
            warnings: hits.iter().map(|h| h.warning.clone()).collect(),
            max_severity: hits.iter().map(|h| h.severity_level).max().unwrap_or(0),
            ..GeofenceResult::default()
        };

        if let Some(subject) = subject {
            for hit in &hits {
                let violation_type = if hit.is_inside {
                    ViolationType::Entry
                } else if self.log_approach_warnings {
                    ViolationType::ApproachWarning
                } else {
                    continue;
                };
                let violation = self.store.insert_violation(GeofenceViolation {
                    id: ViolationId::default(),
                    user_id: subject.user_id,
                    area_id: hit.area_id,
                    trip_id: subject.trip_id,
                    violation_type,
                    location: point,
                    detected_at: now,
                    resolved_at: None,
                    resolved_by: None,
                    notes: None,
                    notification_sent: false,
                    authorities_alerted: false,
                    severity_score: hit.severity_level,
                })?;
                if hit.is_inside {
                    log::warn!(
                        "[GeofenceEvaluator] User {} entered {} '{}' (severity {})",
                        subject.user_id,
                        hit.area_type.as_str(),
                        hit.name,
                        hit.severity_level
                    );
                }
                result.violations.push(violation);
            }
        }

        result.areas = hits;
        Ok(result)
    }

    /// Mark a violation resolved by an operator.
    pub fn resolve_violation(
        &self,
        id: ViolationId,
        resolved_by: UserId,
        notes: Option<String>,
    ) -> Result<GeofenceViolation> {
        self.store
            .resolve_violation(id, resolved_by, self.clock.now(), notes)
    }

    pub fn violations_for_user(&self, user_id: UserId) -> Result<Vec<GeofenceViolation>> {
        self.store.violations_for_user(user_id)
    }

    pub fn violations_for_trip(&self, trip_id: TripId) -> Result<Vec<GeofenceViolation>> {
        self.store.violations_for_trip(trip_id)
    }

    pub fn unresolved_violations(&self) -> Result<Vec<GeofenceViolation>> {
        self.store.unresolved_violations()
    }

    /// Polygons of every area in force at `now`, for a route planner to
    /// avoid. Served from the same snapshot as evaluation.
    pub fn active_areas_for_routing(&self, now: i64) -> Result<Vec<Polygon>> {
        let snapshot = self.current_snapshot()?;
        Ok(snapshot
            .areas
            .iter()
            .filter(|a| a.area.is_enforced_at(now))
            .map(|a| a.polygon.clone())
            .collect())
    }
}
