//! # Trip Phase Controller
//!
//! The button-driven state machine for a trip day.
//!
//! ```text
//! TREK_DAY: ASSIGNED -> STARTED(TO_TREK_START) -> VISITING(TO_TREK_START)
//!           -> VISITING(TREK_ACTIVE) -> RETURNING(FROM_TREK_END) -> COMPLETED
//! TOUR_DAY: ASSIGNED -> STARTED(TO_DESTINATION) -> VISITING(AT_DESTINATION)
//!           -> RETURNING(TO_HOTEL) -> COMPLETED
//! ```
//!
//! CANCELLED is reachable from any non-terminal state.
//!
//! Every operation holds the trip's lock, validates the whole precondition
//! before touching anything, and writes the trip together with its segment
//! close/open through a single store transition. A refused operation leaves
//! the trip exactly as it was and names the state it required.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::collaborators::{Clock, DeviceRegistry, ItineraryProvider, TrekPath, TrekPathProvider};
use crate::error::{OptionExt, Result, TrackingError};
use crate::model::{
    DayPlan, DeviceLink, Phase, RouteSegment, SegmentClose, SegmentId, SegmentStats, TourPhase,
    TrekPhase, Trip, TripId, TripKind, TripStatus, TripType,
};
use crate::segments::{SegmentTracker, SEGMENT_OUTBOUND, SEGMENT_RETURN, SEGMENT_TREK};
use crate::stats::{compute_trip_stats, TripTrackingStats};
use crate::store::{TrackingStore, TripTransition};
use crate::{GpsPoint, NamedLocation};

/// Name recorded for the point where a trek actually ended.
pub const TREK_END_NAME: &str = "Trek End";

// ============================================================================
// Per-trip locks
// ============================================================================

/// Registry of per-trip mutexes.
///
/// Operations on the same trip are serialized; different trips never
/// contend beyond the short registry lookup.
#[derive(Debug, Default)]
pub struct TripLocks {
    locks: Mutex<HashMap<TripId, Arc<Mutex<()>>>>,
}

impl TripLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, trip_id: TripId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(trip_id).or_default())
    }

    /// Run `f` while holding the lock for `trip_id`.
    pub fn with_trip<R>(&self, trip_id: TripId, f: impl FnOnce() -> R) -> R {
        let lock = self.lock_for(trip_id);
        // The guarded state is (), so a panic elsewhere leaves nothing torn
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Forget the lock of a trip nobody is waiting on.
    pub fn release(&self, trip_id: TripId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&trip_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&trip_id);
        }
    }

    /// Number of trips with a registered lock.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Requests and outcomes
// ============================================================================

/// Input of `start_day`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartDay {
    pub trip_type: TripType,
    pub hotel: NamedLocation,
    /// Destination (tour) or trek start (trek)
    pub target: NamedLocation,
}

impl StartDay {
    pub fn from_plan(plan: &DayPlan) -> Self {
        Self {
            trip_type: plan.trip_type,
            hotel: plan.hotel.clone(),
            target: plan.target.clone(),
        }
    }
}

/// A button the UI may offer for the trip's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    StartDay,
    SetVisiting,
    LinkDevice,
    StartTrek,
    EndTrek,
    ReturnToHotel,
    CompleteDay,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartDayOutcome {
    pub trip: Trip,
    pub segment_id: SegmentId,
    pub route_from: NamedLocation,
    pub route_to: NamedLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitingOutcome {
    pub trip: Trip,
    pub arrived_at: NamedLocation,
    /// Statistics of the closed outbound leg
    pub outbound: Option<SegmentStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkDeviceOutcome {
    pub trip: Trip,
    pub device: DeviceLink,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartTrekOutcome {
    pub trip: Trip,
    pub segment_id: SegmentId,
    pub trek_start: NamedLocation,
    pub trek_end: Option<NamedLocation>,
    pub trek_path: Option<TrekPath>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndTrekOutcome {
    pub trip: Trip,
    pub trek: Option<SegmentStats>,
    pub return_segment_id: SegmentId,
    pub route_to: NamedLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnOutcome {
    pub trip: Trip,
    pub return_segment_id: SegmentId,
    pub route_to: NamedLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompleteDayOutcome {
    pub trip: Trip,
    pub final_segment: Option<SegmentStats>,
    pub stats: TripTrackingStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelOutcome {
    pub trip: Trip,
    pub closed_segment: Option<SegmentStats>,
}

/// Read-only view of where a trip stands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripStatusView {
    pub trip_id: TripId,
    pub status: TripStatus,
    pub phase: Option<Phase>,
    pub trip_type: TripType,
    pub tracking_active: bool,
    pub linked_device: Option<DeviceLink>,
    pub available_actions: Vec<Action>,
    /// Minutes tracked so far, or in total once tracking ended
    pub tracking_minutes: Option<i64>,
}

/// Transport envelope: `{success, error?, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TrackingError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> From<Result<T>> for WorkflowResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                error: None,
                data: Some(data),
            },
            Err(error) => Self {
                success: false,
                error: Some(error),
                data: None,
            },
        }
    }
}

/// Buttons legal in the trip's current state.
pub fn available_actions(trip: &Trip) -> Vec<Action> {
    let mut actions = Vec::new();
    let no_device = trip.linked_device().is_none();

    match (trip.status, &trip.kind) {
        (TripStatus::Assigned, _) => actions.push(Action::StartDay),
        (TripStatus::Started, TripKind::Trek { .. }) => {
            if no_device {
                actions.push(Action::LinkDevice);
            }
            actions.push(Action::SetVisiting);
        }
        (TripStatus::Started, TripKind::Tour { .. }) => actions.push(Action::SetVisiting),
        (TripStatus::Visiting, TripKind::Trek { phase, .. }) => match phase {
            Some(TrekPhase::ToTrekStart) => {
                if no_device {
                    actions.push(Action::LinkDevice);
                } else {
                    actions.push(Action::StartTrek);
                }
            }
            Some(TrekPhase::TrekActive) => actions.push(Action::EndTrek),
            _ => {}
        },
        (TripStatus::Visiting, TripKind::Tour { .. }) => actions.push(Action::ReturnToHotel),
        (TripStatus::Returning, _) => actions.push(Action::CompleteDay),
        (TripStatus::Completed | TripStatus::Cancelled, _) => {}
    }

    if !trip.status.is_terminal() {
        actions.push(Action::Cancel);
    }
    actions
}

fn invalid(operation: &'static str, expected: impl Into<String>, trip: &Trip) -> TrackingError {
    TrackingError::InvalidTransition {
        operation,
        expected: expected.into(),
        actual: trip.state_label(),
    }
}

fn require_status(trip: &Trip, operation: &'static str, allowed: &[TripStatus]) -> Result<()> {
    if allowed.contains(&trip.status) {
        return Ok(());
    }
    let expected = allowed
        .iter()
        .map(TripStatus::as_str)
        .collect::<Vec<_>>()
        .join(" or ");
    Err(invalid(operation, expected, trip))
}

fn wrong_type(trip: &Trip, operation: &'static str, trip_type: TripType) -> TrackingError {
    TrackingError::InvalidTransition {
        operation,
        expected: format!("a {trip_type} trip"),
        actual: trip.trip_type().to_string(),
    }
}

fn require_type(trip: &Trip, operation: &'static str, trip_type: TripType) -> Result<()> {
    if trip.trip_type() == trip_type {
        Ok(())
    } else {
        Err(wrong_type(trip, operation, trip_type))
    }
}

fn require_point(point: &GpsPoint, what: &str) -> Result<()> {
    if point.is_valid() {
        Ok(())
    } else {
        Err(TrackingError::validation(format!(
            "{what} ({}, {}) is out of range",
            point.latitude, point.longitude
        )))
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Applies workflow transitions to trips.
pub struct TripPhaseController {
    store: Arc<dyn TrackingStore>,
    clock: Arc<dyn Clock>,
    devices: Arc<dyn DeviceRegistry>,
    trek_paths: Arc<dyn TrekPathProvider>,
    itinerary: Arc<dyn ItineraryProvider>,
    segments: SegmentTracker,
    locks: TripLocks,
}

impl TripPhaseController {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        clock: Arc<dyn Clock>,
        devices: Arc<dyn DeviceRegistry>,
        trek_paths: Arc<dyn TrekPathProvider>,
        itinerary: Arc<dyn ItineraryProvider>,
    ) -> Self {
        let segments = SegmentTracker::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            clock,
            devices,
            trek_paths,
            itinerary,
            segments,
            locks: TripLocks::new(),
        }
    }

    pub fn locks(&self) -> &TripLocks {
        &self.locks
    }

    fn load(&self, trip_id: TripId) -> Result<Trip> {
        self.store
            .get_trip(trip_id)?
            .or_not_found("trip", trip_id.0)
    }

    /// Prepare the close of the trip's open segment, if it has one.
    fn close_open_segment(
        &self,
        trip_id: TripId,
        end: GpsPoint,
    ) -> Result<Option<(SegmentId, SegmentClose)>> {
        match self.segments.open_segment(trip_id)? {
            Some(segment) => {
                let close = self.segments.prepare_close(&segment, end)?;
                Ok(Some((segment.id, close)))
            }
            None => Ok(None),
        }
    }

    fn commit(
        &self,
        trip: &Trip,
        close: Option<(SegmentId, SegmentClose)>,
        open: Option<RouteSegment>,
    ) -> Result<Option<SegmentId>> {
        self.store.commit_transition(TripTransition {
            trip: trip.clone(),
            close,
            open,
        })
    }

    fn commit_and_open(
        &self,
        trip: &Trip,
        close: Option<(SegmentId, SegmentClose)>,
        open: RouteSegment,
    ) -> Result<SegmentId> {
        self.commit(trip, close, Some(open))?
            .ok_or_else(|| TrackingError::storage("store did not report the opened segment"))
    }

    /// Begin the day: STARTED with the first phase, `outbound` leg opened
    /// from the hotel, tracking on.
    pub fn start_day(&self, trip_id: TripId, request: StartDay) -> Result<StartDayOutcome> {
        self.locks.with_trip(trip_id, || {
            let mut trip = self.load(trip_id)?;
            require_status(&trip, "start_day", &[TripStatus::Assigned])?;
            if request.trip_type != trip.trip_type() {
                return Err(TrackingError::validation(format!(
                    "trip {} is a {} trip, not {}",
                    trip_id,
                    trip.trip_type(),
                    request.trip_type
                )));
            }
            require_point(&request.hotel.location, "hotel")?;
            require_point(&request.target.location, "target")?;

            let now = self.clock.now();
            trip.hotel = request.hotel.clone();
            match &mut trip.kind {
                TripKind::Trek {
                    trek_start, phase, ..
                } => {
                    *trek_start = request.target.clone();
                    *phase = Some(TrekPhase::ToTrekStart);
                }
                TripKind::Tour { destination, phase } => {
                    *destination = request.target.clone();
                    *phase = Some(TourPhase::ToDestination);
                }
            }
            trip.status = TripStatus::Started;
            trip.tracking_active = true;
            trip.tracking_started_at = Some(now);
            trip.updated_at = now;

            let outbound = RouteSegment::open(
                trip_id,
                SEGMENT_OUTBOUND,
                request.hotel.location,
                now,
                None,
            );
            let segment_id = self.commit_and_open(&trip, None, outbound)?;

            log::info!(
                "[TripPhaseController] Trip {} started ({}): {} -> {}",
                trip_id,
                trip.trip_type(),
                request.hotel.name,
                request.target.name
            );

            Ok(StartDayOutcome {
                trip,
                segment_id,
                route_from: request.hotel,
                route_to: request.target,
            })
        })
    }

    /// Start the day from the itinerary's plan for this trip.
    pub fn start_day_from_itinerary(&self, trip_id: TripId) -> Result<StartDayOutcome> {
        let trip = self.load(trip_id)?;
        let plan = self
            .itinerary
            .day_plan(&trip)
            .or_not_found("day plan", trip_id.0)?;
        self.start_day(trip_id, StartDay::from_plan(&plan))
    }

    /// Arrived: closes the outbound leg at the target. Tours move to
    /// AT_DESTINATION; treks keep TO_TREK_START until the trek starts.
    pub fn set_visiting(&self, trip_id: TripId) -> Result<VisitingOutcome> {
        self.locks.with_trip(trip_id, || {
            let mut trip = self.load(trip_id)?;
            require_status(&trip, "set_visiting", &[TripStatus::Started])?;

            let arrived_at = trip.target().clone();
            let close = self.close_open_segment(trip_id, arrived_at.location)?;
            let outbound = close.as_ref().map(|(_, c)| c.stats);

            if let TripKind::Tour { phase, .. } = &mut trip.kind {
                *phase = Some(TourPhase::AtDestination);
            }
            trip.status = TripStatus::Visiting;
            trip.updated_at = self.clock.now();
            self.commit(&trip, close, None)?;

            log::info!(
                "[TripPhaseController] Trip {} visiting {}",
                trip_id,
                arrived_at.name
            );

            Ok(VisitingOutcome {
                trip,
                arrived_at,
                outbound,
            })
        })
    }

    /// Bind a tracking device to a trek day awaiting its start.
    pub fn link_device(&self, trip_id: TripId, device_id: &str) -> Result<LinkDeviceOutcome> {
        self.locks.with_trip(trip_id, || {
            let mut trip = self.load(trip_id)?;
            require_type(&trip, "link_device", TripType::TrekDay)?;

            if let Some(existing) = trip.linked_device() {
                return Err(TrackingError::InvalidTransition {
                    operation: "link_device",
                    expected: "no linked device".to_string(),
                    actual: format!("device '{}' linked", existing.device_id),
                });
            }
            let awaiting_trek = matches!(trip.status, TripStatus::Started | TripStatus::Visiting)
                && trip.phase() == Some(Phase::Trek(TrekPhase::ToTrekStart));
            if !awaiting_trek {
                return Err(invalid(
                    "link_device",
                    "STARTED/TO_TREK_START or VISITING/TO_TREK_START",
                    &trip,
                ));
            }

            let device_id = device_id.trim();
            if device_id.is_empty() {
                return Err(TrackingError::validation("device id must not be empty"));
            }
            if !self.devices.is_device_valid(device_id) {
                return Err(TrackingError::UnknownDevice {
                    device_id: device_id.to_string(),
                });
            }

            let now = self.clock.now();
            let link = DeviceLink {
                device_id: device_id.to_string(),
                linked_at: now,
            };
            if let TripKind::Trek { device, .. } = &mut trip.kind {
                *device = Some(link.clone());
            }
            trip.updated_at = now;
            self.commit(&trip, None, None)?;

            log::info!(
                "[TripPhaseController] Trip {} linked device {}",
                trip_id,
                link.device_id
            );

            Ok(LinkDeviceOutcome { trip, device: link })
        })
    }

    /// Begin the trek with the linked device. Opens the `trek` leg carrying
    /// the pre-authored path reference, if one exists.
    pub fn start_trek(&self, trip_id: TripId, device_id: &str) -> Result<StartTrekOutcome> {
        self.locks.with_trip(trip_id, || {
            let mut trip = self.load(trip_id)?;
            let TripKind::Trek {
                trek_id,
                trek_start,
                trek_end,
                ..
            } = trip.kind.clone()
            else {
                return Err(wrong_type(&trip, "start_trek", TripType::TrekDay));
            };

            let linked = trip
                .linked_device()
                .ok_or(TrackingError::DeviceNotLinked { trip_id: trip_id.0 })?;
            if linked.device_id != device_id.trim() {
                return Err(TrackingError::DeviceMismatch {
                    linked: linked.device_id.clone(),
                    provided: device_id.to_string(),
                });
            }
            if trip.status != TripStatus::Visiting
                || trip.phase() != Some(Phase::Trek(TrekPhase::ToTrekStart))
            {
                return Err(invalid("start_trek", "VISITING/TO_TREK_START", &trip));
            }

            let trek_path = trek_id.and_then(|id| self.trek_paths.trek_path(id));

            let close = self.close_open_segment(trip_id, trek_start.location)?;
            let now = self.clock.now();
            if let TripKind::Trek { phase, .. } = &mut trip.kind {
                *phase = Some(TrekPhase::TrekActive);
            }
            trip.updated_at = now;

            let trek = RouteSegment::open(
                trip_id,
                SEGMENT_TREK,
                trek_start.location,
                now,
                trek_path.as_ref().map(TrekPath::reference),
            );
            let segment_id = self.commit_and_open(&trip, close, trek)?;

            log::info!(
                "[TripPhaseController] Trip {} trek started at {} (path: {})",
                trip_id,
                trek_start.name,
                trek_path.as_ref().map_or("none", |p| p.name.as_str())
            );

            Ok(StartTrekOutcome {
                trip,
                segment_id,
                trek_start,
                trek_end,
                trek_path,
            })
        })
    }

    /// Finish the trek at `end`: closes the `trek` leg and opens the
    /// `return` leg toward the hotel.
    pub fn end_trek(&self, trip_id: TripId, end: GpsPoint) -> Result<EndTrekOutcome> {
        self.locks.with_trip(trip_id, || {
            let mut trip = self.load(trip_id)?;
            if trip.status != TripStatus::Visiting
                || trip.phase() != Some(Phase::Trek(TrekPhase::TrekActive))
            {
                return Err(invalid("end_trek", "VISITING/TREK_ACTIVE", &trip));
            }
            require_point(&end, "trek end")?;

            let close = self.close_open_segment(trip_id, end)?;
            let trek = close.as_ref().map(|(_, c)| c.stats);
            let now = self.clock.now();
            if let TripKind::Trek {
                phase, trek_end, ..
            } = &mut trip.kind
            {
                *phase = Some(TrekPhase::FromTrekEnd);
                *trek_end = Some(NamedLocation::new(TREK_END_NAME, end));
            }
            trip.status = TripStatus::Returning;
            trip.updated_at = now;

            let back = RouteSegment::open(trip_id, SEGMENT_RETURN, end, now, None);
            let return_segment_id = self.commit_and_open(&trip, close, back)?;

            log::info!("[TripPhaseController] Trip {} trek ended", trip_id);

            Ok(EndTrekOutcome {
                route_to: trip.hotel.clone(),
                trip,
                trek,
                return_segment_id,
            })
        })
    }

    /// Head back to the hotel from a tour destination.
    pub fn request_return(&self, trip_id: TripId, current: GpsPoint) -> Result<ReturnOutcome> {
        self.locks.with_trip(trip_id, || {
            let mut trip = self.load(trip_id)?;
            require_type(&trip, "request_return", TripType::TourDay)?;
            require_status(&trip, "request_return", &[TripStatus::Visiting])?;
            require_point(&current, "current location")?;

            let close = self.close_open_segment(trip_id, current)?;
            let now = self.clock.now();
            if let TripKind::Tour { phase, .. } = &mut trip.kind {
                *phase = Some(TourPhase::ToHotel);
            }
            trip.status = TripStatus::Returning;
            trip.updated_at = now;

            let back = RouteSegment::open(trip_id, SEGMENT_RETURN, current, now, None);
            let return_segment_id = self.commit_and_open(&trip, close, back)?;

            log::info!("[TripPhaseController] Trip {} returning to hotel", trip_id);

            Ok(ReturnOutcome {
                route_to: trip.hotel.clone(),
                trip,
                return_segment_id,
            })
        })
    }

    /// Where an open leg ends when the trip stops: the newest position, or
    /// the hotel when nothing was ever recorded.
    fn stop_location(&self, trip: &Trip) -> Result<GpsPoint> {
        Ok(self
            .store
            .last_known(trip.id)?
            .map_or(trip.hotel.location, |l| l.location))
    }

    /// Back at the hotel: COMPLETED, tracking off, remaining leg closed.
    pub fn complete_day(&self, trip_id: TripId) -> Result<CompleteDayOutcome> {
        let outcome = self.locks.with_trip(trip_id, || {
            let mut trip = self.load(trip_id)?;
            require_status(&trip, "complete_day", &[TripStatus::Returning])?;

            let end = self.stop_location(&trip)?;
            let close = self.close_open_segment(trip_id, end)?;
            let final_segment = close.as_ref().map(|(_, c)| c.stats);
            let now = self.clock.now();
            trip.status = TripStatus::Completed;
            trip.tracking_active = false;
            trip.tracking_ended_at = Some(now);
            trip.updated_at = now;
            self.commit(&trip, close, None)?;

            let stats = compute_trip_stats(self.store.as_ref(), &trip)?;
            log::info!(
                "[TripPhaseController] Trip {} completed: {:.0} m over {} segments",
                trip_id,
                stats.total_distance_meters,
                stats.segments_completed
            );

            Ok(CompleteDayOutcome {
                trip,
                final_segment,
                stats,
            })
        });
        self.locks.release(trip_id);
        outcome
    }

    /// Administrative stop from any non-terminal state.
    pub fn cancel(&self, trip_id: TripId, reason: Option<String>) -> Result<CancelOutcome> {
        let outcome = self.locks.with_trip(trip_id, || {
            let mut trip = self.load(trip_id)?;
            if trip.status.is_terminal() {
                return Err(invalid(
                    "cancel",
                    "ASSIGNED, STARTED, VISITING or RETURNING",
                    &trip,
                ));
            }

            let end = self.stop_location(&trip)?;
            let close = self.close_open_segment(trip_id, end)?;
            let closed_segment = close.as_ref().map(|(_, c)| c.stats);
            let now = self.clock.now();
            if trip.tracking_active {
                trip.tracking_ended_at = Some(now);
            }
            trip.status = TripStatus::Cancelled;
            trip.tracking_active = false;
            trip.cancellation_reason = reason;
            trip.updated_at = now;
            self.commit(&trip, close, None)?;

            log::info!(
                "[TripPhaseController] Trip {} cancelled{}",
                trip_id,
                trip.cancellation_reason
                    .as_deref()
                    .map(|r| format!(": {r}"))
                    .unwrap_or_default()
            );

            Ok(CancelOutcome {
                trip,
                closed_segment,
            })
        });
        self.locks.release(trip_id);
        outcome
    }

    /// Status, phase and legal next actions. No side effects.
    pub fn current_status(&self, trip_id: TripId) -> Result<TripStatusView> {
        let trip = self.load(trip_id)?;
        let tracking_minutes = trip.tracking_started_at.map(|started| {
            let until = trip.tracking_ended_at.unwrap_or_else(|| self.clock.now());
            ((until - started) / 60).max(0)
        });

        Ok(TripStatusView {
            trip_id,
            status: trip.status,
            phase: trip.current_phase(),
            trip_type: trip.trip_type(),
            tracking_active: trip.tracking_active,
            linked_device: trip.linked_device().cloned(),
            available_actions: available_actions(&trip),
            tracking_minutes,
        })
    }
}
