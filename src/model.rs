//! # Domain Model
//!
//! Typed ids and the records shared by every component: trips and their
//! phase sum type, telemetry samples, route segments, restricted areas and
//! geofence violations.
//!
//! All timestamps are epoch seconds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};
use crate::geometry::{validate_polygon, GeometryError, Polygon};
use crate::{GpsPoint, NamedLocation};

/// Highest accepted buffer distance for a restricted area.
pub const MAX_BUFFER_DISTANCE_METERS: f64 = 10_000.0;

// ============================================================================
// Ids
// ============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identity of a [`Trip`].
    TripId
);
id_type!(
    /// Identity of a tourist (owning user).
    UserId
);
id_type!(
    /// Identity of a [`RouteSegment`].
    SegmentId
);
id_type!(
    /// Identity of a [`RestrictedArea`].
    AreaId
);
id_type!(
    /// Identity of a [`GeofenceViolation`].
    ViolationId
);

// ============================================================================
// Trip
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripType {
    TrekDay,
    TourDay,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripType::TrekDay => "TREK_DAY",
            TripType::TourDay => "TOUR_DAY",
        }
    }
}

impl fmt::Display for TripType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Assigned,
    Started,
    Visiting,
    Returning,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub const ALL: [TripStatus; 6] = [
        TripStatus::Assigned,
        TripStatus::Started,
        TripStatus::Visiting,
        TripStatus::Returning,
        TripStatus::Completed,
        TripStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Assigned => "ASSIGNED",
            TripStatus::Started => "STARTED",
            TripStatus::Visiting => "VISITING",
            TripStatus::Returning => "RETURNING",
            TripStatus::Completed => "COMPLETED",
            TripStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// COMPLETED and CANCELLED accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }

    /// Statuses during which a phase is reported.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            TripStatus::Started | TripStatus::Visiting | TripStatus::Returning
        )
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrekPhase {
    ToTrekStart,
    TrekActive,
    FromTrekEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TourPhase {
    ToDestination,
    AtDestination,
    ToHotel,
}

/// Fine-grained sub-state of a trip. Trek and tour phases never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Phase {
    Trek(TrekPhase),
    Tour(TourPhase),
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Trek(TrekPhase::ToTrekStart),
        Phase::Trek(TrekPhase::TrekActive),
        Phase::Trek(TrekPhase::FromTrekEnd),
        Phase::Tour(TourPhase::ToDestination),
        Phase::Tour(TourPhase::AtDestination),
        Phase::Tour(TourPhase::ToHotel),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Trek(TrekPhase::ToTrekStart) => "TO_TREK_START",
            Phase::Trek(TrekPhase::TrekActive) => "TREK_ACTIVE",
            Phase::Trek(TrekPhase::FromTrekEnd) => "FROM_TREK_END",
            Phase::Tour(TourPhase::ToDestination) => "TO_DESTINATION",
            Phase::Tour(TourPhase::AtDestination) => "AT_DESTINATION",
            Phase::Tour(TourPhase::ToHotel) => "TO_HOTEL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == value)
    }

    pub fn trip_type(&self) -> TripType {
        match self {
            Phase::Trek(_) => TripType::TrekDay,
            Phase::Tour(_) => TripType::TourDay,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracking device bound to a trek day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceLink {
    pub device_id: String,
    pub linked_at: i64,
}

/// What kind of day a trip is, with the data only that kind carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trip_type")]
pub enum TripKind {
    #[serde(rename = "TREK_DAY")]
    Trek {
        trek_id: Option<i64>,
        trek_start: NamedLocation,
        trek_end: Option<NamedLocation>,
        phase: Option<TrekPhase>,
        device: Option<DeviceLink>,
    },
    #[serde(rename = "TOUR_DAY")]
    Tour {
        destination: NamedLocation,
        phase: Option<TourPhase>,
    },
}

/// Day plan supplied by the itinerary, used to create and start trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    pub trip_type: TripType,
    pub hotel: NamedLocation,
    /// Destination (tour) or trek start (trek)
    pub target: NamedLocation,
    pub trek_id: Option<i64>,
    pub trek_end: Option<NamedLocation>,
}

impl DayPlan {
    pub fn tour(hotel: NamedLocation, destination: NamedLocation) -> Self {
        Self {
            trip_type: TripType::TourDay,
            hotel,
            target: destination,
            trek_id: None,
            trek_end: None,
        }
    }

    pub fn trek(
        hotel: NamedLocation,
        trek_id: Option<i64>,
        trek_start: NamedLocation,
        trek_end: Option<NamedLocation>,
    ) -> Self {
        Self {
            trip_type: TripType::TrekDay,
            hotel,
            target: trek_start,
            trek_id,
            trek_end,
        }
    }
}

/// One tourist's engagement with one day plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub user_id: UserId,
    pub kind: TripKind,
    pub status: TripStatus,
    pub hotel: NamedLocation,
    pub tracking_active: bool,
    pub tracking_started_at: Option<i64>,
    pub tracking_ended_at: Option<i64>,
    pub cancellation_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Trip {
    /// A fresh ASSIGNED trip. The id is assigned by the store.
    pub fn from_plan(user_id: UserId, plan: &DayPlan, now: i64) -> Self {
        let kind = match plan.trip_type {
            TripType::TrekDay => TripKind::Trek {
                trek_id: plan.trek_id,
                trek_start: plan.target.clone(),
                trek_end: plan.trek_end.clone(),
                phase: None,
                device: None,
            },
            TripType::TourDay => TripKind::Tour {
                destination: plan.target.clone(),
                phase: None,
            },
        };

        Self {
            id: TripId::default(),
            user_id,
            kind,
            status: TripStatus::Assigned,
            hotel: plan.hotel.clone(),
            tracking_active: false,
            tracking_started_at: None,
            tracking_ended_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn trip_type(&self) -> TripType {
        match self.kind {
            TripKind::Trek { .. } => TripType::TrekDay,
            TripKind::Tour { .. } => TripType::TourDay,
        }
    }

    /// The stored phase regardless of status.
    pub fn phase(&self) -> Option<Phase> {
        match &self.kind {
            TripKind::Trek { phase, .. } => phase.map(Phase::Trek),
            TripKind::Tour { phase, .. } => phase.map(Phase::Tour),
        }
    }

    /// The phase, reported only while the trip is in progress.
    pub fn current_phase(&self) -> Option<Phase> {
        if self.status.is_in_progress() {
            self.phase()
        } else {
            None
        }
    }

    pub fn linked_device(&self) -> Option<&DeviceLink> {
        match &self.kind {
            TripKind::Trek { device, .. } => device.as_ref(),
            TripKind::Tour { .. } => None,
        }
    }

    /// Destination of a tour, or start of a trek.
    pub fn target(&self) -> &NamedLocation {
        match &self.kind {
            TripKind::Trek { trek_start, .. } => trek_start,
            TripKind::Tour { destination, .. } => destination,
        }
    }

    /// `status/phase` label used in transition errors.
    pub fn state_label(&self) -> String {
        match self.phase() {
            Some(phase) => format!("{}/{}", self.status, phase),
            None => self.status.to_string(),
        }
    }
}

// ============================================================================
// Telemetry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationSource {
    MobileGps,
    TrackingDevice,
    Manual,
}

impl LocationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationSource::MobileGps => "MOBILE_GPS",
            LocationSource::TrackingDevice => "TRACKING_DEVICE",
            LocationSource::Manual => "MANUAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            LocationSource::MobileGps,
            LocationSource::TrackingDevice,
            LocationSource::Manual,
        ]
        .into_iter()
        .find(|s| s.as_str() == value)
    }
}

/// One stored GPS observation. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Store-assigned arrival sequence
    pub seq: i64,
    pub trip_id: TripId,
    pub user_id: UserId,
    pub timestamp: i64,
    pub location: GpsPoint,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    pub source: LocationSource,
    pub trip_phase: Option<Phase>,
    pub device_id: Option<String>,
    pub battery_level: Option<f64>,
    pub signal_strength: Option<i32>,
    pub is_waypoint: bool,
    pub notes: Option<String>,
}

impl LocationSample {
    /// Identity used for duplicate detection: same trip, time and position.
    pub fn same_observation(&self, other: &LocationSample) -> bool {
        self.trip_id == other.trip_id
            && self.timestamp == other.timestamp
            && self.location == other.location
    }
}

/// Newest-by-timestamp position of a trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastKnownLocation {
    pub trip_id: TripId,
    pub location: GpsPoint,
    pub timestamp: i64,
    pub source: LocationSource,
    /// Timestamp of the most recent waypoint (emergency) sample
    pub last_waypoint_at: Option<i64>,
}

impl LastKnownLocation {
    pub fn from_sample(sample: &LocationSample) -> Self {
        Self {
            trip_id: sample.trip_id,
            location: sample.location,
            timestamp: sample.timestamp,
            source: sample.source,
            last_waypoint_at: sample.is_waypoint.then_some(sample.timestamp),
        }
    }

    /// Fold a newly stored sample in. Late samples never move the position
    /// backwards in time.
    pub fn absorb(&mut self, sample: &LocationSample) {
        if sample.timestamp >= self.timestamp {
            self.location = sample.location;
            self.timestamp = sample.timestamp;
            self.source = sample.source;
        }
        if sample.is_waypoint {
            self.last_waypoint_at = Some(
                self.last_waypoint_at
                    .map_or(sample.timestamp, |t| t.max(sample.timestamp)),
            );
        }
    }

    /// Merge `sample` into an optional existing row.
    pub fn merged(existing: Option<Self>, sample: &LocationSample) -> Self {
        match existing {
            Some(mut row) => {
                row.absorb(sample);
                row
            }
            None => Self::from_sample(sample),
        }
    }
}

// ============================================================================
// Route segments
// ============================================================================

/// Statistics frozen on a segment when it closes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SegmentStats {
    pub total_distance_meters: f64,
    pub duration_seconds: i64,
    pub avg_speed_mps: f64,
    pub max_speed_mps: f64,
    pub sample_count: usize,
}

/// A bounded, directional leg of movement within a trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSegment {
    pub id: SegmentId,
    pub trip_id: TripId,
    pub segment_type: String,
    pub start_timestamp: i64,
    pub start_location: GpsPoint,
    pub end_timestamp: Option<i64>,
    pub end_location: Option<GpsPoint>,
    pub stats: SegmentStats,
    pub is_completed: bool,
    /// Opaque reference to a pre-authored path
    pub path_ref: Option<String>,
}

impl RouteSegment {
    /// A new open segment. The id is assigned by the store.
    pub fn open(
        trip_id: TripId,
        segment_type: impl Into<String>,
        start_location: GpsPoint,
        start_timestamp: i64,
        path_ref: Option<String>,
    ) -> Self {
        Self {
            id: SegmentId::default(),
            trip_id,
            segment_type: segment_type.into(),
            start_timestamp,
            start_location,
            end_timestamp: None,
            end_location: None,
            stats: SegmentStats::default(),
            is_completed: false,
            path_ref,
        }
    }
}

/// End fields written when a segment closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentClose {
    pub end_timestamp: i64,
    pub end_location: GpsPoint,
    pub stats: SegmentStats,
}

// ============================================================================
// Restricted areas
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaType {
    RestrictedZone,
    DangerZone,
    PrivateProperty,
    ProtectedArea,
    MilitaryZone,
    SeasonalClosure,
}

impl AreaType {
    pub const ALL: [AreaType; 6] = [
        AreaType::RestrictedZone,
        AreaType::DangerZone,
        AreaType::PrivateProperty,
        AreaType::ProtectedArea,
        AreaType::MilitaryZone,
        AreaType::SeasonalClosure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AreaType::RestrictedZone => "restricted_zone",
            AreaType::DangerZone => "danger_zone",
            AreaType::PrivateProperty => "private_property",
            AreaType::ProtectedArea => "protected_area",
            AreaType::MilitaryZone => "military_zone",
            AreaType::SeasonalClosure => "seasonal_closure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// Human-readable form, e.g. "danger zone".
    pub fn label(&self) -> String {
        self.as_str().replace('_', " ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AreaStatus {
    Active,
    Inactive,
    TemporarilyDisabled,
}

impl AreaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AreaStatus::Active => "ACTIVE",
            AreaStatus::Inactive => "INACTIVE",
            AreaStatus::TemporarilyDisabled => "TEMPORARILY_DISABLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            AreaStatus::Active,
            AreaStatus::Inactive,
            AreaStatus::TemporarilyDisabled,
        ]
        .into_iter()
        .find(|s| s.as_str() == value)
    }
}

/// An administratively declared zone tourists should not enter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestrictedArea {
    pub id: AreaId,
    pub name: String,
    pub description: Option<String>,
    /// WGS84 ring, open or closed
    pub boundary: Vec<GpsPoint>,
    pub area_type: AreaType,
    pub status: AreaStatus,
    /// 1 (low) to 5 (high)
    pub severity_level: u8,
    pub valid_from: Option<i64>,
    pub valid_until: Option<i64>,
    /// Warning radius; `None` falls back to the configured default
    pub buffer_distance_meters: Option<f64>,
    pub send_warning_notification: bool,
    pub auto_alert_authorities: bool,
    pub restriction_reason: Option<String>,
    pub contact_info: Option<String>,
    pub created_by: Option<UserId>,
}

impl RestrictedArea {
    /// Build an active area from a boundary ring. Degenerate and
    /// self-intersecting rings are rejected.
    pub fn new(
        name: impl Into<String>,
        area_type: AreaType,
        boundary: &[GpsPoint],
    ) -> std::result::Result<Self, GeometryError> {
        let polygon = validate_polygon(boundary)?;
        Ok(Self {
            id: AreaId::default(),
            name: name.into(),
            description: None,
            boundary: polygon.vertices().to_vec(),
            area_type,
            status: AreaStatus::Active,
            severity_level: 1,
            valid_from: None,
            valid_until: None,
            buffer_distance_meters: Some(100.0),
            send_warning_notification: true,
            auto_alert_authorities: false,
            restriction_reason: None,
            contact_info: None,
            created_by: None,
        })
    }

    pub fn with_severity(mut self, level: u8) -> Self {
        self.severity_level = level;
        self
    }

    pub fn with_buffer(mut self, meters: Option<f64>) -> Self {
        self.buffer_distance_meters = meters;
        self
    }

    pub fn with_window(mut self, valid_from: Option<i64>, valid_until: Option<i64>) -> Self {
        self.valid_from = valid_from;
        self.valid_until = valid_until;
        self
    }

    pub fn with_status(mut self, status: AreaStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_alerts(mut self, send_warning: bool, auto_alert_authorities: bool) -> Self {
        self.send_warning_notification = send_warning;
        self.auto_alert_authorities = auto_alert_authorities;
        self
    }

    /// Re-validate the stored boundary.
    pub fn polygon(&self) -> std::result::Result<Polygon, GeometryError> {
        validate_polygon(&self.boundary)
    }

    /// ACTIVE and inside the (inclusive, open-ended) validity window.
    pub fn is_enforced_at(&self, now: i64) -> bool {
        self.status == AreaStatus::Active
            && self.valid_from.is_none_or(|from| from <= now)
            && self.valid_until.is_none_or(|until| now <= until)
    }

    /// Full validation applied before an area is saved.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TrackingError::validation("area name must not be empty"));
        }
        if !(1..=5).contains(&self.severity_level) {
            return Err(TrackingError::validation(format!(
                "severity_level must be 1-5, got {}",
                self.severity_level
            )));
        }
        if let Some(buffer) = self.buffer_distance_meters {
            if !buffer.is_finite() || !(0.0..=MAX_BUFFER_DISTANCE_METERS).contains(&buffer) {
                return Err(TrackingError::validation(format!(
                    "buffer_distance_meters must be 0-{MAX_BUFFER_DISTANCE_METERS}, got {buffer}"
                )));
            }
        }
        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if from > until {
                return Err(TrackingError::validation(
                    "valid_from must not be after valid_until",
                ));
            }
        }
        self.polygon()?;
        Ok(())
    }
}

// ============================================================================
// Violations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    Entry,
    ApproachWarning,
    ProlongedStay,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::Entry => "entry",
            ViolationType::ApproachWarning => "approach_warning",
            ViolationType::ProlongedStay => "prolonged_stay",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            ViolationType::Entry,
            ViolationType::ApproachWarning,
            ViolationType::ProlongedStay,
        ]
        .into_iter()
        .find(|t| t.as_str() == value)
    }
}

/// A recorded entry into (or approach to) a restricted area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceViolation {
    pub id: ViolationId,
    pub user_id: UserId,
    pub area_id: AreaId,
    pub trip_id: Option<TripId>,
    pub violation_type: ViolationType,
    pub location: GpsPoint,
    pub detected_at: i64,
    pub resolved_at: Option<i64>,
    pub resolved_by: Option<UserId>,
    pub notes: Option<String>,
    pub notification_sent: bool,
    pub authorities_alerted: bool,
    pub severity_score: u8,
}

impl GeofenceViolation {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
