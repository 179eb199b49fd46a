//! # Trip Tracker
//!
//! Trip phase tracking, GPS telemetry ingestion and geofence evaluation for
//! guided multi-day itineraries.
//!
//! This library provides:
//! - A button-driven trip state machine for trekking and sightseeing days
//! - Batch and live telemetry ingestion with per-sample rejection reporting
//! - Restricted-area evaluation (point-in-polygon and warning buffers)
//! - Route segments with distance/speed statistics derived from telemetry
//! - Read-only trip rollups and an admin monitoring snapshot
//!
//! ## Features
//!
//! - **`parallel`** - Evaluate restricted areas in parallel with rayon
//! - **`persistence`** - SQLite-backed [`TrackingStore`]
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trip_tracker::{DayPlan, GpsPoint, NamedLocation, StartDay, TrackingEngine, UserId};
//!
//! let engine = TrackingEngine::in_memory();
//! let plan = DayPlan::tour(
//!     NamedLocation::new("Hotel", GpsPoint::new(12.97, 77.59)),
//!     NamedLocation::new("Palace", GpsPoint::new(12.99, 77.61)),
//! );
//! let trip = engine.assign_trip(UserId(1), &plan).unwrap();
//! let started = engine.start_day(trip.id, StartDay::from_plan(&plan)).unwrap();
//! assert_eq!(started.route_to.name, "Palace");
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackingError};

// Configuration
pub mod config;
pub use config::TrackingConfig;

// Pure geometry (point-in-polygon, distances, polygon validation)
pub mod geometry;
pub use geometry::{GeometryError, Polygon};

// Domain records and typed ids
pub mod model;
pub use model::{
    AreaId, AreaStatus, AreaType, DayPlan, DeviceLink, GeofenceViolation, LastKnownLocation,
    LocationSample, LocationSource, Phase, RestrictedArea, RouteSegment, SegmentClose, SegmentId,
    SegmentStats, TourPhase, TrekPhase, Trip, TripId, TripKind, TripStatus, TripType, UserId,
    ViolationId, ViolationType,
};

// External collaborators and the clock
pub mod collaborators;
pub use collaborators::{
    AcceptAllDevices, Clock, DeviceRegistry, ItineraryProvider, ManualClock, NoItinerary,
    NoTrekPaths, StaticDeviceRegistry, SystemClock, TrekPath, TrekPathProvider,
};

// Storage seam
pub mod store;
pub use store::{MemoryStore, SampleCounts, TrackingStore, TripTransition};

// SQLite-backed store
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteStore;

// Telemetry ingestion
pub mod telemetry;
pub use telemetry::{
    BatchIngestReport, LiveUpdate, RejectedSample, SampleAck, SampleInput, TelemetryIngestor,
};

// Route segments and their statistics
pub mod segments;
pub use segments::{compute_segment_stats, SegmentTracker};

// Restricted-area evaluation
pub mod geofence;
pub use geofence::{AreaHit, GeofenceEvaluator, GeofenceResult, Subject};

// Trip state machine
pub mod workflow;
pub use workflow::{
    Action, CancelOutcome, CompleteDayOutcome, EndTrekOutcome, LinkDeviceOutcome,
    ReturnOutcome, StartDay, StartDayOutcome, StartTrekOutcome, TripLocks, TripPhaseController,
    TripStatusView, VisitingOutcome, WorkflowResponse,
};

// Read-only rollups
pub mod stats;
pub use stats::{ActiveTripSnapshot, TripStatsAggregator, TripTrackingStats};

// Engine facade (wires everything, optional global singleton)
pub mod engine;
pub use engine::{install_engine, with_engine, TrackingEngine, TrackingEngineBuilder, ENGINE};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use trip_tracker::GpsPoint;
/// let point = GpsPoint::new(28.6139, 77.2090); // New Delhi
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// A coordinate with a human-readable name (hotel, destination, trek start).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedLocation {
    pub name: String,
    pub location: GpsPoint,
}

impl NamedLocation {
    pub fn new(name: impl Into<String>, location: GpsPoint) -> Self {
        Self {
            name: name.into(),
            location,
        }
    }
}
