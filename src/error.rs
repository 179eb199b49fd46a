//! Unified error handling for the trip-tracker library.
//!
//! Every fallible operation returns [`TrackingError`]. Sample-level failures
//! during batch ingestion are reported per index instead of being raised, and
//! geometry failures during geofence evaluation are isolated per area, so the
//! variants here describe *why* something was refused rather than how far it
//! propagates.

use serde::Serialize;
use thiserror::Error;

use crate::geometry::GeometryError;

/// Unified error type for trip-tracker operations.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackingError {
    /// Malformed input (coordinate out of range, missing field, bad batch)
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// A workflow button was pressed while the trip was in the wrong state
    #[error("Cannot {operation}: trip must be {expected}, but is {actual}")]
    InvalidTransition {
        operation: &'static str,
        expected: String,
        actual: String,
    },

    /// `start_trek` before any device was linked
    #[error("Trip {trip_id} has no tracking device linked")]
    DeviceNotLinked { trip_id: i64 },

    /// `start_trek` with a device other than the linked one
    #[error("Device '{provided}' does not match linked device '{linked}'")]
    DeviceMismatch { linked: String, provided: String },

    /// The device registry rejected the device
    #[error("Device '{device_id}' is unknown or inactive")]
    UnknownDevice { device_id: String },

    /// Telemetry for a trip that is not currently being tracked
    #[error("Tracking is not active for trip {trip_id}")]
    TrackingInactive { trip_id: i64 },

    /// Invalid polygon geometry
    #[error("Invalid geometry: {reason}")]
    Geometry { reason: GeometryError },

    /// Unknown trip/segment/area/violation id
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A trip can have at most one incomplete segment
    #[error("Trip {trip_id} already has open segment {segment_id}")]
    SegmentAlreadyOpen { trip_id: i64, segment_id: i64 },

    /// Segment statistics are frozen once computed
    #[error("Segment {segment_id} is already completed")]
    SegmentAlreadyCompleted { segment_id: i64 },

    /// Violations are resolved at most once
    #[error("Violation {violation_id} is already resolved")]
    ViolationAlreadyResolved { violation_id: i64 },

    /// Persistence/storage error
    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl TrackingError {
    pub fn validation(message: impl Into<String>) -> Self {
        TrackingError::Validation {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        TrackingError::Storage {
            message: message.into(),
        }
    }
}

impl From<GeometryError> for TrackingError {
    fn from(err: GeometryError) -> Self {
        TrackingError::Geometry { reason: err }
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for TrackingError {
    fn from(err: rusqlite::Error) -> Self {
        TrackingError::storage(err.to_string())
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite_migration::Error> for TrackingError {
    fn from(err: rusqlite_migration::Error) -> Self {
        TrackingError::storage(format!("migration failed: {err}"))
    }
}

impl From<serde_json::Error> for TrackingError {
    fn from(err: serde_json::Error) -> Self {
        TrackingError::storage(format!("corrupt JSON column: {err}"))
    }
}

/// Result type alias for trip-tracker operations.
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Extension trait for converting a missing lookup into `NotFound`.
pub trait OptionExt<T> {
    /// Convert Option to Result with a not-found error for `entity`/`id`.
    fn or_not_found(self, entity: &'static str, id: i64) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, entity: &'static str, id: i64) -> Result<T> {
        self.ok_or(TrackingError::NotFound { entity, id })
    }
}
