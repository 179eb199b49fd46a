//! External collaborators consumed by the engine, and the clock.
//!
//! The itinerary catalog, the device registry and the trek-path library live
//! outside this crate. They are reached through the small traits below so
//! hosts can plug in their own services and tests can use fixed answers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use crate::model::{DayPlan, Trip};

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" in epoch seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock backed by chrono.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// RFC 3339 rendering of an epoch-seconds timestamp.
pub fn format_timestamp(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}

// ============================================================================
// Device registry
// ============================================================================

/// Answers whether a tracking device exists and is active.
pub trait DeviceRegistry: Send + Sync {
    fn is_device_valid(&self, device_id: &str) -> bool;
}

/// Registry that accepts any non-empty device id.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllDevices;

impl DeviceRegistry for AcceptAllDevices {
    fn is_device_valid(&self, device_id: &str) -> bool {
        !device_id.trim().is_empty()
    }
}

/// Registry with a fixed set of active devices.
#[derive(Debug, Default, Clone)]
pub struct StaticDeviceRegistry {
    devices: HashSet<String>,
}

impl StaticDeviceRegistry {
    pub fn new<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            devices: devices.into_iter().map(Into::into).collect(),
        }
    }
}

impl DeviceRegistry for StaticDeviceRegistry {
    fn is_device_valid(&self, device_id: &str) -> bool {
        self.devices.contains(device_id)
    }
}

// ============================================================================
// Itinerary
// ============================================================================

/// Supplies the day plan used to seed `start_day`.
pub trait ItineraryProvider: Send + Sync {
    fn day_plan(&self, trip: &Trip) -> Option<DayPlan>;
}

/// No itinerary service attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoItinerary;

impl ItineraryProvider for NoItinerary {
    fn day_plan(&self, _trip: &Trip) -> Option<DayPlan> {
        None
    }
}

impl<F> ItineraryProvider for F
where
    F: Fn(&Trip) -> Option<DayPlan> + Send + Sync,
{
    fn day_plan(&self, trip: &Trip) -> Option<DayPlan> {
        self(trip)
    }
}

// ============================================================================
// Trek paths
// ============================================================================

/// Pre-authored trek path. Passed through opaquely; the engine never
/// interprets waypoints or notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrekPath {
    pub id: i64,
    pub trek_id: i64,
    pub name: String,
    pub total_distance_meters: f64,
    pub estimated_duration_hours: f64,
    pub waypoints: serde_json::Value,
    pub safety_notes: Option<String>,
}

impl TrekPath {
    /// Value stored as a segment's `path_ref`.
    pub fn reference(&self) -> String {
        self.id.to_string()
    }
}

pub trait TrekPathProvider: Send + Sync {
    fn trek_path(&self, trek_id: i64) -> Option<TrekPath>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoTrekPaths;

impl TrekPathProvider for NoTrekPaths {
    fn trek_path(&self, _trek_id: i64) -> Option<TrekPath> {
        None
    }
}

impl TrekPathProvider for Vec<TrekPath> {
    fn trek_path(&self, trek_id: i64) -> Option<TrekPath> {
        self.iter().find(|p| p.trek_id == trek_id).cloned()
    }
}
