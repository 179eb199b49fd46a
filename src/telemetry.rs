//! # Telemetry Ingestion
//!
//! Validates incoming GPS samples, attributes them to a trip and phase, and
//! appends them to the trip's history.
//!
//! Batches are processed sample by sample in the order received. A bad
//! sample is reported with its index and reason and never aborts the rest of
//! the batch; only a batch larger than the configured limit is refused as a
//! whole. Ingestion does not evaluate geofences.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};
use crate::model::{LocationSample, LocationSource, Phase, TrekPhase, Trip, TripId, UserId};
use crate::store::TrackingStore;
use crate::GpsPoint;

/// A sample as submitted by a phone, tracking device or operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleInput {
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    #[serde(default = "default_source")]
    pub source: LocationSource,
    /// Overrides the trip's current phase when set
    pub trip_phase: Option<Phase>,
    pub device_id: Option<String>,
    pub battery_level: Option<f64>,
    pub signal_strength: Option<i32>,
    #[serde(default)]
    pub is_waypoint: bool,
}

fn default_source() -> LocationSource {
    LocationSource::MobileGps
}

impl SampleInput {
    /// A plain phone sample.
    pub fn new(timestamp: i64, latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            altitude: None,
            accuracy: None,
            speed: None,
            bearing: None,
            source: LocationSource::MobileGps,
            trip_phase: None,
            device_id: None,
            battery_level: None,
            signal_strength: None,
            is_waypoint: false,
        }
    }

    /// Mark the sample as coming from a dedicated tracking device.
    pub fn from_device(mut self, device_id: impl Into<String>) -> Self {
        self.source = LocationSource::TrackingDevice;
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_source(mut self, source: LocationSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.trip_phase = Some(phase);
        self
    }

    pub fn location(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }

    /// Field-level checks that need no trip context.
    pub fn validate(&self) -> Result<()> {
        if !self.location().is_valid() {
            return Err(TrackingError::validation(format!(
                "coordinate ({}, {}) is out of range",
                self.latitude, self.longitude
            )));
        }
        check_optional("accuracy", self.accuracy, |v| v >= 0.0)?;
        check_optional("speed", self.speed, |v| v >= 0.0)?;
        check_optional("bearing", self.bearing, |v| (0.0..=360.0).contains(&v))?;
        check_optional("battery_level", self.battery_level, |v| {
            (0.0..=100.0).contains(&v)
        })?;
        check_optional("altitude", self.altitude, |_| true)?;
        if self.source == LocationSource::TrackingDevice
            && self.device_id.as_deref().is_none_or(|d| d.trim().is_empty())
        {
            return Err(TrackingError::validation(
                "tracking device samples require a device_id",
            ));
        }
        Ok(())
    }
}

fn check_optional(field: &str, value: Option<f64>, ok: impl Fn(f64) -> bool) -> Result<()> {
    match value {
        Some(v) if !v.is_finite() || !ok(v) => Err(TrackingError::validation(format!(
            "{field} value {v} is out of range"
        ))),
        _ => Ok(()),
    }
}

/// A single real-time position push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveUpdate {
    pub trip_id: TripId,
    pub user_id: UserId,
    pub sample: SampleInput,
    /// Stored as a waypoint and surfaced to admin monitoring
    #[serde(default)]
    pub emergency: bool,
}

/// Acknowledgement for an accepted live update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleAck {
    pub accepted: bool,
    pub seq: i64,
    pub trip_phase: Option<Phase>,
    pub is_waypoint: bool,
}

/// Why one sample of a batch was refused.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedSample {
    pub index: usize,
    pub reason: TrackingError,
}

/// Outcome of a batch: accepted count plus every rejection by index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchIngestReport {
    pub accepted: usize,
    pub rejected: Vec<RejectedSample>,
    /// Stored samples in submission order
    #[serde(skip)]
    pub stored: Vec<LocationSample>,
}

impl BatchIngestReport {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Validates and appends telemetry.
pub struct TelemetryIngestor {
    store: Arc<dyn TrackingStore>,
    max_batch_size: usize,
}

impl TelemetryIngestor {
    pub fn new(store: Arc<dyn TrackingStore>, max_batch_size: usize) -> Self {
        Self {
            store,
            max_batch_size,
        }
    }

    /// Ingest an ordered batch for one trip.
    ///
    /// `phase_tag` applies to samples that carry no phase of their own;
    /// samples with neither are tagged with the trip's current phase.
    /// `notes` is attached to every stored sample.
    pub fn ingest_batch(
        &self,
        trip_id: TripId,
        user_id: UserId,
        samples: &[SampleInput],
        phase_tag: Option<Phase>,
        notes: Option<&str>,
    ) -> Result<BatchIngestReport> {
        if samples.len() > self.max_batch_size {
            return Err(TrackingError::validation(format!(
                "batch of {} samples exceeds the limit of {}",
                samples.len(),
                self.max_batch_size
            )));
        }

        // One trip snapshot per batch; a transition racing this batch is
        // observed by the next one.
        let trip = self.store.get_trip(trip_id)?;
        let mut report = BatchIngestReport::default();

        for (index, input) in samples.iter().enumerate() {
            let accepted = self
                .prepare(trip.as_ref(), trip_id, user_id, input, phase_tag)
                .and_then(|mut sample| {
                    sample.notes = notes.map(str::to_string);
                    self.store.append_sample(sample)
                });

            match accepted {
                Ok(stored) => {
                    report.accepted += 1;
                    report.stored.push(stored);
                }
                Err(reason) => report.rejected.push(RejectedSample { index, reason }),
            }
        }

        if !report.rejected.is_empty() {
            log::info!(
                "[TelemetryIngestor] Trip {}: accepted {}, rejected {} of {} samples",
                trip_id,
                report.accepted,
                report.rejected.len(),
                samples.len()
            );
        }

        Ok(report)
    }

    /// Ingest a single live update.
    pub fn ingest_live(&self, update: &LiveUpdate) -> Result<SampleAck> {
        Ok(self.ingest_live_stored(update)?.1)
    }

    /// Like [`ingest_live`](Self::ingest_live) but also returns the stored
    /// sample.
    pub(crate) fn ingest_live_stored(
        &self,
        update: &LiveUpdate,
    ) -> Result<(LocationSample, SampleAck)> {
        let trip = self.store.get_trip(update.trip_id)?;
        let mut sample = self.prepare(
            trip.as_ref(),
            update.trip_id,
            update.user_id,
            &update.sample,
            None,
        )?;

        if update.emergency {
            sample.is_waypoint = true;
            log::warn!(
                "[TelemetryIngestor] EMERGENCY from user {} on trip {} at ({:.6}, {:.6})",
                update.user_id,
                update.trip_id,
                sample.location.latitude,
                sample.location.longitude
            );
        }

        let stored = self.store.append_sample(sample)?;
        let ack = SampleAck {
            accepted: true,
            seq: stored.seq,
            trip_phase: stored.trip_phase,
            is_waypoint: stored.is_waypoint,
        };
        Ok((stored, ack))
    }

    /// Validate one sample against the trip and build the record to store.
    fn prepare(
        &self,
        trip: Option<&Trip>,
        trip_id: TripId,
        user_id: UserId,
        input: &SampleInput,
        phase_tag: Option<Phase>,
    ) -> Result<LocationSample> {
        input.validate()?;

        let trip = trip.ok_or(TrackingError::NotFound {
            entity: "trip",
            id: trip_id.0,
        })?;
        if trip.user_id != user_id {
            return Err(TrackingError::validation(format!(
                "trip {} does not belong to user {}",
                trip_id, user_id
            )));
        }
        if !trip.tracking_active {
            return Err(TrackingError::TrackingInactive { trip_id: trip_id.0 });
        }

        let trip_phase = input.trip_phase.or(phase_tag).or(trip.current_phase());
        if let Some(phase) = trip_phase {
            if phase.trip_type() != trip.trip_type() {
                return Err(TrackingError::validation(format!(
                    "phase {} does not apply to a {} trip",
                    phase,
                    trip.trip_type()
                )));
            }
        }

        if input.source == LocationSource::MobileGps
            && trip.current_phase() == Some(Phase::Trek(TrekPhase::TrekActive))
        {
            log::debug!(
                "[TelemetryIngestor] Trip {}: accepting phone sample at {} during TREK_ACTIVE",
                trip_id,
                input.timestamp
            );
        }

        Ok(LocationSample {
            seq: 0,
            trip_id,
            user_id,
            timestamp: input.timestamp,
            location: input.location(),
            altitude: input.altitude,
            accuracy: input.accuracy,
            speed: input.speed,
            bearing: input.bearing,
            source: input.source,
            trip_phase,
            device_id: input.device_id.clone(),
            battery_level: input.battery_level,
            signal_strength: input.signal_strength,
            is_waypoint: input.is_waypoint,
            notes: None,
        })
    }
}
