//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunables for ingestion and geofence evaluation.
///
/// All fields have defaults, so a host can load a partial JSON document:
///
/// ```
/// use trip_tracker::TrackingConfig;
/// let config: TrackingConfig = serde_json::from_str(r#"{"max_batch_size": 50}"#).unwrap();
/// assert_eq!(config.max_batch_size, 50);
/// assert_eq!(config.default_buffer_distance_meters, 100.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Batches with more samples than this are refused as a whole.
    pub max_batch_size: usize,

    /// Warning radius for areas that do not carry their own buffer.
    pub default_buffer_distance_meters: f64,

    /// How long a loaded area snapshot may be served before reloading.
    pub area_cache_ttl_secs: i64,

    /// Record `approach_warning` violations in addition to entries.
    pub log_approach_warnings: bool,

    /// Let the engine evaluate geofences for every accepted sample.
    pub evaluate_geofences_on_ingest: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            default_buffer_distance_meters: 100.0,
            area_cache_ttl_secs: 60,
            log_approach_warnings: false,
            evaluate_geofences_on_ingest: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackingConfig::default();
        assert_eq!(config.max_batch_size, 500);
        assert_eq!(config.area_cache_ttl_secs, 60);
        assert!(!config.log_approach_warnings);
        assert!(!config.evaluate_geofences_on_ingest);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: TrackingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TrackingConfig::default());
    }
}
