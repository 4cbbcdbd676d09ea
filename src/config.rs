//! Tunables for the location adapter and the ride recorder.
//!
//! Both structs implement `Default` with the values the driver app ships
//! with, and can be parsed from JSON (the FFI layer passes configuration as
//! JSON strings).

use serde::{Deserialize, Serialize};

use crate::error::{RideError, Result};
use crate::geo_utils::DEFAULT_MOVEMENT_THRESHOLD_DEGREES;
use crate::location::PositionOptions;

/// Configuration for GPS tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum lat/lng delta (degrees) before a fix becomes a trail point.
    /// Default: 0.0001 (~10-15 meters)
    pub min_movement_degrees: f64,

    /// One-shot fix requested on activation.
    /// Default: high accuracy, no cached positions, 5s timeout
    pub initial_fix: PositionOptions,

    /// Continuous watch.
    /// Default: high accuracy, no cached positions, 15s timeout
    pub watch: PositionOptions,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_movement_degrees: DEFAULT_MOVEMENT_THRESHOLD_DEGREES,
            initial_fix: PositionOptions {
                high_accuracy: true,
                maximum_age_ms: 0,
                timeout_ms: 5_000,
            },
            watch: PositionOptions {
                high_accuracy: true,
                maximum_age_ms: 0,
                timeout_ms: 15_000,
            },
        }
    }
}

impl TrackerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| RideError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min_movement_degrees.is_finite() || self.min_movement_degrees < 0.0 {
            return Err(RideError::Config {
                message: format!(
                    "min_movement_degrees must be a non-negative number, got {}",
                    self.min_movement_degrees
                ),
            });
        }
        Ok(())
    }
}

/// Configuration for submitting finished rides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// URL the ride payload is POSTed to
    pub endpoint: String,
    /// Bearer token of the signed-in driver
    pub auth_token: Option<String>,
    /// Request timeout. Default: 30
    pub timeout_secs: u64,
    /// Retries on HTTP 429 before giving up. Default: 3
    pub max_retries: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            auth_token: None,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl RecorderConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| RideError::Config {
            message: e.to_string(),
        })?;
        if config.endpoint.trim().is_empty() {
            return Err(RideError::Config {
                message: "endpoint is required".to_string(),
            });
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.min_movement_degrees, 0.0001);
        assert_eq!(config.initial_fix.timeout_ms, 5_000);
        assert_eq!(config.watch.timeout_ms, 15_000);
        assert_eq!(config.watch.maximum_age_ms, 0);
        assert!(config.watch.high_accuracy);
    }

    #[test]
    fn test_tracker_partial_json() {
        let config = TrackerConfig::from_json(r#"{"min_movement_degrees": 0.0002}"#).unwrap();
        assert_eq!(config.min_movement_degrees, 0.0002);
        assert_eq!(config.watch, TrackerConfig::default().watch);

        assert!(TrackerConfig::from_json(r#"{"min_movement_degrees": -1}"#).is_err());
        assert!(TrackerConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_recorder_requires_endpoint() {
        assert!(RecorderConfig::from_json("{}").is_err());
        let config =
            RecorderConfig::from_json(r#"{"endpoint": "https://api.example.com/rides"}"#).unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.auth_token, None);
    }
}
