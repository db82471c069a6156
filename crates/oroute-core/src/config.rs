//! Tunable constants for gestures, momentum and view sharing.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid scale range: {min}..{max}")]
    ScaleRange { min: f64, max: f64 },
}

/// Canvas behaviour settings.
///
/// Every field has a default, so a partial JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Lower bound for the view scale.
    pub scale_min: f64,
    /// Upper bound for the view scale.
    pub scale_max: f64,
    /// Zoom base applied per `scroll_per_scale` units of wheel delta.
    pub scale_by: f64,
    /// Wheel delta that corresponds to one `scale_by` step.
    pub scroll_per_scale: f64,
    /// Degrees of rotation per unit of wheel delta (Ctrl + wheel).
    pub rotate_by: f64,
    /// Momentum velocity is divided by this every step.
    pub friction: f64,
    /// Momentum stops once the speed drops below this (px per step).
    pub momentum_stop_speed: f64,
    /// Rotation snaps to multiples of this angle.
    pub snap_step_degrees: f64,
    /// Distance from a snap angle that triggers snapping.
    pub snap_tolerance_degrees: f64,
    /// Pinch distances are floored to this to avoid dividing by zero.
    pub min_pinch_distance: f64,
    /// Minimum interval between two leader broadcasts.
    pub broadcast_interval_ms: u64,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            scale_min: 0.1,
            scale_max: 5.0,
            scale_by: 1.1,
            scroll_per_scale: 160.0,
            rotate_by: 0.02,
            friction: 1.05,
            momentum_stop_speed: 1.0,
            snap_step_degrees: 90.0,
            snap_tolerance_degrees: 1.0,
            min_pinch_distance: 1.0,
            broadcast_interval_ms: 33,
        }
    }
}

impl CanvasConfig {
    /// Parse a config from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject scale ranges that `zoom_at` cannot clamp into.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.scale_min > 0.0 && self.scale_min <= self.scale_max) {
            return Err(ConfigError::ScaleRange {
                min: self.scale_min,
                max: self.scale_max,
            });
        }
        Ok(())
    }

    /// Leader broadcast cadence.
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }
}
