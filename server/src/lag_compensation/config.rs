//! Tunables for history retention, rewind validity and stuck-position recovery.
//!
//! Loaded from JSON; every field is optional and falls back to its default.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read compensation config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse compensation config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid compensation config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompensationConfig {
    /// Global switch. When off nothing is recorded and sessions open empty.
    pub enabled: bool,
    /// Oldest history kept and the furthest any rewind may reach.
    pub max_compensation_window_seconds: f64,
    /// Consecutive samples further apart than this break the trajectory.
    pub teleport_distance_threshold: f32,
    pub self_compensation_enabled: bool,
    /// Fraction of the clear path kept when clamping a stuck rewind.
    pub restore_damping_factor: f32,
    /// Half-angle of the cone outside which animation is not rewound.
    pub angular_cone_filter_degrees: Option<f32>,
    /// Added to a shot's range before the cone filter rejects by distance.
    pub cone_filter_range_slack: f32,
    /// Maximum allowed disagreement between the command timestamp and the
    /// measured latency before the latency wins.
    pub timestamp_tolerance_seconds: f64,
    pub fix_stuck_enabled: bool,
    /// Server tick rate; only sizes the per-entity sample buffers.
    pub tick_rate: u32,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_compensation_window_seconds: 1.0,
            teleport_distance_threshold: 64.0,
            self_compensation_enabled: false,
            restore_damping_factor: 0.95,
            angular_cone_filter_degrees: None,
            cone_filter_range_slack: 64.0,
            timestamp_tolerance_seconds: 0.2,
            fix_stuck_enabled: true,
            tick_rate: 64,
        }
    }
}

impl CompensationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: CompensationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.max_compensation_window_seconds.is_finite()
            || self.max_compensation_window_seconds < 0.0
        {
            return Err(ConfigError::Invalid(format!(
                "max_compensation_window_seconds must be a non-negative number, got {}",
                self.max_compensation_window_seconds
            )));
        }
        if !(self.teleport_distance_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "teleport_distance_threshold must be positive, got {}",
                self.teleport_distance_threshold
            )));
        }
        if !(self.restore_damping_factor > 0.0 && self.restore_damping_factor <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "restore_damping_factor must be in (0, 1], got {}",
                self.restore_damping_factor
            )));
        }
        if let Some(cone) = self.angular_cone_filter_degrees {
            if !(cone > 0.0 && cone <= 180.0) {
                return Err(ConfigError::Invalid(format!(
                    "angular_cone_filter_degrees must be in (0, 180], got {}",
                    cone
                )));
            }
        }
        if !(self.timestamp_tolerance_seconds >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "timestamp_tolerance_seconds must be non-negative, got {}",
                self.timestamp_tolerance_seconds
            )));
        }
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be positive".to_string()));
        }
        Ok(())
    }

    pub fn teleport_distance_squared(&self) -> f32 {
        self.teleport_distance_threshold * self.teleport_distance_threshold
    }

    /// Expected number of samples one history log holds at steady state.
    pub fn history_capacity(&self) -> usize {
        (self.max_compensation_window_seconds * self.tick_rate as f64).ceil() as usize + 2
    }
}
