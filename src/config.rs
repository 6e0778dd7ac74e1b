//! Filter configuration
//!
//! Everything here is supplied once at construction and never changes while a
//! filter runs. Loadable from JSON; missing fields fall back to the defaults
//! tuned for a 50 Hz passenger-car log.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FilterError, FilterResult, SessionError};
use crate::types::{PosNoise, StateMat, STATE_DIM};

/// Default singularity threshold on |yaw rate| [rad/s]
pub const DEFAULT_YAW_RATE_THRESHOLD: f64 = 1e-4;

/// Physical bounds used to size the process noise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessNoiseBounds {
    /// Max longitudinal acceleration [m/s²]
    pub max_accel: f64,
    /// Max change of course [rad/s]
    pub max_course_rate: f64,
    /// Max yaw acceleration [rad/s²]
    pub max_yaw_accel: f64,
}

impl Default for ProcessNoiseBounds {
    fn default() -> Self {
        Self {
            max_accel: 8.8,
            max_course_rate: 0.1,
            max_yaw_accel: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Nominal step interval used to scale the process noise [s]
    pub dt: f64,
    pub process_noise: ProcessNoiseBounds,
    /// Std of each position-fix axis [m]
    pub position_std: f64,
    /// Initial covariance diagonal [x, y, heading, speed, yaw_rate]
    pub initial_covariance: [f64; STATE_DIM],
    /// Below this |yaw rate| the straight-driving equations are used [rad/s]
    pub yaw_rate_threshold: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            dt: 1.0 / 50.0,
            process_noise: ProcessNoiseBounds::default(),
            position_std: 6.0,
            initial_covariance: [1000.0; STATE_DIM],
            yaw_rate_threshold: DEFAULT_YAW_RATE_THRESHOLD,
        }
    }
}

impl FilterConfig {
    /// Load a config from a JSON file. Absent fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn validate(&self) -> FilterResult<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(FilterError::NonPositiveDt(self.dt));
        }
        if !(self.position_std.is_finite() && self.position_std > 0.0) {
            return Err(FilterError::InvalidConfig(format!(
                "position_std must be positive, got {}",
                self.position_std
            )));
        }
        for (idx, value) in self.initial_covariance.iter().enumerate() {
            if !(value.is_finite() && *value > 0.0) {
                return Err(FilterError::InvalidConfig(format!(
                    "initial_covariance[{idx}] must be positive, got {value}"
                )));
            }
        }
        if !(self.yaw_rate_threshold.is_finite() && self.yaw_rate_threshold > 0.0) {
            return Err(FilterError::InvalidConfig(format!(
                "yaw_rate_threshold must be positive, got {}",
                self.yaw_rate_threshold
            )));
        }
        let bounds = &self.process_noise;
        for (name, value) in [
            ("max_accel", bounds.max_accel),
            ("max_course_rate", bounds.max_course_rate),
            ("max_yaw_accel", bounds.max_yaw_accel),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(FilterError::InvalidConfig(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Q = diag(σ_pos², σ_pos², σ_course², σ_v², σ_yaw²)
    pub fn process_noise_matrix(&self) -> StateMat {
        let dt = self.dt;
        let bounds = &self.process_noise;
        let s_pos = 0.5 * bounds.max_accel * dt * dt;
        let s_course = bounds.max_course_rate * dt;
        let s_speed = bounds.max_accel * dt;
        let s_yaw = bounds.max_yaw_accel * dt;

        let mut q = StateMat::zeros();
        q[(0, 0)] = s_pos * s_pos;
        q[(1, 1)] = s_pos * s_pos;
        q[(2, 2)] = s_course * s_course;
        q[(3, 3)] = s_speed * s_speed;
        q[(4, 4)] = s_yaw * s_yaw;
        q
    }

    pub fn measurement_noise_matrix(&self) -> PosNoise {
        let var = self.position_std * self.position_std;
        PosNoise::new(var, 0.0, 0.0, var)
    }

    pub fn initial_covariance_matrix(&self) -> StateMat {
        let mut p = StateMat::zeros();
        for (idx, value) in self.initial_covariance.iter().enumerate() {
            p[(idx, idx)] = *value;
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_are_valid() {
        assert!(FilterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_process_noise_from_bounds() {
        let config = FilterConfig::default();
        let q = config.process_noise_matrix();
        let dt = 0.02;

        // σ_pos = 0.5 * 8.8 * dt²
        let s_pos = 0.5 * 8.8 * dt * dt;
        assert_relative_eq!(q[(0, 0)], s_pos * s_pos);
        assert_relative_eq!(q[(1, 1)], s_pos * s_pos);
        assert_relative_eq!(q[(2, 2)], (0.1 * dt) * (0.1 * dt));
        assert_relative_eq!(q[(3, 3)], (8.8 * dt) * (8.8 * dt));
        assert_relative_eq!(q[(4, 4)], dt * dt);
        assert_eq!(q[(0, 1)], 0.0);
    }

    #[test]
    fn test_measurement_noise_is_variance() {
        let r = FilterConfig::default().measurement_noise_matrix();
        assert_eq!(r[(0, 0)], 36.0);
        assert_eq!(r[(1, 1)], 36.0);
        assert_eq!(r[(0, 1)], 0.0);
    }

    #[test]
    fn test_zero_position_std_rejected() {
        let config = FilterConfig {
            position_std: 0.0,
            ..FilterConfig::default()
        };
        assert!(matches!(config.validate(), Err(FilterError::InvalidConfig(_))));
    }

    #[test]
    fn test_non_positive_initial_covariance_rejected() {
        let mut config = FilterConfig::default();
        config.initial_covariance[3] = -1.0;
        assert!(matches!(config.validate(), Err(FilterError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_dt_rejected() {
        let config = FilterConfig {
            dt: 0.0,
            ..FilterConfig::default()
        };
        assert_eq!(config.validate(), Err(FilterError::NonPositiveDt(0.0)));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: FilterConfig =
            serde_json::from_str(r#"{ "position_std": 2.5, "process_noise": { "max_accel": 4.0 } }"#)
                .unwrap();
        assert_eq!(config.position_std, 2.5);
        assert_eq!(config.process_noise.max_accel, 4.0);
        assert_eq!(config.process_noise.max_yaw_accel, 1.0);
        assert_eq!(config.yaw_rate_threshold, DEFAULT_YAW_RATE_THRESHOLD);
        assert_eq!(config.initial_covariance, [1000.0; STATE_DIM]);
    }
}
