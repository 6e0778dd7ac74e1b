//! Synthetic CTRV drives
//!
//! Generates a ground-truth trajectory from a list of constant-rate segments
//! and the matching noisy measurement stream. Seeded, so the same config
//! always yields the same drive.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{FilterError, FilterResult};
use crate::filters::ctrv::{wrap_angle, CtrvModel, Regime};
use crate::types::{
    StateVec, StepInput, IDX_HEADING, IDX_SPEED, IDX_X, IDX_Y, IDX_YAW_RATE, STATE_DIM,
};

/// Constant speed and yaw rate held for a number of steps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriveSegment {
    pub steps: usize,
    pub speed: f64,
    pub yaw_rate: f64,
}

impl DriveSegment {
    pub fn new(steps: usize, speed: f64, yaw_rate: f64) -> Self {
        Self {
            steps,
            speed,
            yaw_rate,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub dt: f64,
    /// A fix is emitted on every n-th step, starting with the first
    pub gps_every: usize,
    /// [x, y, heading, speed, yaw_rate] at step 0
    pub initial: [f64; STATE_DIM],
    pub segments: Vec<DriveSegment>,
    pub position_noise_std: f64,
    pub heading_noise_std: f64,
    pub speed_noise_std: f64,
    pub yaw_rate_noise_std: f64,
    pub seed: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            dt: 1.0 / 50.0,
            gps_every: 50,
            initial: [0.0, 0.0, 0.0, 10.0, 0.0],
            segments: vec![
                DriveSegment::new(500, 10.0, 0.0),
                DriveSegment::new(300, 8.0, 0.2),
                DriveSegment::new(500, 14.0, 0.0),
                DriveSegment::new(200, 6.0, -0.35),
            ],
            position_noise_std: 3.0,
            heading_noise_std: 0.05,
            speed_noise_std: 0.2,
            yaw_rate_noise_std: 0.005,
            seed: 42,
        }
    }
}

impl DriveConfig {
    /// Total number of steps produced, the initial one included.
    pub fn total_steps(&self) -> usize {
        1 + self.segments.iter().map(|s| s.steps).sum::<usize>()
    }
}

/// One step of a simulated drive.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatedStep {
    pub truth: StateVec,
    pub input: StepInput,
}

/// Iterator over the steps of a simulated drive.
pub struct DriveSimulator {
    config: DriveConfig,
    model: CtrvModel,
    rng: StdRng,
    position_noise: Normal<f64>,
    heading_noise: Normal<f64>,
    speed_noise: Normal<f64>,
    yaw_rate_noise: Normal<f64>,
    truth: StateVec,
    /// (segment, step within segment) of the next step to emit
    cursor: (usize, usize),
    emitted: usize,
}

impl DriveSimulator {
    pub fn new(config: DriveConfig) -> FilterResult<Self> {
        if !(config.dt.is_finite() && config.dt > 0.0) {
            return Err(FilterError::NonPositiveDt(config.dt));
        }
        if config.gps_every == 0 {
            return Err(FilterError::InvalidConfig("gps_every must be at least 1".into()));
        }
        if config.initial.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::NonFiniteInput(format!(
                "initial drive state {:?}",
                config.initial
            )));
        }

        let mut truth = StateVec::from(config.initial);
        truth[IDX_HEADING] = wrap_angle(truth[IDX_HEADING]);

        Ok(Self {
            model: CtrvModel::default(),
            rng: StdRng::seed_from_u64(config.seed),
            position_noise: noise("position_noise_std", config.position_noise_std)?,
            heading_noise: noise("heading_noise_std", config.heading_noise_std)?,
            speed_noise: noise("speed_noise_std", config.speed_noise_std)?,
            yaw_rate_noise: noise("yaw_rate_noise_std", config.yaw_rate_noise_std)?,
            truth,
            cursor: (0, 0),
            emitted: 0,
            config,
        })
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    fn next_segment(&mut self) -> Option<DriveSegment> {
        while let Some(segment) = self.config.segments.get(self.cursor.0) {
            if self.cursor.1 < segment.steps {
                self.cursor.1 += 1;
                return Some(segment.clone());
            }
            self.cursor = (self.cursor.0 + 1, 0);
        }
        None
    }

    /// Advance the true state along an exact arc (or line) with the
    /// segment's speed and yaw rate held.
    fn advance_truth(&mut self, segment: &DriveSegment) {
        self.truth[IDX_SPEED] = segment.speed;
        self.truth[IDX_YAW_RATE] = segment.yaw_rate;
        let regime = if segment.yaw_rate == 0.0 {
            Regime::Straight
        } else {
            Regime::Turning
        };
        let mut next = self.model.transition(&self.truth, self.config.dt, regime);
        // The model's straight branch nudges the rate; the truth keeps it exact
        next[IDX_YAW_RATE] = segment.yaw_rate;
        self.truth = next;
    }

    fn measure(&mut self) -> StepInput {
        let rng = &mut self.rng;
        let mut input = StepInput::new(
            self.config.dt,
            self.truth[IDX_YAW_RATE] + self.yaw_rate_noise.sample(rng),
            self.truth[IDX_SPEED] + self.speed_noise.sample(rng),
        );

        if self.emitted % self.config.gps_every == 0 {
            let x = self.truth[IDX_X] + self.position_noise.sample(rng);
            let y = self.truth[IDX_Y] + self.position_noise.sample(rng);
            let heading = wrap_angle(self.truth[IDX_HEADING] + self.heading_noise.sample(rng));
            input = input.with_position(x, y).with_heading(heading);
        }
        input
    }
}

impl Iterator for DriveSimulator {
    type Item = SimulatedStep;

    fn next(&mut self) -> Option<SimulatedStep> {
        if self.emitted > 0 {
            let segment = self.next_segment()?;
            self.advance_truth(&segment);
        }

        let input = self.measure();
        self.emitted += 1;
        Some(SimulatedStep {
            truth: self.truth,
            input,
        })
    }
}

fn noise(name: &str, std: f64) -> FilterResult<Normal<f64>> {
    if !(std.is_finite() && std >= 0.0) {
        return Err(FilterError::InvalidConfig(format!(
            "{name} must be non-negative, got {std}"
        )));
    }
    Normal::new(0.0, std)
        .map_err(|e| FilterError::InvalidConfig(format!("{name} = {std}: {e}")))
}

/// Run a whole drive into memory.
pub fn simulate(config: DriveConfig) -> FilterResult<Vec<SimulatedStep>> {
    Ok(DriveSimulator::new(config)?.collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn quiet(config: DriveConfig) -> DriveConfig {
        DriveConfig {
            position_noise_std: 0.0,
            heading_noise_std: 0.0,
            speed_noise_std: 0.0,
            yaw_rate_noise_std: 0.0,
            ..config
        }
    }

    #[test]
    fn test_step_count_and_gps_cadence() {
        let config = DriveConfig {
            gps_every: 5,
            segments: vec![DriveSegment::new(12, 5.0, 0.0), DriveSegment::new(8, 5.0, 0.1)],
            ..DriveConfig::default()
        };
        let steps = simulate(config.clone()).unwrap();

        assert_eq!(steps.len(), config.total_steps());
        assert_eq!(steps.len(), 21);
        for (i, step) in steps.iter().enumerate() {
            assert_eq!(step.input.has_fix(), i % 5 == 0, "step {i}");
            assert_eq!(step.input.dt, config.dt);
        }
    }

    #[test]
    fn test_same_seed_same_drive() {
        let a = simulate(DriveConfig::default()).unwrap();
        let b = simulate(DriveConfig::default()).unwrap();
        assert_eq!(a, b);

        let c = simulate(DriveConfig {
            seed: 7,
            ..DriveConfig::default()
        })
        .unwrap();
        assert_ne!(a[0].input, c[0].input);
    }

    #[test]
    fn test_noiseless_straight_drive() {
        let config = quiet(DriveConfig {
            dt: 0.1,
            gps_every: 1,
            initial: [0.0, 0.0, 0.0, 10.0, 0.0],
            segments: vec![DriveSegment::new(10, 10.0, 0.0)],
            ..DriveConfig::default()
        });
        let steps = simulate(config).unwrap();
        let last = steps.last().unwrap();

        assert_abs_diff_eq!(last.truth[IDX_X], 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(last.truth[IDX_Y], 0.0, epsilon = 1e-9);
        assert_eq!(last.truth[IDX_YAW_RATE], 0.0);
        let fix = last.input.position.unwrap();
        assert_abs_diff_eq!(fix.x, last.truth[IDX_X], epsilon = 1e-12);
    }

    #[test]
    fn test_full_circle_returns_home() {
        // 2π / (0.5 rad/s) = 4π s
        let dt = 4.0 * std::f64::consts::PI / 1000.0;
        let config = quiet(DriveConfig {
            dt,
            initial: [0.0, 0.0, 0.0, 5.0, 0.5],
            segments: vec![DriveSegment::new(1000, 5.0, 0.5)],
            ..DriveConfig::default()
        });
        let last = simulate(config).unwrap().pop().unwrap();

        assert_abs_diff_eq!(last.truth[IDX_X], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(last.truth[IDX_Y], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(last.truth[IDX_HEADING], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(matches!(
            DriveSimulator::new(DriveConfig {
                gps_every: 0,
                ..DriveConfig::default()
            }),
            Err(FilterError::InvalidConfig(_))
        ));
        assert!(matches!(
            DriveSimulator::new(DriveConfig {
                position_noise_std: -1.0,
                ..DriveConfig::default()
            }),
            Err(FilterError::InvalidConfig(_))
        ));
        assert!(matches!(
            DriveSimulator::new(DriveConfig {
                yaw_rate_noise_std: f64::NAN,
                ..DriveConfig::default()
            }),
            Err(FilterError::InvalidConfig(_))
        ));
        assert_eq!(
            DriveSimulator::new(DriveConfig {
                dt: 0.0,
                ..DriveConfig::default()
            })
            .err(),
            Some(FilterError::NonPositiveDt(0.0))
        );
    }
}
