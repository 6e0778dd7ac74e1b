//! 5-Dimensional CTRV Extended Kalman Filter
//!
//! State Vector (5D): [x, y, heading, speed, yaw_rate]
//!
//! Runs at the high-rate sensor cadence. Every step predicts; only the steps
//! that carry a GPS fix correct the position. Steps without a fix still go
//! through the correction with an all-zero measurement Jacobian, which leaves
//! state and covariance untouched.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::error::{FilterError, FilterResult};
use crate::filters::ctrv::{wrap_angle, CtrvModel, Regime};
use crate::observer::StepObserver;
use crate::types::{
    JacobianPos, KalmanGainPos, PosNoise, PosVec, PositionFix, StateMat, StateVec, StepInput,
    IDX_HEADING, IDX_SPEED, IDX_X, IDX_Y, IDX_YAW_RATE, STATE_DIM,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterPhase {
    /// Waiting for the first position fix
    Uninitialized,
    Running,
}

/// Result of one filter step.
#[derive(Clone, Debug, PartialEq)]
pub struct StepOutput {
    /// 1-based index of this output
    pub step: u64,
    /// True on the step that seeded the filter (no predict/correct ran)
    pub seeded: bool,
    /// True when a position fix was applied
    pub position_fix: bool,
    /// Motion regime used for the prediction, `None` on the seeding step
    pub regime: Option<Regime>,
    /// State after predict, before correction
    pub prior_state: StateVec,
    pub prior_covariance: StateMat,
    pub state: StateVec,
    pub covariance: StateMat,
    pub gain: KalmanGainPos,
    pub innovation: PosVec,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CtrvEkfState {
    pub phase: FilterPhase,

    /// Position in local frame [meters]
    pub position: (f64, f64),
    pub heading: f64,
    pub heading_deg: f64,
    pub speed: f64,
    pub yaw_rate: f64,
    pub yaw_rate_degs: f64,

    /// 1-sigma horizontal position uncertainty [meters]
    pub uncertainty_m: f64,
    pub covariance_trace: f64,

    /// Update counters
    pub steps: u64,
    pub position_updates: u64,
    pub straight_steps: u64,
}

pub struct CtrvEkf {
    config: FilterConfig,
    model: CtrvModel,
    phase: FilterPhase,

    /// State vector [5D]
    state: StateVec,

    /// Covariance matrix [5x5]
    covariance: StateMat,

    /// Process noise matrix [5x5]
    process_noise: StateMat,

    /// Position measurement noise [2x2]
    measurement_noise: PosNoise,

    step_count: u64,
    position_updates: u64,
    straight_steps: u64,
}

impl CtrvEkf {
    /// Create a filter that seeds itself from the first step carrying a fix.
    pub fn new(config: FilterConfig) -> FilterResult<Self> {
        config.validate()?;

        Ok(Self {
            model: CtrvModel::new(config.yaw_rate_threshold),
            phase: FilterPhase::Uninitialized,
            state: StateVec::zeros(),
            covariance: config.initial_covariance_matrix(),
            process_noise: config.process_noise_matrix(),
            measurement_noise: config.measurement_noise_matrix(),
            config,
            step_count: 0,
            position_updates: 0,
            straight_steps: 0,
        })
    }

    /// Create a running filter from a known state.
    pub fn with_initial_state(config: FilterConfig, initial: StateVec) -> FilterResult<Self> {
        if initial.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::NonFiniteInput(format!(
                "initial state {:?}",
                initial.as_slice()
            )));
        }
        let mut ekf = Self::new(config)?;
        ekf.state = initial;
        ekf.state[IDX_HEADING] = wrap_angle(initial[IDX_HEADING]);
        ekf.phase = FilterPhase::Running;
        Ok(ekf)
    }

    pub fn phase(&self) -> FilterPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == FilterPhase::Running
    }

    pub fn state(&self) -> &StateVec {
        &self.state
    }

    pub fn covariance(&self) -> &StateMat {
        &self.covariance
    }

    pub fn process_noise(&self) -> &StateMat {
        &self.process_noise
    }

    pub fn measurement_noise(&self) -> &PosNoise {
        &self.measurement_noise
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn model(&self) -> &CtrvModel {
        &self.model
    }

    /// Number of outputs produced so far (seeding included)
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn position_updates(&self) -> u64 {
        self.position_updates
    }

    /// Advance the filter by one step.
    ///
    /// Returns `Ok(None)` while the filter is still waiting for its first
    /// position fix.
    pub fn step(&mut self, input: &StepInput) -> FilterResult<Option<StepOutput>> {
        if !input.is_finite() {
            return Err(FilterError::NonFiniteInput(format!("{input:?}")));
        }
        if input.dt <= 0.0 {
            return Err(FilterError::NonPositiveDt(input.dt));
        }

        match (self.phase, input.position) {
            (FilterPhase::Uninitialized, Some(fix)) => Ok(Some(self.seed(input, fix))),
            (FilterPhase::Uninitialized, None) => {
                log::trace!("no position fix yet, skipping step");
                Ok(None)
            }
            (FilterPhase::Running, _) => self.predict_and_correct(input).map(Some),
        }
    }

    /// `step` with bare readings. Seeding through this entry point starts
    /// from zero heading and speed.
    pub fn step_with(
        &mut self,
        dt: f64,
        yaw_rate: f64,
        position: Option<(f64, f64)>,
    ) -> FilterResult<Option<StepOutput>> {
        let input = StepInput {
            dt,
            yaw_rate,
            speed: 0.0,
            heading: None,
            position: position.map(PositionFix::from),
        };
        self.step(&input)
    }

    /// `step`, then hand the output (if any) to `observer`.
    pub fn step_observed<O>(
        &mut self,
        input: &StepInput,
        observer: &mut O,
    ) -> FilterResult<Option<StepOutput>>
    where
        O: StepObserver + ?Sized,
    {
        let output = self.step(input)?;
        if let Some(out) = output.as_ref() {
            observer.on_step(out);
        }
        Ok(output)
    }

    /// Feed a whole measurement stream. Returns the number of outputs
    /// produced; stops at the first error.
    pub fn run<I, O>(&mut self, inputs: I, observer: &mut O) -> FilterResult<usize>
    where
        I: IntoIterator,
        I::Item: Borrow<StepInput>,
        O: StepObserver + ?Sized,
    {
        let mut produced = 0;
        for input in inputs {
            if self.step_observed(input.borrow(), observer)?.is_some() {
                produced += 1;
            }
        }
        Ok(produced)
    }

    /// Drop all state and wait for a new first fix.
    pub fn reset(&mut self) {
        log::debug!("resetting CTRV filter after {} steps", self.step_count);
        self.phase = FilterPhase::Uninitialized;
        self.state = StateVec::zeros();
        self.covariance = self.config.initial_covariance_matrix();
        self.step_count = 0;
        self.position_updates = 0;
        self.straight_steps = 0;
    }

    pub fn snapshot(&self) -> CtrvEkfState {
        let uncertainty = ((self.covariance[(IDX_X, IDX_X)] + self.covariance[(IDX_Y, IDX_Y)]) / 2.0)
            .max(0.0)
            .sqrt();

        CtrvEkfState {
            phase: self.phase,
            position: (self.state[IDX_X], self.state[IDX_Y]),
            heading: self.state[IDX_HEADING],
            heading_deg: self.state[IDX_HEADING].to_degrees(),
            speed: self.state[IDX_SPEED],
            yaw_rate: self.state[IDX_YAW_RATE],
            yaw_rate_degs: self.state[IDX_YAW_RATE].to_degrees(),
            uncertainty_m: uncertainty,
            covariance_trace: self.covariance.trace(),
            steps: self.step_count,
            position_updates: self.position_updates,
            straight_steps: self.straight_steps,
        }
    }

    fn seed(&mut self, input: &StepInput, fix: PositionFix) -> StepOutput {
        self.state = StateVec::new(
            fix.x,
            fix.y,
            wrap_angle(input.heading.unwrap_or(0.0)),
            input.speed,
            input.yaw_rate,
        );
        self.covariance = self.config.initial_covariance_matrix();
        self.phase = FilterPhase::Running;
        self.step_count += 1;

        log::debug!(
            "seeded CTRV filter at ({:.2}, {:.2}) heading {:.3} rad, speed {:.2} m/s",
            fix.x,
            fix.y,
            self.state[IDX_HEADING],
            input.speed
        );

        StepOutput {
            step: self.step_count,
            seeded: true,
            position_fix: true,
            regime: None,
            prior_state: self.state,
            prior_covariance: self.covariance,
            state: self.state,
            covariance: self.covariance,
            gain: KalmanGainPos::zeros(),
            innovation: PosVec::zeros(),
        }
    }

    fn predict_and_correct(&mut self, input: &StepInput) -> FilterResult<StepOutput> {
        // ===== Predict =====
        // Regime follows the measured yaw rate, not the estimate
        let regime = self.model.regime(input.yaw_rate);
        let prediction = self.model.predict_in(&self.state, input.dt, regime);
        let ja = prediction.jacobian;

        self.state = prediction.state;
        self.covariance = ja * self.covariance * ja.transpose() + self.process_noise;
        symmetrize(&mut self.covariance);

        let prior_state = self.state;
        let prior_covariance = self.covariance;

        // ===== Correct =====
        let jh = measurement_jacobian(input.has_fix());
        let predicted = self.measurement_prediction();
        let z = input.position.map_or(predicted, |fix| fix.as_vector());

        let s = jh * self.covariance * jh.transpose() + self.measurement_noise;
        let s_inv = s.try_inverse().ok_or(FilterError::SingularInnovation)?;
        let gain = self.covariance * jh.transpose() * s_inv;
        let innovation = z - predicted;

        self.state += gain * innovation;
        self.state[IDX_HEADING] = wrap_angle(self.state[IDX_HEADING]);
        self.covariance = (StateMat::identity() - gain * jh) * self.covariance;
        symmetrize(&mut self.covariance);

        self.step_count += 1;
        if input.has_fix() {
            self.position_updates += 1;
        }
        if regime == Regime::Straight {
            self.straight_steps += 1;
        }
        self.check_finite();

        log::trace!(
            "step {} {:?} fix={} x=({:.3}, {:.3}) gain_xx={:.4}",
            self.step_count,
            regime,
            input.has_fix(),
            self.state[IDX_X],
            self.state[IDX_Y],
            gain[(0, 0)]
        );

        Ok(StepOutput {
            step: self.step_count,
            seeded: false,
            position_fix: input.has_fix(),
            regime: Some(regime),
            prior_state,
            prior_covariance,
            state: self.state,
            covariance: self.covariance,
            gain,
            innovation,
        })
    }

    /// h(x) = (x, y)
    fn measurement_prediction(&self) -> PosVec {
        PosVec::new(self.state[IDX_X], self.state[IDX_Y])
    }

    fn check_finite(&self) {
        let finite = self.state.iter().all(|v| v.is_finite())
            && self.covariance.iter().all(|v| v.is_finite());
        if !finite {
            log::error!(
                "CTRV filter diverged at step {}: state {:?}",
                self.step_count,
                self.state.as_slice()
            );
        }
        debug_assert!(finite, "CTRV filter produced non-finite state");
    }
}

/// H for a position fix, or all zeros when there is none.
fn measurement_jacobian(has_fix: bool) -> JacobianPos {
    let mut h = JacobianPos::zeros();
    if has_fix {
        h[(0, IDX_X)] = 1.0;
        h[(1, IDX_Y)] = 1.0;
    }
    h
}

fn symmetrize(p: &mut StateMat) {
    for r in 0..STATE_DIM {
        for c in (r + 1)..STATE_DIM {
            let mean = 0.5 * (p[(r, c)] + p[(c, r)]);
            p[(r, c)] = mean;
            p[(c, r)] = mean;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::History;
    use approx::assert_abs_diff_eq;

    fn running_filter(initial: [f64; 5]) -> CtrvEkf {
        CtrvEkf::with_initial_state(FilterConfig::default(), StateVec::from(initial)).unwrap()
    }

    #[test]
    fn test_waits_for_first_fix() {
        let mut ekf = CtrvEkf::new(FilterConfig::default()).unwrap();
        let out = ekf.step(&StepInput::new(0.02, 0.1, 5.0)).unwrap();

        assert!(out.is_none());
        assert_eq!(ekf.phase(), FilterPhase::Uninitialized);
        assert_eq!(ekf.step_count(), 0);
    }

    #[test]
    fn test_seeds_from_first_fix() {
        let mut ekf = CtrvEkf::new(FilterConfig::default()).unwrap();
        let input = StepInput::new(0.02, 0.05, 12.0)
            .with_heading(0.7)
            .with_position(100.0, -40.0);
        let out = ekf.step(&input).unwrap().unwrap();

        assert!(ekf.is_running());
        assert!(out.seeded);
        assert_eq!(out.regime, None);
        assert_eq!(out.state, StateVec::new(100.0, -40.0, 0.7, 12.0, 0.05));
        assert_eq!(out.covariance, FilterConfig::default().initial_covariance_matrix());
        assert_eq!(out.gain, KalmanGainPos::zeros());
    }

    #[test]
    fn test_seeding_wraps_heading() {
        let mut ekf = CtrvEkf::new(FilterConfig::default()).unwrap();
        let input = StepInput::new(0.02, 0.0, 1.0)
            .with_heading(4.0)
            .with_position(0.0, 0.0);
        let out = ekf.step(&input).unwrap().unwrap();
        assert_abs_diff_eq!(out.state[IDX_HEADING], 4.0 - std::f64::consts::TAU, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_fix_leaves_prediction_untouched() {
        let mut ekf = running_filter([0.0, 0.0, 0.3, 10.0, 0.1]);
        // Warm up with a fix so the covariance has cross terms
        ekf.step(&StepInput::new(0.02, 0.1, 10.0).with_position(0.3, 0.1))
            .unwrap();

        let out = ekf.step(&StepInput::new(0.02, 0.1, 10.0)).unwrap().unwrap();

        assert!(!out.position_fix);
        assert_eq!(out.state, out.prior_state);
        assert_eq!(out.covariance, out.prior_covariance);
        assert_eq!(out.gain, KalmanGainPos::zeros());
        assert_eq!(out.innovation, PosVec::zeros());
    }

    #[test]
    fn test_fix_pulls_estimate_towards_measurement() {
        let mut ekf = running_filter([0.0, 0.0, 0.0, 0.0, 0.0]);
        let out = ekf
            .step(&StepInput::new(0.02, 0.0, 0.0).with_position(5.0, -5.0))
            .unwrap()
            .unwrap();

        assert!(out.position_fix);
        assert!(out.state[IDX_X] > 4.0 && out.state[IDX_X] < 5.0);
        assert!(out.state[IDX_Y] < -4.0 && out.state[IDX_Y] > -5.0);
        assert!(out.gain[(0, 0)] > 0.9 && out.gain[(0, 0)] < 1.0);
        assert!(out.covariance[(0, 0)] < out.prior_covariance[(0, 0)]);
        assert_eq!(ekf.position_updates(), 1);
    }

    #[test]
    fn test_rejects_non_positive_dt() {
        let mut ekf = running_filter([0.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(
            ekf.step(&StepInput::new(0.0, 0.0, 1.0)),
            Err(FilterError::NonPositiveDt(0.0))
        );
        assert_eq!(
            ekf.step(&StepInput::new(-0.5, 0.0, 1.0)),
            Err(FilterError::NonPositiveDt(-0.5))
        );
        assert_eq!(ekf.step_count(), 0);
    }

    #[test]
    fn test_rejects_non_finite_input() {
        let mut ekf = running_filter([0.0, 0.0, 0.0, 1.0, 0.0]);
        let result = ekf.step(&StepInput::new(0.02, 0.0, 1.0).with_position(f64::NAN, 0.0));
        assert!(matches!(result, Err(FilterError::NonFiniteInput(_))));
    }

    #[test]
    fn test_degenerate_measurement_noise_rejected() {
        let config = FilterConfig {
            position_std: 0.0,
            ..FilterConfig::default()
        };
        assert!(matches!(
            CtrvEkf::new(config),
            Err(FilterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_stationary_vehicle_converges() {
        let (px, py) = (5.0, -3.0);
        let mut ekf = running_filter([px, py, 0.0, 0.0, 0.0]);

        let mut prev = (ekf.covariance()[(0, 0)], ekf.covariance()[(1, 1)]);
        let initial = prev;
        for _ in 0..100 {
            let out = ekf
                .step(&StepInput::new(0.02, 0.0, 0.0).with_position(px, py))
                .unwrap()
                .unwrap();
            let cur = (out.covariance[(0, 0)], out.covariance[(1, 1)]);
            assert!(cur.0 <= prev.0, "P_xx grew: {} -> {}", prev.0, cur.0);
            assert!(cur.1 <= prev.1, "P_yy grew: {} -> {}", prev.1, cur.1);
            prev = cur;
        }

        assert_abs_diff_eq!(ekf.state()[IDX_X], px, epsilon = 1e-9);
        assert_abs_diff_eq!(ekf.state()[IDX_Y], py, epsilon = 1e-9);
        assert!(prev.0 < initial.0 / 100.0);
        assert!(prev.1 < initial.1 / 100.0);
    }

    #[test]
    fn test_straight_step_forces_small_yaw_rate() {
        let mut ekf = running_filter([0.0, 0.0, 0.0, 10.0, 0.2]);
        let out = ekf.step(&StepInput::new(0.02, 0.0, 10.0)).unwrap().unwrap();

        assert_eq!(out.regime, Some(Regime::Straight));
        assert_eq!(out.state[IDX_YAW_RATE], crate::filters::ctrv::STRAIGHT_YAW_RATE);
        assert_abs_diff_eq!(out.state[IDX_X], 0.2, epsilon = 1e-12);
        assert_eq!(ekf.snapshot().straight_steps, 1);
    }

    #[test]
    fn test_observer_called_once_per_output() {
        let mut ekf = CtrvEkf::new(FilterConfig::default()).unwrap();
        let mut inputs = vec![StepInput::new(0.02, 0.0, 3.0)];
        for i in 0..10 {
            let mut input = StepInput::new(0.02, 0.0, 3.0);
            if i % 5 == 0 {
                input = input.with_position(0.06 * i as f64, 0.0);
            }
            inputs.push(input);
        }

        let mut calls = 0;
        let mut counter = |_: &StepOutput| calls += 1;
        let produced = ekf.run(&inputs, &mut counter).unwrap();
        assert_eq!(produced, 10);
        assert_eq!(calls, 10);

        let mut history = History::new();
        ekf.reset();
        ekf.run(inputs.iter(), &mut history).unwrap();
        assert_eq!(history.len(), 10);
        assert!(history.records[0].seeded);
        assert_eq!(history.records.iter().filter(|r| r.position_fix).count(), 2);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let mut ekf = running_filter([1.0, 2.0, std::f64::consts::FRAC_PI_2, 3.0, 0.0]);
        let snap = ekf.snapshot();
        assert_eq!(snap.phase, FilterPhase::Running);
        assert_eq!(snap.position, (1.0, 2.0));
        assert_abs_diff_eq!(snap.heading_deg, 90.0, epsilon = 1e-12);
        assert_abs_diff_eq!(snap.uncertainty_m, 1000.0_f64.sqrt(), epsilon = 1e-9);
        assert_abs_diff_eq!(snap.covariance_trace, 5000.0, epsilon = 1e-9);

        ekf.reset();
        assert_eq!(ekf.phase(), FilterPhase::Uninitialized);
        assert_eq!(ekf.state(), &StateVec::zeros());
        assert_eq!(ekf.snapshot().steps, 0);
    }
}
