//! Constant Turn Rate and Velocity (CTRV) motion model
//!
//! State Vector (5D):
//! [0-1]: Position (X, Y) in the local frame (meters)
//! [2]:   Heading ψ (rad, wrapped to (-π, π])
//! [3]:   Forward speed v (m/s)
//! [4]:   Yaw rate ψ̇ (rad/s)
//!
//! Two regimes: below the yaw-rate threshold the vehicle advances on a
//! straight line, above it on a circular arc. The arc equations divide by ψ̇,
//! so the straight regime stores a small non-zero yaw rate and the Jacobian
//! is always evaluated at a yaw rate bounded away from zero.

use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_YAW_RATE_THRESHOLD;
use crate::types::{StateMat, StateVec, IDX_HEADING, IDX_SPEED, IDX_X, IDX_Y, IDX_YAW_RATE};

/// Yaw rate written into the state while driving straight [rad/s]
pub const STRAIGHT_YAW_RATE: f64 = 1e-7;

/// Map an angle into (-π, π].
pub fn wrap_angle(angle: f64) -> f64 {
    if angle > -PI && angle <= PI {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Replace a yaw rate whose magnitude is below `threshold` by
/// [`STRAIGHT_YAW_RATE`]; larger magnitudes pass through untouched.
pub fn clamp_yaw_rate(yaw_rate: f64, threshold: f64) -> f64 {
    if yaw_rate.abs() < threshold {
        STRAIGHT_YAW_RATE
    } else {
        yaw_rate
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Straight,
    Turning,
}

/// Output of one model prediction.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub state: StateVec,
    /// Jacobian of the transition, evaluated at the pre-update state
    pub jacobian: StateMat,
    pub regime: Regime,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CtrvModel {
    yaw_rate_threshold: f64,
}

impl Default for CtrvModel {
    fn default() -> Self {
        Self::new(DEFAULT_YAW_RATE_THRESHOLD)
    }
}

impl CtrvModel {
    pub fn new(yaw_rate_threshold: f64) -> Self {
        Self { yaw_rate_threshold }
    }

    pub fn yaw_rate_threshold(&self) -> f64 {
        self.yaw_rate_threshold
    }

    pub fn regime(&self, yaw_rate: f64) -> Regime {
        if yaw_rate.abs() < self.yaw_rate_threshold {
            Regime::Straight
        } else {
            Regime::Turning
        }
    }

    /// Predict using the regime selected by the state's own yaw rate.
    pub fn predict(&self, state: &StateVec, dt: f64) -> Prediction {
        let regime = self.regime(state[IDX_YAW_RATE]);
        self.predict_in(state, dt, regime)
    }

    /// Predict in an explicitly chosen regime.
    ///
    /// `dt` must be positive; the caller is responsible for checking it.
    pub fn predict_in(&self, state: &StateVec, dt: f64, regime: Regime) -> Prediction {
        Prediction {
            state: self.transition(state, dt, regime),
            jacobian: self.jacobian(state, dt, regime),
            regime,
        }
    }

    /// Nonlinear state transition.
    ///
    /// The straight branch always stores [`STRAIGHT_YAW_RATE`]. For any yaw
    /// rate that selects that branch (|ψ̇| < threshold) this is exactly
    /// `clamp_yaw_rate(ψ̇, threshold)`. When the regime comes from a measured
    /// rate instead, the state's own ψ̇ may exceed the threshold and is
    /// still overwritten.
    pub fn transition(&self, state: &StateVec, dt: f64, regime: Regime) -> StateVec {
        let heading = state[IDX_HEADING];
        let speed = state[IDX_SPEED];
        let mut next = *state;

        match regime {
            Regime::Straight => {
                next[IDX_X] += speed * dt * heading.cos();
                next[IDX_Y] += speed * dt * heading.sin();
                next[IDX_YAW_RATE] = STRAIGHT_YAW_RATE;
            }
            Regime::Turning => {
                let yaw_rate = clamp_yaw_rate(state[IDX_YAW_RATE], STRAIGHT_YAW_RATE);
                let turn = yaw_rate * dt;
                let radius = speed / yaw_rate;
                next[IDX_X] += radius * sin_step(heading, turn);
                next[IDX_Y] += radius * cos_step(heading, turn);
                next[IDX_HEADING] = wrap_angle(heading + turn);
                next[IDX_YAW_RATE] = yaw_rate;
            }
        }
        next
    }

    /// Analytic Jacobian of [`Self::transition`] at `state`.
    ///
    /// Both regimes share the arc-form partials; the straight regime evaluates
    /// them at [`STRAIGHT_YAW_RATE`].
    pub fn jacobian(&self, state: &StateVec, dt: f64, regime: Regime) -> StateMat {
        let heading = state[IDX_HEADING];
        let speed = state[IDX_SPEED];
        let yaw_rate = match regime {
            Regime::Straight => STRAIGHT_YAW_RATE,
            Regime::Turning => clamp_yaw_rate(state[IDX_YAW_RATE], STRAIGHT_YAW_RATE),
        };

        let turn = yaw_rate * dt;
        let ds = sin_step(heading, turn);
        let dc = cos_step(heading, turn);
        let (sin_next, cos_next) = (heading + turn).sin_cos();
        let radius = speed / yaw_rate;
        let radius_rate = speed / (yaw_rate * yaw_rate);

        let a13 = -radius * dc;
        let a14 = ds / yaw_rate;
        let a15 = dt * radius * cos_next - radius_rate * ds;
        let a23 = radius * ds;
        let a24 = dc / yaw_rate;
        let a25 = dt * radius * sin_next - radius_rate * dc;

        #[rustfmt::skip]
        let ja = StateMat::new(
            1.0, 0.0, a13, a14, a15,
            0.0, 1.0, a23, a24, a25,
            0.0, 0.0, 1.0, 0.0, dt,
            0.0, 0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 1.0,
        );
        ja
    }
}

/// sin(ψ + δ) − sin(ψ), written as a product so small δ keeps full precision.
fn sin_step(heading: f64, turn: f64) -> f64 {
    2.0 * (heading + 0.5 * turn).cos() * (0.5 * turn).sin()
}

/// cos(ψ) − cos(ψ + δ), same treatment as [`sin_step`].
fn cos_step(heading: f64, turn: f64) -> f64 {
    2.0 * (heading + 0.5 * turn).sin() * (0.5 * turn).sin()
}
