pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Position fix in the local planar frame (meters).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub x: f64,
    pub y: f64,
}

impl PositionFix {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn as_vector(&self) -> PosVec {
        PosVec::new(self.x, self.y)
    }
}

impl From<(f64, f64)> for PositionFix {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Everything the measurement source delivers for one filter step.
///
/// The high-rate readings (`yaw_rate`, `speed`) arrive every step; `position`
/// is only present on the steps that carry a GPS fix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    /// Elapsed time since the previous step [s]
    pub dt: f64,
    /// Measured yaw rate [rad/s]
    pub yaw_rate: f64,
    /// Measured forward speed [m/s]
    pub speed: f64,
    /// Measured course over ground [rad], if the source provides one
    #[serde(default)]
    pub heading: Option<f64>,
    /// Position fix for this step, `None` when no fix is available
    #[serde(default)]
    pub position: Option<PositionFix>,
}

impl StepInput {
    pub fn new(dt: f64, yaw_rate: f64, speed: f64) -> Self {
        Self {
            dt,
            yaw_rate,
            speed,
            heading: None,
            position: None,
        }
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Some(PositionFix::new(x, y));
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn has_fix(&self) -> bool {
        self.position.is_some()
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.dt.is_finite()
            && self.yaw_rate.is_finite()
            && self.speed.is_finite()
            && self.heading.map_or(true, f64::is_finite)
            && self
                .position
                .map_or(true, |p| p.x.is_finite() && p.y.is_finite())
    }
}
