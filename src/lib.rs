//! CTRV vehicle tracker
//!
//! Extended Kalman filter over a Constant Turn Rate and Velocity motion model.
//! High-rate yaw-rate and speed readings drive the prediction every step;
//! sparse GPS fixes correct the position whenever they arrive.

pub mod config;
pub mod error;
pub mod filters;
pub mod geodesy;
pub mod live_status;
pub mod observer;
pub mod session;
pub mod sim;
pub mod types;

pub use config::{FilterConfig, ProcessNoiseBounds};
pub use error::{FilterError, FilterResult, SessionError};
pub use filters::ctrv::{clamp_yaw_rate, wrap_angle, CtrvModel, Prediction, Regime};
pub use filters::ekf_ctrv::{CtrvEkf, CtrvEkfState, FilterPhase, StepOutput};
pub use observer::{History, NoopObserver, StepObserver, StepRecord};
pub use types::{PositionFix, StateMat, StateVec, StepInput};
