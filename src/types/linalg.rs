//! Linear algebra type system for the CTRV tracker
//!
//! Fixed-size nalgebra aliases so every filter matrix has its dimensions
//! checked at compile time and lives on the stack.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM: usize = 5;

// State layout: [x, y, heading, speed, yaw_rate]
pub const IDX_X: usize = 0;
pub const IDX_Y: usize = 1;
pub const IDX_HEADING: usize = 2;
pub const IDX_SPEED: usize = 3;
pub const IDX_YAW_RATE: usize = 4;

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_POS: usize = 2; // (x, y)

// ===== CTRV Filter Types =====
pub type StateVec = SVector<f64, STATE_DIM>;
pub type StateMat = SMatrix<f64, STATE_DIM, STATE_DIM>;

// Measurement types
pub type PosVec = SVector<f64, MEASURE_DIM_POS>;
pub type PosNoise = SMatrix<f64, MEASURE_DIM_POS, MEASURE_DIM_POS>;

// Kalman gain: 5×2
pub type KalmanGainPos = SMatrix<f64, STATE_DIM, MEASURE_DIM_POS>;

// Measurement Jacobian: 2×5
pub type JacobianPos = SMatrix<f64, MEASURE_DIM_POS, STATE_DIM>;
