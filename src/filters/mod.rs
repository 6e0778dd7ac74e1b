pub mod ctrv;
pub mod ekf_ctrv;
