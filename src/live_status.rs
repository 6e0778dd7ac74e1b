use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::filters::ekf_ctrv::{CtrvEkf, FilterPhase, StepOutput};

/// Status snapshot of a running filter, rewritten periodically so other
/// processes can watch progress.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub running: bool,
    pub steps: u64,
    pub gps_fixes: u64,
    pub straight_steps: u64,
    // Current estimate
    pub x: f64,
    pub y: f64,
    pub heading_deg: f64,
    pub speed: f64,
    pub yaw_rate_degs: f64,
    pub uncertainty_m: f64,
    // Last correction
    pub last_gain: f64,
    pub last_innovation_m: f64,
    pub uptime_seconds: u64,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            running: false,
            steps: 0,
            gps_fixes: 0,
            straight_steps: 0,
            x: 0.0,
            y: 0.0,
            heading_deg: 0.0,
            speed: 0.0,
            yaw_rate_degs: 0.0,
            uncertainty_m: 0.0,
            last_gain: 0.0,
            last_innovation_m: 0.0,
            uptime_seconds: 0,
        }
    }

    /// Refresh from the filter's current snapshot.
    pub fn update_from(&mut self, ekf: &CtrvEkf) {
        let snap = ekf.snapshot();
        self.timestamp = current_timestamp();
        self.running = snap.phase == FilterPhase::Running;
        self.steps = snap.steps;
        self.gps_fixes = snap.position_updates;
        self.straight_steps = snap.straight_steps;
        self.x = snap.position.0;
        self.y = snap.position.1;
        self.heading_deg = snap.heading_deg;
        self.speed = snap.speed;
        self.yaw_rate_degs = snap.yaw_rate_degs;
        self.uncertainty_m = snap.uncertainty_m;
    }

    /// Remember the gain and innovation of a corrected step.
    pub fn record_correction(&mut self, output: &StepOutput) {
        if output.position_fix && !output.seeded {
            self.last_gain = output.gain[(0, 0)];
            self.last_innovation_m = output.innovation.norm();
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::types::StepInput;

    #[test]
    fn test_tracks_filter_progress() {
        let mut ekf = CtrvEkf::new(FilterConfig::default()).unwrap();
        let mut status = LiveStatus::new();
        status.update_from(&ekf);
        assert!(!status.running);

        ekf.step(&StepInput::new(0.02, 0.0, 4.0).with_position(1.0, 2.0))
            .unwrap();
        let out = ekf
            .step(&StepInput::new(0.02, 0.0, 4.0).with_position(1.5, 2.0))
            .unwrap()
            .unwrap();
        status.record_correction(&out);
        status.update_from(&ekf);

        assert!(status.running);
        assert_eq!(status.steps, 2);
        assert_eq!(status.gps_fixes, 1);
        assert!(status.last_gain > 0.0);
        assert!(status.last_innovation_m > 0.0);
    }

    #[test]
    fn test_save_writes_json() {
        let path = std::env::temp_dir().join(format!("ctrv_status_{}.json", std::process::id()));
        LiveStatus::new().save(&path).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).unwrap();
        let parsed: LiveStatus = serde_json::from_str(&raw).unwrap();
        assert!(!parsed.running);
        assert_eq!(parsed.steps, 0);
    }
}
