//! Per-step observers
//!
//! The filter never accumulates history itself. Anything that wants to chart
//! or export the run (state trace, gains, covariance) plugs in here and gets
//! called once per produced output.

use serde::{Deserialize, Serialize};

use crate::filters::ctrv::Regime;
use crate::filters::ekf_ctrv::StepOutput;
use crate::types::{MEASURE_DIM_POS, STATE_DIM};

pub trait StepObserver {
    fn on_step(&mut self, output: &StepOutput);
}

impl<F> StepObserver for F
where
    F: FnMut(&StepOutput),
{
    fn on_step(&mut self, output: &StepOutput) {
        self(output)
    }
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl StepObserver for NoopObserver {
    fn on_step(&mut self, _output: &StepOutput) {}
}

/// Flat, serializable copy of one step's output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u64,
    pub seeded: bool,
    pub position_fix: bool,
    pub regime: Option<Regime>,
    pub state: [f64; STATE_DIM],
    pub covariance_diag: [f64; STATE_DIM],
    /// Row-major 5×2 Kalman gain
    pub gain: [[f64; MEASURE_DIM_POS]; STATE_DIM],
    pub innovation: [f64; MEASURE_DIM_POS],
}

impl From<&StepOutput> for StepRecord {
    fn from(output: &StepOutput) -> Self {
        let mut state = [0.0; STATE_DIM];
        let mut covariance_diag = [0.0; STATE_DIM];
        let mut gain = [[0.0; MEASURE_DIM_POS]; STATE_DIM];
        for i in 0..STATE_DIM {
            state[i] = output.state[i];
            covariance_diag[i] = output.covariance[(i, i)];
            for j in 0..MEASURE_DIM_POS {
                gain[i][j] = output.gain[(i, j)];
            }
        }

        Self {
            step: output.step,
            seeded: output.seeded,
            position_fix: output.position_fix,
            regime: output.regime,
            state,
            covariance_diag,
            gain,
            innovation: [output.innovation[0], output.innovation[1]],
        }
    }
}

/// Records every step for later charting or export.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct History {
    pub records: Vec<StepRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.records.last()
    }

    /// Position track as (x, y) pairs.
    pub fn positions(&self) -> Vec<(f64, f64)> {
        self.records.iter().map(|r| (r.state[0], r.state[1])).collect()
    }

    /// Largest gain magnitude on the x/y rows for each corrected step.
    pub fn position_gains(&self) -> Vec<f64> {
        self.records
            .iter()
            .filter(|r| r.position_fix && !r.seeded)
            .map(|r| r.gain[0][0].abs().max(r.gain[1][1].abs()))
            .collect()
    }
}

impl StepObserver for History {
    fn on_step(&mut self, output: &StepOutput) {
        self.records.push(StepRecord::from(output));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::filters::ekf_ctrv::CtrvEkf;
    use crate::types::StepInput;

    #[test]
    fn test_history_and_snapshot_serialize_to_json() {
        let mut ekf = CtrvEkf::new(FilterConfig::default()).unwrap();
        let mut history = History::new();
        let inputs = [
            StepInput::new(0.02, 0.1, 5.0).with_heading(0.2).with_position(1.0, 1.0),
            StepInput::new(0.02, 0.1, 5.0),
            StepInput::new(0.02, 0.1, 5.0).with_position(1.2, 1.05),
        ];
        ekf.run(&inputs, &mut history).unwrap();

        let json = serde_json::to_string(&history).unwrap();
        let parsed: History = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.records, history.records);
        assert_eq!(parsed.last().unwrap().regime, Some(Regime::Turning));

        let snap = serde_json::to_value(ekf.snapshot()).unwrap();
        assert_eq!(snap["steps"], 3);
        assert_eq!(snap["position"].as_array().unwrap().len(), 2);
    }
}
