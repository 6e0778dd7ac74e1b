//! Recorded measurement sessions
//!
//! On-disk form of a measurement stream, written as plain JSON or as
//! gzip'd JSON when the file name ends in `.gz`. Fixes are either local
//! meters or lat/lon degrees; geodetic fixes are projected around the
//! session origin (or the first geodetic fix when no origin is stored).

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::geodesy::LocalFrame;
use crate::sim::SimulatedStep;
use crate::types::{PositionFix, StepInput, STATE_DIM};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoggedFix {
    Local { x: f64, y: f64 },
    Geodetic { latitude: f64, longitude: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggedStep {
    pub dt: f64,
    pub yaw_rate: f64,
    pub speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<LoggedFix>,
    /// Ground truth, only present in simulated sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truth: Option<[f64; STATE_DIM]>,
}

impl LoggedStep {
    /// A bad fix alone does not make the step unusable; only the fix is dropped.
    fn is_usable(&self) -> bool {
        self.dt.is_finite()
            && self.dt > 0.0
            && self.yaw_rate.is_finite()
            && self.speed.is_finite()
            && self.heading.map_or(true, f64::is_finite)
    }

    fn has_valid_fix(&self) -> bool {
        match self.fix {
            None => false,
            Some(LoggedFix::Local { x, y }) => x.is_finite() && y.is_finite(),
            Some(LoggedFix::Geodetic {
                latitude,
                longitude,
            }) => latitude.is_finite() && longitude.is_finite(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    /// RFC 3339 creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<LocalFrame>,
    pub steps: Vec<LoggedStep>,
}

impl SessionLog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let session: SessionLog = if is_gzip(path) {
            serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
        } else {
            serde_json::from_reader(BufReader::new(file))?
        };
        log::debug!("loaded {} steps from {}", session.steps.len(), path.display());
        Ok(session)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let path = path.as_ref();
        let file = File::create(path)?;
        if is_gzip(path) {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            serde_json::to_writer(&mut encoder, self)?;
            encoder.finish()?.flush()?;
        } else {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Session with local-frame fixes and ground truth from a simulated drive.
    pub fn from_simulation(steps: &[SimulatedStep]) -> Self {
        let steps = steps
            .iter()
            .map(|s| LoggedStep {
                dt: s.input.dt,
                yaw_rate: s.input.yaw_rate,
                speed: s.input.speed,
                heading: s.input.heading,
                fix: s.input.position.map(|p| LoggedFix::Local { x: p.x, y: p.y }),
                truth: Some(std::array::from_fn(|i| s.truth[i])),
            })
            .collect();

        Self {
            created: Some(chrono::Utc::now().to_rfc3339()),
            origin: None,
            steps,
        }
    }

    pub fn fix_count(&self) -> usize {
        self.steps.iter().filter(|s| s.fix.is_some()).count()
    }

    /// Frame used for geodetic fixes.
    pub fn frame(&self) -> Option<LocalFrame> {
        self.origin.or_else(|| {
            self.steps.iter().find_map(|s| match s.fix {
                Some(LoggedFix::Geodetic {
                    latitude,
                    longitude,
                }) if latitude.is_finite() && longitude.is_finite() => {
                    Some(LocalFrame::new(latitude, longitude))
                }
                _ => None,
            })
        })
    }

    /// Filter inputs for every usable step. Steps with a non-positive or
    /// non-finite reading are skipped with a warning; a non-finite fix is
    /// dropped from an otherwise usable step.
    pub fn to_inputs(&self) -> Result<Vec<StepInput>, SessionError> {
        let frame = self.frame();
        let mut inputs = Vec::with_capacity(self.steps.len());

        for (idx, step) in self.steps.iter().enumerate() {
            if !step.is_usable() {
                log::warn!("skipping unusable session step {idx}: {step:?}");
                continue;
            }
            if step.fix.is_some() && !step.has_valid_fix() {
                log::warn!("dropping non-finite fix of session step {idx}: {:?}", step.fix);
            }
            let fix = step.fix.filter(|_| step.has_valid_fix());
            let position = match (fix, frame) {
                (None, _) => None,
                (Some(LoggedFix::Local { x, y }), _) => Some(PositionFix::new(x, y)),
                (Some(LoggedFix::Geodetic { latitude, longitude }), Some(frame)) => {
                    Some(frame.project(latitude, longitude))
                }
                // frame() always finds one when a geodetic fix exists
                (Some(LoggedFix::Geodetic { .. }), None) => None,
            };
            inputs.push(StepInput {
                dt: step.dt,
                yaw_rate: step.yaw_rate,
                speed: step.speed,
                heading: step.heading,
                position,
            });
        }

        if inputs.is_empty() {
            return Err(SessionError::Empty);
        }
        Ok(inputs)
    }

    /// Ground truth aligned with [`Self::to_inputs`], if every usable step has one.
    pub fn truth(&self) -> Option<Vec<[f64; STATE_DIM]>> {
        self.steps
            .iter()
            .filter(|s| s.is_usable())
            .map(|s| s.truth)
            .collect()
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}
