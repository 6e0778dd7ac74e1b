use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

use ctrv_tracker::filters::ekf_ctrv::CtrvEkf;
use ctrv_tracker::live_status::{current_timestamp, LiveStatus};
use ctrv_tracker::observer::{History, StepObserver};
use ctrv_tracker::session::SessionLog;
use ctrv_tracker::sim::{DriveConfig, DriveSimulator, SimulatedStep};
use ctrv_tracker::types::{IDX_X, IDX_Y};
use ctrv_tracker::FilterConfig;

#[derive(Parser, Debug)]
#[command(name = "ctrv_tracker")]
#[command(about = "CTRV EKF tracker - streams a simulated drive through the filter", long_about = None)]
struct Args {
    /// Filter config JSON (defaults used when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Drive config JSON (built-in drive when omitted)
    #[arg(long)]
    drive: Option<PathBuf>,

    /// Simulation seed (overrides the drive config)
    #[arg(long)]
    seed: Option<u64>,

    /// GPS fix every N steps (overrides the drive config)
    #[arg(long)]
    gps_every: Option<usize>,

    /// Pace the sensor stream at the drive's dt instead of as fast as possible
    #[arg(long, default_value_t = false)]
    realtime: bool,

    /// Steps between live status writes
    #[arg(long, default_value = "250")]
    status_every: u64,

    /// Output directory
    #[arg(long, default_value = "ctrv_sessions")]
    output_dir: PathBuf,
}

#[derive(Serialize)]
struct RunSummary {
    started: String,
    steps: usize,
    outputs: usize,
    gps_fixes: u64,
    final_error_m: f64,
    rmse_m: f64,
    final_uncertainty_m: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let started = Utc::now();

    let filter_config = match args.config.as_ref() {
        Some(path) => FilterConfig::load(path)
            .with_context(|| format!("loading filter config {}", path.display()))?,
        None => FilterConfig::default(),
    };
    let mut drive = match args.drive.as_ref() {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading drive config {}", path.display()))?;
            serde_json::from_str::<DriveConfig>(&raw)?
        }
        None => DriveConfig::default(),
    };
    if let Some(seed) = args.seed {
        drive.seed = seed;
    }
    if let Some(n) = args.gps_every {
        drive.gps_every = n;
    }

    log::info!(
        "CTRV tracker starting: {} steps at {:.0} Hz, fix every {} steps, seed {}",
        drive.total_steps(),
        1.0 / drive.dt,
        drive.gps_every,
        drive.seed
    );
    std::fs::create_dir_all(&args.output_dir)?;

    let mut ekf = CtrvEkf::new(filter_config)?;
    let simulator = DriveSimulator::new(drive.clone())?;

    // Sensor task: pushes simulated readings into the channel
    let (tx, mut rx) = mpsc::channel::<SimulatedStep>(256);
    let pace = sensor_period(drive.dt, args.realtime);
    let producer = tokio::spawn(async move {
        let mut ticker = pace.map(interval);
        for step in simulator {
            if let Some(ticker) = ticker.as_mut() {
                ticker.tick().await;
            }
            if tx.send(step).await.is_err() {
                log::warn!("filter loop closed the channel, stopping sensor task");
                break;
            }
        }
    });

    let mut history = History::new();
    let mut status = LiveStatus::new();
    let status_path = args.output_dir.join("live_status.json");
    let start_time = current_timestamp();
    let mut recorded = Vec::with_capacity(drive.total_steps());
    let mut squared_error = 0.0;
    let mut outputs = 0usize;

    while let Some(step) = rx.recv().await {
        if let Some(out) = ekf.step(&step.input)? {
            history.on_step(&out);
            status.record_correction(&out);
            outputs += 1;

            let dx = out.state[IDX_X] - step.truth[IDX_X];
            let dy = out.state[IDX_Y] - step.truth[IDX_Y];
            squared_error += dx * dx + dy * dy;

            if out.step % args.status_every.max(1) == 0 {
                status.update_from(&ekf);
                status.uptime_seconds = (current_timestamp() - start_time).max(0.0) as u64;
                if let Err(e) = status.save(&status_path) {
                    log::warn!("failed to write live status: {e}");
                }
                log::info!(
                    "step {}: pos=({:.1}, {:.1}) heading={:.1}° speed={:.2} m/s ±{:.2} m",
                    out.step,
                    out.state[IDX_X],
                    out.state[IDX_Y],
                    status.heading_deg,
                    status.speed,
                    status.uncertainty_m
                );
            }
        }
        recorded.push(step);
    }
    producer.await?;

    // Final save
    let stamp = started.format("%Y%m%d_%H%M%S").to_string();
    let session_path = args.output_dir.join(format!("session_{stamp}.json.gz"));
    SessionLog::from_simulation(&recorded)
        .save(&session_path)
        .with_context(|| format!("writing {}", session_path.display()))?;
    write_json(&args.output_dir.join(format!("history_{stamp}.json")), &history)?;

    status.update_from(&ekf);
    status.uptime_seconds = (current_timestamp() - start_time).max(0.0) as u64;
    status.save(args.output_dir.join("live_status_final.json"))?;

    let final_error_m = match (history.last(), recorded.last()) {
        (Some(last), Some(step)) => {
            let dx = last.state[IDX_X] - step.truth[IDX_X];
            let dy = last.state[IDX_Y] - step.truth[IDX_Y];
            (dx * dx + dy * dy).sqrt()
        }
        _ => f64::NAN,
    };
    let summary = RunSummary {
        started: started.to_rfc3339(),
        steps: recorded.len(),
        outputs,
        gps_fixes: ekf.position_updates(),
        final_error_m,
        rmse_m: if outputs > 0 {
            (squared_error / outputs as f64).sqrt()
        } else {
            f64::NAN
        },
        final_uncertainty_m: ekf.snapshot().uncertainty_m,
    };

    log::info!("session written to {}", session_path.display());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Tick period for a paced sensor stream, `None` when running flat out.
fn sensor_period(dt: f64, realtime: bool) -> Option<Duration> {
    realtime.then(|| {
        Duration::try_from_secs_f64(dt).map_or(Duration::MAX, |d| d.max(Duration::from_nanos(1)))
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_period_only_when_paced() {
        assert_eq!(sensor_period(0.02, false), None);
        assert_eq!(sensor_period(1e-12, false), None);
        assert_eq!(sensor_period(0.02, true), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_sensor_period_never_zero() {
        assert_eq!(sensor_period(1e-12, true), Some(Duration::from_nanos(1)));
    }
}
