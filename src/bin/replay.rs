use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use ctrv_tracker::filters::ctrv::Regime;
use ctrv_tracker::filters::ekf_ctrv::{CtrvEkf, StepOutput};
use ctrv_tracker::session::SessionLog;
use ctrv_tracker::types::{IDX_X, IDX_Y};
use ctrv_tracker::FilterConfig;
use serde_json::json;

#[derive(Parser, Debug)]
struct Args {
    /// Path to session_*.json[.gz] log
    #[arg(long, conflicts_with = "golden_dir")]
    log: Option<PathBuf>,

    /// Directory of logs to batch replay (processes session_*.json[.gz])
    #[arg(long)]
    golden_dir: Option<PathBuf>,

    /// Filter config JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override position measurement std (meters)
    #[arg(long)]
    position_std: Option<f64>,

    /// Worker threads for batch replay
    #[arg(long, default_value = "4")]
    jobs: usize,
}

fn rmse_pairs(pairs: &[(f64, f64)]) -> f64 {
    if pairs.is_empty() {
        return f64::INFINITY;
    }
    let sum: f64 = pairs.iter().map(|(a, b)| (a - b).powi(2)).sum();
    (sum / pairs.len() as f64).sqrt()
}

fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

fn run_once(path: &Path, config: &FilterConfig) -> anyhow::Result<serde_json::Value> {
    let started = Instant::now();
    let session = SessionLog::load(path).with_context(|| format!("loading {}", path.display()))?;
    let inputs = session.to_inputs()?;
    let truth = session.truth();

    let mut ekf = CtrvEkf::new(config.clone())?;
    let mut innovations = Vec::new();
    let mut turning = 0usize;
    let mut track: Vec<(usize, f64, f64)> = Vec::with_capacity(inputs.len());

    for (idx, input) in inputs.iter().enumerate() {
        let Some(out) = ekf.step(input)? else {
            continue;
        };
        collect(&out, &mut innovations, &mut turning);
        track.push((idx, out.state[IDX_X], out.state[IDX_Y]));
    }

    let snap = ekf.snapshot();
    let mut result = json!({
        "log": path.display().to_string(),
        "steps": inputs.len(),
        "outputs": track.len(),
        "gps_fixes": snap.position_updates,
        "turning_steps": turning,
        "straight_steps": snap.straight_steps,
        "innovation_rms_m": rms(&innovations),
        "final_position": [snap.position.0, snap.position.1],
        "final_heading_deg": snap.heading_deg,
        "final_speed": snap.speed,
        "final_uncertainty_m": snap.uncertainty_m,
        "elapsed_ms": started.elapsed().as_secs_f64() * 1000.0,
    });

    if let Some(truth) = truth {
        let mut xs = Vec::with_capacity(track.len());
        let mut ys = Vec::with_capacity(track.len());
        for &(idx, x, y) in &track {
            xs.push((x, truth[idx][IDX_X]));
            ys.push((y, truth[idx][IDX_Y]));
        }
        let rmse = (rmse_pairs(&xs).powi(2) + rmse_pairs(&ys).powi(2)).sqrt();
        result["position_rmse_m"] = json!(rmse);
    }

    Ok(result)
}

fn collect(out: &StepOutput, innovations: &mut Vec<f64>, turning: &mut usize) {
    if out.regime == Some(Regime::Turning) {
        *turning += 1;
    }
    if out.position_fix && !out.seeded {
        innovations.push(out.innovation.norm());
    }
}

fn is_session_log(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    path.is_file()
        && name.starts_with("session_")
        && (name.ends_with(".json") || name.ends_with(".json.gz"))
}

/// One filter per worker, each replaying its own share of the logs.
fn run_batch(paths: &[PathBuf], config: &FilterConfig, jobs: usize) -> Vec<serde_json::Value> {
    let jobs = jobs.max(1);
    let chunk = paths.len().div_ceil(jobs).max(1);

    let per_worker = crossbeam::thread::scope(|scope| {
        let handles: Vec<_> = paths
            .chunks(chunk)
            .map(|share| {
                scope.spawn(move |_| {
                    let mut results = Vec::with_capacity(share.len());
                    for path in share {
                        match run_once(path, config) {
                            Ok(res) => results.push(res),
                            Err(e) => log::error!("Failed {}: {:#}", path.display(), e),
                        }
                    }
                    results
                })
            })
            .collect();

        handles
            .into_iter()
            .filter_map(|h| match h.join() {
                Ok(results) => Some(results),
                Err(_) => {
                    log::error!("replay worker panicked");
                    None
                }
            })
            .collect::<Vec<_>>()
    });

    match per_worker {
        Ok(results) => results.into_iter().flatten().collect(),
        Err(_) => {
            log::error!("replay scope panicked");
            Vec::new()
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => FilterConfig::load(path)
            .with_context(|| format!("loading filter config {}", path.display()))?,
        None => FilterConfig::default(),
    };
    if let Some(std) = args.position_std {
        config.position_std = std;
    }
    config.validate()?;

    let results = if let Some(dir) = args.golden_dir.as_ref() {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if is_session_log(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        if paths.is_empty() {
            anyhow::bail!("No session_*.json[.gz] logs in {}", dir.display());
        }
        run_batch(&paths, &config, args.jobs)
    } else if let Some(log) = args.log.as_ref() {
        vec![run_once(log, &config)?]
    } else {
        anyhow::bail!("Provide --log or --golden-dir");
    };

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
