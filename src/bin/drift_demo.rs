use std::path::PathBuf;

use clap::Parser;
use serde_json::json;

use vr_fusion_rs::types::{heading_difference, yaw_degrees, Quat, Vec3};
use vr_fusion_rs::{FusionConfig, RotationFilter, YawDriftCorrector};

/// Synthetic drifting HMD vs. optical compass run
#[derive(Parser, Debug)]
struct Args {
    /// Simulated duration (seconds)
    #[arg(long, default_value = "120")]
    seconds: f64,

    /// Tick length (seconds)
    #[arg(long, default_value = "0.0333")]
    dt: f64,

    /// Gyro heading drift (degrees/second)
    #[arg(long, default_value = "0.5")]
    drift_rate: f64,

    /// Initial heading offset between the two sources (degrees)
    #[arg(long, default_value = "25.0")]
    initial_offset: f64,

    /// Compass jitter amplitude (degrees)
    #[arg(long, default_value = "2.0")]
    jitter: f64,

    /// Override drift_correction_rate
    #[arg(long)]
    rate: Option<f64>,

    /// JSON config overriding any subset of the defaults
    #[arg(long)]
    config: Option<PathBuf>,
}

fn yaw(degrees: f64) -> Quat {
    Quat::from_axis_angle(&Vec3::y_axis(), degrees.to_radians())
}

fn pitch(degrees: f64) -> Quat {
    Quat::from_axis_angle(&Vec3::x_axis(), degrees.to_radians())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => FusionConfig::from_json_file(path)?,
        None => FusionConfig::default(),
    };
    if let Some(rate) = args.rate {
        config.filter.drift_correction_rate = rate;
    }
    config.validate()?;
    if args.dt <= 0.0 {
        anyhow::bail!("--dt must be positive");
    }

    let mut corrector = YawDriftCorrector::from_config(&config.filter);
    let mut compass_filter = RotationFilter::from_config(&config.filter);

    println!("=== Yaw Drift Correction Demo ===\n");
    println!(
        "drift {:.2} deg/s, initial offset {:.1} deg, rate {:.3}\n",
        args.drift_rate, args.initial_offset, config.filter.drift_correction_rate
    );

    let ticks = (args.seconds / args.dt).ceil() as usize;
    let mut errors = Vec::with_capacity(ticks);
    let mut next_report = 0.0;
    for i in 0..ticks {
        let t = i as f64 * args.dt;

        // Head sweeping left and right while nodding
        let true_head = yaw(60.0 * (t * 0.2).sin()) * pitch(20.0 * (t * 0.5).sin());
        let jitter = args.jitter * (t * 37.0).sin() * (t * 11.0).cos();
        let compass = compass_filter.update(&(yaw(jitter) * true_head), args.dt);
        let drifting = yaw(args.initial_offset + args.drift_rate * t) * true_head;

        let corrected = corrector.update(&drifting, &compass, args.dt);
        let error = heading_difference(yaw_degrees(&corrected), yaw_degrees(&true_head));
        errors.push(error.abs());

        if t >= next_report {
            println!(
                "t={:6.1}s  raw {:7.2} deg  corrected {:6.2} deg  correction {:7.2} deg",
                t,
                heading_difference(yaw_degrees(&drifting), yaw_degrees(&true_head)),
                error,
                corrector.yaw_correction_degrees()
            );
            next_report += 10.0;
        }
    }

    let settled = &errors[errors.len() / 2..];
    let settled_mean = settled.iter().sum::<f64>() / settled.len().max(1) as f64;
    let settled_max = settled.iter().copied().fold(0.0, f64::max);
    let converged_at = errors
        .iter()
        .position(|e| *e < 2.0)
        .map(|i| i as f64 * args.dt);

    let summary = json!({
        "ticks": ticks,
        "drift_rate_deg_s": args.drift_rate,
        "correction_rate": config.filter.drift_correction_rate,
        "settled_mean_error_deg": settled_mean,
        "settled_max_error_deg": settled_max,
        "first_within_2deg_s": converged_at,
        "final_correction_deg": corrector.yaw_correction_degrees(),
    });
    println!("\n{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
