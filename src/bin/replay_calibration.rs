use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use flate2::read::GzDecoder;
use nalgebra::Quaternion;
use serde::Deserialize;
use serde_json::json;

use vr_fusion_rs::device::{FeedDevice, PoseSnapshot, SnapshotFeed, SnapshotPublisher};
use vr_fusion_rs::types::{DevicePair, FloorPlaneReading, Quat, Vec3};
use vr_fusion_rs::{
    CalibrationPairKind, CalibrationPhase, CalibrationProcess, CalibrationStore, FusionConfig,
};

#[derive(Parser, Debug)]
struct Args {
    /// Recorded two-device session (.json or .json.gz)
    #[arg(long)]
    session: PathBuf,

    /// JSON config overriding any subset of the defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write the calibration store (.json or .json.gz)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Existing calibration store to extend instead of starting empty
    #[arg(long)]
    store: Option<PathBuf>,

    /// Override samples_to_take
    #[arg(long)]
    samples: Option<usize>,

    /// Print status text whenever the phase changes
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[derive(Deserialize)]
struct FloorFrame {
    normal: [f64; 3],
    point: [f64; 3],
}

#[derive(Deserialize)]
struct DeviceFrame {
    position: [f64; 3],
    /// (w, x, y, z)
    #[serde(default)]
    rotation: Option<[f64; 4]>,
    #[serde(default = "default_tracking")]
    tracking: bool,
    #[serde(default)]
    trigger: bool,
    #[serde(default)]
    floor: Option<FloorFrame>,
}

fn default_tracking() -> bool {
    true
}

#[derive(Deserialize)]
struct Tick {
    dt: f64,
    /// Missing while the device is not streaming
    a: Option<DeviceFrame>,
    b: Option<DeviceFrame>,
}

#[derive(Deserialize)]
struct Session {
    /// e.g. "Kinect2-PSMove"
    pair: String,
    ticks: Vec<Tick>,
}

fn load_session(path: &Path) -> anyhow::Result<Session> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let reader = BufReader::new(GzDecoder::new(file));
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn snapshot(timestamp: f64, frame: &DeviceFrame) -> PoseSnapshot {
    let rotation = frame
        .rotation
        .map(|[w, x, y, z]| Quat::from_quaternion(Quaternion::new(w, x, y, z)))
        .unwrap_or_else(Quat::identity);
    let mut snapshot = PoseSnapshot::tracked(timestamp, Vec3::from(frame.position), rotation);
    snapshot.tracking = frame.tracking;
    snapshot.trigger = frame.trigger;
    snapshot.floor = frame.floor.as_ref().map(|f| FloorPlaneReading {
        normal: Vec3::from(f.normal),
        point: Vec3::from(f.point),
    });
    snapshot
}

fn publish(publisher: &SnapshotPublisher, timestamp: f64, frame: Option<&DeviceFrame>) {
    if let Some(frame) = frame {
        publisher.publish(snapshot(timestamp, frame));
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => FusionConfig::from_json_file(path)?,
        None => FusionConfig::default(),
    };
    if let Some(samples) = args.samples {
        config.calibration.samples_to_take = samples;
    }
    if let Some(output) = args.output.clone() {
        config.calibration.output_path = Some(output);
    }
    config.validate()?;

    let session = load_session(&args.session)?;
    let pair = DevicePair::from_key(&session.pair)
        .ok_or_else(|| anyhow::anyhow!("Unknown device pair {}", session.pair))?;
    let kind = CalibrationPairKind::from_pair(pair)
        .ok_or_else(|| anyhow::anyhow!("No calibration procedure for {pair}"))?;

    let store = match args.store.as_ref() {
        Some(path) => Arc::new(CalibrationStore::load(path)?),
        None => Arc::new(CalibrationStore::new()),
    };

    let (publisher_a, feed_a) = SnapshotFeed::channel();
    let (publisher_b, feed_b) = SnapshotFeed::channel();
    let mut process = CalibrationProcess::new(
        kind,
        Box::new(FeedDevice::new(pair.from, feed_a)),
        Box::new(FeedDevice::new(pair.to, feed_b)),
        Arc::clone(&store),
        config.calibration.clone(),
    )?;

    let mut timestamp = 0.0;
    let mut phase = process.phase();
    for tick in &session.ticks {
        timestamp += tick.dt;
        publish(&publisher_a, timestamp, tick.a.as_ref());
        publish(&publisher_b, timestamp, tick.b.as_ref());

        let next = process.tick(tick.dt);
        if next != phase && args.verbose {
            println!("[{timestamp:8.2}s] {next}: {}", process.status_text());
        }
        phase = next;
        if matches!(phase, CalibrationPhase::ShowResults | CalibrationPhase::Invalid) {
            break;
        }
    }

    if let Some(failure) = process.failure() {
        anyhow::bail!("{failure}");
    }
    let Some(report) = process.report() else {
        anyhow::bail!(
            "Session ended in {} with {}/{} samples: {}",
            process.phase(),
            process.sample_count(),
            config.calibration.samples_to_take,
            process.status_text()
        );
    };

    let t = report.transform.translation;
    let q = report.transform.rotation;
    let summary = json!({
        "pair": report.pair.key(),
        "samples": report.samples,
        "mean_error": report.error.mean,
        "max_error": report.error.max,
        "translation": [t.x, t.y, t.z],
        "rotation_wxyz": [q.w, q.i, q.j, q.k],
        "rotation_deg": q.angle().to_degrees(),
        "floors": report
            .floors
            .iter()
            .map(|(device, floor)| json!({
                "device": device.name(),
                "distance_from_floor": floor.distance_from_floor,
                "pitch_deg": floor.pitch_rotation.angle().to_degrees(),
            }))
            .collect::<Vec<_>>(),
        "saved_to": report.saved_to.as_ref().map(|p| p.display().to_string()),
        "save_error": report.save_error,
        "session_seconds": timestamp,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
