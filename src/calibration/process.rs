// Calibration state machine.
//
// One driver for every device pair. The pair kind only decides which devices
// are expected and what the operator is told; sampling, solving, floor
// estimation and persistence are shared.
//
//   Initial -> Preparation -> ReadyToCalibrate -> Calibration -> ShowResults
//      \____________\_______________\__________________\-----> Invalid

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::calibration::floor::{FloorPlane, FloorPlaneEstimator};
use crate::calibration::solver::{PairwiseCalibrationSolver, ReprojectionError, RigidTransform};
use crate::config::CalibrationConfig;
use crate::device::TrackedDevice;
use crate::error::{FusionError, FusionResult};
use crate::store::{CalibrationResult, CalibrationStore};
use crate::types::{DeviceId, DevicePair, Vec3};

/// Ordered: a running process only ever moves to a greater phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CalibrationPhase {
    Initial,
    Preparation,
    ReadyToCalibrate,
    Calibration,
    ShowResults,
    Invalid,
}

impl fmt::Display for CalibrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CalibrationPhase::Initial => "Initial",
            CalibrationPhase::Preparation => "Preparation",
            CalibrationPhase::ReadyToCalibrate => "ReadyToCalibrate",
            CalibrationPhase::Calibration => "Calibration",
            CalibrationPhase::ShowResults => "ShowResults",
            CalibrationPhase::Invalid => "Invalid",
        };
        write!(f, "{name}")
    }
}

/// Supported device pairings; the first device is the one being mapped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CalibrationPairKind {
    Kinect2PsMove,
    Kinect1PsMove,
    Kinect1Kinect2,
    Kinect2RazerHydra,
    Kinect2OpenVr,
}

impl CalibrationPairKind {
    pub const ALL: [CalibrationPairKind; 5] = [
        CalibrationPairKind::Kinect2PsMove,
        CalibrationPairKind::Kinect1PsMove,
        CalibrationPairKind::Kinect1Kinect2,
        CalibrationPairKind::Kinect2RazerHydra,
        CalibrationPairKind::Kinect2OpenVr,
    ];

    pub fn from_pair(pair: DevicePair) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.pair() == pair)
    }

    pub fn devices(&self) -> (DeviceId, DeviceId) {
        match self {
            CalibrationPairKind::Kinect2PsMove => (DeviceId::Kinect2, DeviceId::PsMove),
            CalibrationPairKind::Kinect1PsMove => (DeviceId::Kinect1, DeviceId::PsMove),
            CalibrationPairKind::Kinect1Kinect2 => (DeviceId::Kinect1, DeviceId::Kinect2),
            CalibrationPairKind::Kinect2RazerHydra => (DeviceId::Kinect2, DeviceId::RazerHydra),
            CalibrationPairKind::Kinect2OpenVr => (DeviceId::Kinect2, DeviceId::OpenVr),
        }
    }

    pub fn pair(&self) -> DevicePair {
        let (a, b) = self.devices();
        DevicePair::new(a, b)
    }

    fn acquire_hint(&self) -> &'static str {
        match self {
            CalibrationPairKind::Kinect1Kinect2 => "Stand where both Kinects can see you.",
            _ => "Stand in front of the Kinect holding the controller in your right hand.",
        }
    }

    fn trigger_hint(&self) -> &'static str {
        match self {
            CalibrationPairKind::Kinect2PsMove | CalibrationPairKind::Kinect1PsMove => {
                "Press the MOVE button to start."
            }
            CalibrationPairKind::Kinect2RazerHydra => "Press a Razer Hydra bumper to start.",
            CalibrationPairKind::Kinect2OpenVr => "Pull the controller trigger to start.",
            CalibrationPairKind::Kinect1Kinect2 => "Raise your right hand to start.",
        }
    }

    fn sampling_hint(&self) -> &'static str {
        match self {
            CalibrationPairKind::Kinect1Kinect2 => {
                "Walk around slowly, moving your right hand widely."
            }
            _ => "Move the controller slowly through wide, calm arcs.",
        }
    }
}

impl fmt::Display for CalibrationPairKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (a, b) = self.devices();
        write!(f, "{a} - {b}")
    }
}

#[derive(Clone, Debug)]
pub struct CalibrationFailure {
    pub phase: CalibrationPhase,
    pub error: FusionError,
}

impl fmt::Display for CalibrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Calibration failed during {}: {}", self.phase, self.error)
    }
}

/// Everything the operator sees once results are in
#[derive(Clone, Debug)]
pub struct CalibrationReport {
    pub pair: DevicePair,
    pub transform: RigidTransform,
    pub error: ReprojectionError,
    pub samples: usize,
    pub floors: Vec<(DeviceId, FloorPlane)>,
    pub saved_to: Option<PathBuf>,
    pub save_error: Option<String>,
}

pub struct CalibrationProcess {
    kind: CalibrationPairKind,
    device_a: Box<dyn TrackedDevice>,
    device_b: Box<dyn TrackedDevice>,
    store: Arc<CalibrationStore>,
    config: CalibrationConfig,
    sample_interval: f64,

    phase: CalibrationPhase,
    // ── Initial ──
    settle_timer: f64,
    devices_checked: usize,
    // ── Calibration ──
    sample_timer: f64,
    last_a: Option<Vec3>,
    last_b: Option<Vec3>,
    samples_a: Vec<Vec3>,
    samples_b: Vec<Vec3>,
    // ── Outcome ──
    report: Option<CalibrationReport>,
    failure: Option<CalibrationFailure>,
}

impl CalibrationProcess {
    pub fn new(
        kind: CalibrationPairKind,
        device_a: Box<dyn TrackedDevice>,
        device_b: Box<dyn TrackedDevice>,
        store: Arc<CalibrationStore>,
        config: CalibrationConfig,
    ) -> FusionResult<Self> {
        config.validate()?;
        let expected = kind.devices();
        if (device_a.id(), device_b.id()) != expected {
            return Err(FusionError::InvalidConfig(format!(
                "{kind} calibration needs devices {} and {}, got {} and {}",
                expected.0,
                expected.1,
                device_a.id(),
                device_b.id()
            )));
        }

        let sample_interval = config.sample_interval();
        let capacity = config.samples_to_take;
        log::info!(
            "Calibrating {kind}: {} samples, one every {:.2} s",
            config.samples_to_take,
            sample_interval
        );

        Ok(Self {
            kind,
            device_a,
            device_b,
            store,
            config,
            sample_interval,
            phase: CalibrationPhase::Initial,
            settle_timer: 0.0,
            devices_checked: 0,
            sample_timer: 0.0,
            last_a: None,
            last_b: None,
            samples_a: Vec::with_capacity(capacity),
            samples_b: Vec::with_capacity(capacity),
            report: None,
            failure: None,
        })
    }

    /// Advance by one host tick of `dt` seconds
    pub fn tick(&mut self, dt: f64) -> CalibrationPhase {
        let dt = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };
        if matches!(self.phase, CalibrationPhase::ShowResults | CalibrationPhase::Invalid) {
            return self.phase;
        }

        self.device_a.refresh();
        self.device_b.refresh();

        match self.phase {
            CalibrationPhase::Initial => self.tick_initial(dt),
            CalibrationPhase::Preparation => self.tick_preparation(),
            CalibrationPhase::ReadyToCalibrate => self.tick_ready(),
            CalibrationPhase::Calibration => self.tick_calibration(dt),
            CalibrationPhase::ShowResults | CalibrationPhase::Invalid => {}
        }
        self.phase
    }

    fn tick_initial(&mut self, dt: f64) {
        self.settle_timer += dt;
        if self.settle_timer < self.config.device_settle_secs {
            return;
        }
        self.settle_timer = 0.0;

        let device = if self.devices_checked == 0 {
            &self.device_a
        } else {
            &self.device_b
        };
        let id = device.id();
        if !device.is_connected() {
            log::warn!("{id} did not connect within {:.1} s", self.config.device_settle_secs);
            self.fail(FusionError::DeviceUnavailable(id));
            return;
        }
        log::info!("{id} connected");

        self.devices_checked += 1;
        if self.devices_checked == 2 {
            self.advance(CalibrationPhase::Preparation);
        }
    }

    fn tick_preparation(&mut self) {
        if self.device_a.subject_acquired() && self.device_b.subject_acquired() {
            self.advance(CalibrationPhase::ReadyToCalibrate);
        }
    }

    fn tick_ready(&mut self) {
        if !(self.device_a.trigger_pressed() || self.device_b.trigger_pressed()) {
            return;
        }
        self.last_a = None;
        self.last_b = None;
        // First sample may be taken on the next tick
        self.sample_timer = self.sample_interval;
        self.advance(CalibrationPhase::Calibration);
    }

    fn tick_calibration(&mut self, dt: f64) {
        self.sample_timer += dt;
        if self.sample_timer < self.sample_interval {
            return;
        }

        // Query both every time so paired devices stay in lockstep
        let position_a = self.device_a.sample_position();
        let position_b = self.device_b.sample_position();
        let (Some(a), Some(b)) = (position_a, position_b) else {
            return;
        };

        let threshold = self.config.motion_threshold;
        let moved = |last: &Option<Vec3>, current: &Vec3| {
            last.map_or(true, |last| (current - last).norm() >= threshold)
        };
        if !moved(&self.last_a, &a) || !moved(&self.last_b, &b) {
            return;
        }

        self.samples_a.push(a);
        self.samples_b.push(b);
        self.last_a = Some(a);
        self.last_b = Some(b);
        self.sample_timer = 0.0;
        log::debug!(
            "Sample {}/{}: a {:?} b {:?}",
            self.samples_a.len(),
            self.config.samples_to_take,
            a.as_slice(),
            b.as_slice()
        );

        if self.samples_a.len() >= self.config.samples_to_take {
            self.advance(CalibrationPhase::ShowResults);
            self.show_results();
        }
    }

    /// Runs once, on entry to ShowResults
    fn show_results(&mut self) {
        if self.report.is_some() {
            return;
        }

        let transform = match PairwiseCalibrationSolver::solve(&self.samples_a, &self.samples_b) {
            Ok(transform) => transform,
            Err(err) => {
                self.fail(err);
                return;
            }
        };
        let error = PairwiseCalibrationSolver::calibration_error(
            &self.samples_a,
            &self.samples_b,
            &transform,
        );

        let mut floors = Vec::new();
        for device in [&self.device_a, &self.device_b] {
            if let Some(reading) = device.floor_plane() {
                let id = device.id();
                let floor = FloorPlaneEstimator::estimate(&reading, id.unit_scale());
                self.store.install_floor(id, floor);
                floors.push((id, floor));
            }
        }

        let pair = self.kind.pair();
        let samples = self.samples_a.len();
        self.store
            .install_pair(CalibrationResult::new(pair, transform.clone(), error, samples));

        let mut saved_to = None;
        let mut save_error = None;
        if let Some(path) = &self.config.output_path {
            match self.store.save(path) {
                Ok(()) => saved_to = Some(path.clone()),
                Err(err) => {
                    log::error!("Could not save calibration to {}: {err}", path.display());
                    save_error = Some(err.to_string());
                }
            }
        }

        log::info!(
            "Calibration {pair} done: mean error {:.4}, max error {:.4} over {samples} samples",
            error.mean,
            error.max
        );

        self.report = Some(CalibrationReport {
            pair,
            transform,
            error,
            samples,
            floors,
            saved_to,
            save_error,
        });
    }

    fn advance(&mut self, next: CalibrationPhase) {
        if next <= self.phase {
            return;
        }
        log::info!("Calibration {}: {} -> {next}", self.kind, self.phase);
        self.phase = next;
    }

    fn fail(&mut self, error: FusionError) {
        log::error!("Calibration {} failed during {}: {error}", self.kind, self.phase);
        self.failure = Some(CalibrationFailure {
            phase: self.phase,
            error,
        });
        self.phase = CalibrationPhase::Invalid;
    }

    // ─── Plain-data surface for UI and CLI ───────────────────────────────────

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub fn kind(&self) -> CalibrationPairKind {
        self.kind
    }

    pub fn sample_count(&self) -> usize {
        self.samples_a.len()
    }

    /// Fraction of the requested samples captured, in [0, 1]
    pub fn progress(&self) -> f64 {
        (self.samples_a.len() as f64 / self.config.samples_to_take as f64).min(1.0)
    }

    pub fn report(&self) -> Option<&CalibrationReport> {
        self.report.as_ref()
    }

    pub fn failure(&self) -> Option<&CalibrationFailure> {
        self.failure.as_ref()
    }

    pub fn status_text(&self) -> String {
        match self.phase {
            CalibrationPhase::Initial => {
                let waiting = if self.devices_checked == 0 {
                    self.device_a.id()
                } else {
                    self.device_b.id()
                };
                format!("Waiting for {waiting} to connect...")
            }
            CalibrationPhase::Preparation => self.kind.acquire_hint().to_string(),
            CalibrationPhase::ReadyToCalibrate => self.kind.trigger_hint().to_string(),
            CalibrationPhase::Calibration => format!(
                "{} ({}/{} samples)",
                self.kind.sampling_hint(),
                self.samples_a.len(),
                self.config.samples_to_take
            ),
            CalibrationPhase::ShowResults => match &self.report {
                Some(report) => {
                    let mut text = format!(
                        "Calibration complete. Mean error {:.3} m, max {:.3} m.",
                        report.error.mean, report.error.max
                    );
                    if let Some(err) = &report.save_error {
                        text.push_str(&format!(" Saving failed: {err}"));
                    }
                    text
                }
                None => "Calibration complete.".to_string(),
            },
            CalibrationPhase::Invalid => match &self.failure {
                Some(failure) => failure.to_string(),
                None => "Calibration failed.".to_string(),
            },
        }
    }
}
