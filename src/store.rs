// Process-wide calibration table.
//
// Written once per completed calibration run, read every tick by the
// transform layer. Entries are installed as whole `Arc`s under the write lock,
// so a reader either sees the previous result or the new one, never a mix.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::calibration::floor::{FloorPlane, FloorPlaneEstimator};
use crate::calibration::solver::{ReprojectionError, RigidTransform};
use crate::error::{FusionError, FusionResult};
use crate::types::{up, DeviceId, DevicePair, Quat, Transform4, Vec3};

#[derive(Clone, Debug)]
pub struct CalibrationResult {
    pub pair: DevicePair,
    pub transform: RigidTransform,
    pub error: ReprojectionError,
    pub samples: usize,
    pub calibrated_at: DateTime<Utc>,
}

impl CalibrationResult {
    pub fn new(
        pair: DevicePair,
        transform: RigidTransform,
        error: ReprojectionError,
        samples: usize,
    ) -> Self {
        Self {
            pair,
            transform,
            error,
            samples,
            calibrated_at: Utc::now(),
        }
    }

    /// Same calibration seen from the other device
    pub fn reversed(&self) -> Self {
        Self {
            pair: self.pair.reversed(),
            transform: self.transform.inverse(),
            ..self.clone()
        }
    }
}

#[derive(Default)]
pub struct CalibrationStore {
    pairs: RwLock<HashMap<DevicePair, Arc<CalibrationResult>>>,
    floors: RwLock<HashMap<DeviceId, Arc<FloorPlane>>>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install_pair(&self, result: CalibrationResult) {
        let pair = result.pair;
        let entry = Arc::new(result);
        match self.pairs.write() {
            Ok(mut pairs) => {
                pairs.insert(pair, entry);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(pair, entry);
            }
        }
        log::info!("Installed calibration {pair}");
    }

    pub fn install_floor(&self, device: DeviceId, floor: FloorPlane) {
        let entry = Arc::new(floor);
        match self.floors.write() {
            Ok(mut floors) => {
                floors.insert(device, entry);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(device, entry);
            }
        }
        log::info!("Installed floor plane for {device}");
    }

    /// Calibration mapping `from` coordinates into `to`, inverting a stored
    /// reverse entry when needed
    pub fn pair(&self, from: DeviceId, to: DeviceId) -> Option<Arc<CalibrationResult>> {
        let pair = DevicePair::new(from, to);
        let pairs = self.pairs.read().unwrap_or_else(|p| p.into_inner());
        if let Some(result) = pairs.get(&pair) {
            return Some(Arc::clone(result));
        }
        pairs
            .get(&pair.reversed())
            .map(|result| Arc::new(result.reversed()))
    }

    pub fn floor(&self, device: DeviceId) -> Option<Arc<FloorPlane>> {
        let floors = self.floors.read().unwrap_or_else(|p| p.into_inner());
        floors.get(&device).cloned()
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.pair_count() == 0 && self.floors.read().map(|f| f.is_empty()).unwrap_or(true)
    }

    // ─── Persistence ─────────────────────────────────────────────────────────

    pub fn to_document(&self) -> StoreDocument {
        let pairs = self.pairs.read().unwrap_or_else(|p| p.into_inner());
        let floors = self.floors.read().unwrap_or_else(|p| p.into_inner());

        let mut pair_records: Vec<PairRecord> =
            pairs.values().map(|r| PairRecord::from(r.as_ref())).collect();
        pair_records.sort_by(|a, b| a.pair.cmp(&b.pair));

        let mut floor_records: Vec<FloorRecord> = floors
            .iter()
            .map(|(device, floor)| FloorRecord::new(*device, floor))
            .collect();
        floor_records.sort_by(|a, b| a.device.cmp(&b.device));

        StoreDocument {
            saved_at: Utc::now(),
            pairs: pair_records,
            floors: floor_records,
        }
    }

    /// Install every entry of a document, replacing existing ones
    pub fn merge_document(&self, document: StoreDocument) -> FusionResult<()> {
        for record in document.pairs {
            self.install_pair(record.into_result()?);
        }
        for record in document.floors {
            let device = DeviceId::from_name(&record.device).ok_or_else(|| {
                FusionError::Persistence(format!("unknown device {}", record.device))
            })?;
            self.install_floor(device, record.into_floor());
        }
        Ok(())
    }

    /// Write as JSON, gzip-compressed when the path ends in ".gz"
    pub fn save(&self, path: &Path) -> FusionResult<()> {
        let document = self.to_document();
        let file = File::create(path)?;
        if is_gzip(path) {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            serde_json::to_writer_pretty(&mut encoder, &document)?;
            encoder.finish()?.flush()?;
        } else {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &document)?;
            writer.flush()?;
        }
        log::info!(
            "Saved {} calibrations and {} floor planes to {}",
            document.pairs.len(),
            document.floors.len(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> FusionResult<Self> {
        let file = File::open(path)?;
        let document: StoreDocument = if is_gzip(path) {
            serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
        } else {
            serde_json::from_reader(BufReader::new(file))?
        };
        let store = Self::new();
        store.merge_document(document)?;
        Ok(store)
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

// ─── File records ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreDocument {
    pub saved_at: DateTime<Utc>,
    pub pairs: Vec<PairRecord>,
    pub floors: Vec<FloorRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PairRecord {
    /// e.g. "Kinect2-PSMove"
    pub pair: String,
    /// Row-major 4x4 homogeneous transform
    pub transform: [[f64; 4]; 4],
    /// (w, x, y, z)
    pub rotation: (f64, f64, f64, f64),
    pub translation: (f64, f64, f64),
    pub mean_error: f64,
    pub max_error: f64,
    pub samples: usize,
    pub calibrated_at: DateTime<Utc>,
}

impl From<&CalibrationResult> for PairRecord {
    fn from(result: &CalibrationResult) -> Self {
        let m = &result.transform.transform;
        let q = result.transform.rotation;
        let t = result.transform.translation;
        Self {
            pair: result.pair.key(),
            transform: std::array::from_fn(|r| std::array::from_fn(|c| m[(r, c)])),
            rotation: (q.w, q.i, q.j, q.k),
            translation: (t.x, t.y, t.z),
            mean_error: result.error.mean,
            max_error: result.error.max,
            samples: result.samples,
            calibrated_at: result.calibrated_at,
        }
    }
}

impl PairRecord {
    pub fn into_result(self) -> FusionResult<CalibrationResult> {
        let pair = DevicePair::from_key(&self.pair)
            .ok_or_else(|| FusionError::Persistence(format!("unknown device pair {}", self.pair)))?;
        let (w, x, y, z) = self.rotation;
        let rotation = Quat::from_quaternion(nalgebra::Quaternion::new(w, x, y, z));
        let translation = Vec3::new(self.translation.0, self.translation.1, self.translation.2);

        let mut transform = RigidTransform::from_parts(rotation, translation);
        // Keep the stored matrix verbatim; it is what other tools read
        transform.transform = Transform4::from_fn(|r, c| self.transform[r][c]);

        Ok(CalibrationResult {
            pair,
            transform,
            error: ReprojectionError {
                mean: self.mean_error,
                max: self.max_error,
            },
            samples: self.samples,
            calibrated_at: self.calibrated_at,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FloorRecord {
    pub device: String,
    pub normal: (f64, f64, f64),
    pub distance_from_floor: f64,
}

impl FloorRecord {
    fn new(device: DeviceId, floor: &FloorPlane) -> Self {
        Self {
            device: device.name().to_string(),
            normal: (floor.normal.x, floor.normal.y, floor.normal.z),
            distance_from_floor: floor.distance_from_floor,
        }
    }

    fn into_floor(self) -> FloorPlane {
        let normal = Vec3::new(self.normal.0, self.normal.1, self.normal.2);
        let normal = FloorPlaneEstimator::normalized_normal(&normal);
        FloorPlane {
            normal,
            distance_from_floor: self.distance_from_floor,
            pitch_rotation: Quat::rotation_between(&normal, &up()).unwrap_or_else(Quat::identity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_result() -> CalibrationResult {
        let transform = RigidTransform::from_parts(
            Quat::from_axis_angle(&Vec3::y_axis(), 0.6),
            Vec3::new(0.1, -0.2, 1.5),
        );
        CalibrationResult::new(
            DevicePair::new(DeviceId::Kinect2, DeviceId::PsMove),
            transform,
            ReprojectionError { mean: 0.01, max: 0.03 },
            50,
        )
    }

    fn tilted_floor() -> FloorPlane {
        let normal = Vec3::new(0.0, 0.95, 0.1).normalize();
        FloorPlane {
            normal,
            distance_from_floor: 1.1,
            pitch_rotation: Quat::rotation_between(&normal, &Vec3::y()).unwrap(),
        }
    }

    #[test]
    fn test_reverse_lookup_inverts() {
        let store = CalibrationStore::new();
        store.install_pair(sample_result());

        let forward = store.pair(DeviceId::Kinect2, DeviceId::PsMove).unwrap();
        let backward = store.pair(DeviceId::PsMove, DeviceId::Kinect2).unwrap();
        assert_eq!(backward.pair, DevicePair::new(DeviceId::PsMove, DeviceId::Kinect2));

        let p = Vec3::new(0.3, 1.0, -2.0);
        let roundtrip = backward.transform.apply(&forward.transform.apply(&p));
        assert_relative_eq!(roundtrip, p, epsilon = 1e-12);
        assert!(store.pair(DeviceId::Kinect1, DeviceId::PsMove).is_none());
    }

    #[test]
    fn test_save_and_load_json_and_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new();
        store.install_pair(sample_result());
        store.install_floor(DeviceId::Kinect2, tilted_floor());

        for name in ["calibration.json", "calibration.json.gz"] {
            let path = dir.path().join(name);
            store.save(&path).unwrap();
            let loaded = CalibrationStore::load(&path).unwrap();

            let original = store.pair(DeviceId::Kinect2, DeviceId::PsMove).unwrap();
            let restored = loaded.pair(DeviceId::Kinect2, DeviceId::PsMove).unwrap();
            assert_relative_eq!(
                restored.transform.transform,
                original.transform.transform,
                epsilon = 1e-12
            );
            assert!(restored.transform.rotation.angle_to(&original.transform.rotation) < 1e-12);
            assert_eq!(restored.samples, 50);
            assert_relative_eq!(restored.error.max, 0.03);

            let floor = loaded.floor(DeviceId::Kinect2).unwrap();
            assert_relative_eq!(floor.normal, tilted_floor().normal, epsilon = 1e-12);
            assert_relative_eq!(floor.distance_from_floor, 1.1);
        }
    }

    #[test]
    fn test_unknown_pair_rejected() {
        let mut document = CalibrationStore::new().to_document();
        let mut record = PairRecord::from(&sample_result());
        record.pair = "Kinect2-Toaster".to_string();
        document.pairs.push(record);
        assert!(matches!(
            CalibrationStore::new().merge_document(document),
            Err(FusionError::Persistence(_))
        ));
    }

    #[test]
    fn test_concurrent_readers_see_whole_entries() {
        let store = Arc::new(CalibrationStore::new());
        let writer_store = Arc::clone(&store);
        let writer = std::thread::spawn(move || {
            for i in 0..200 {
                let angle = i as f64 * 0.01;
                let transform = RigidTransform::from_parts(
                    Quat::from_axis_angle(&Vec3::z_axis(), angle),
                    Vec3::new(angle, 0.0, 0.0),
                );
                writer_store.install_pair(CalibrationResult::new(
                    DevicePair::new(DeviceId::OpenVr, DeviceId::Kinect2),
                    transform,
                    ReprojectionError::default(),
                    10,
                ));
            }
        });

        for _ in 0..200 {
            if let Some(result) = store.pair(DeviceId::OpenVr, DeviceId::Kinect2) {
                // Rotation angle and translation were written together
                assert_relative_eq!(
                    result.transform.rotation.angle(),
                    result.transform.translation.x,
                    epsilon = 1e-12
                );
            }
        }
        writer.join().unwrap();
    }
}
