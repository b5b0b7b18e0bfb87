use std::sync::Arc;

use crate::error::{FusionError, FusionResult};
use crate::store::{CalibrationResult, CalibrationStore};
use crate::types::{up, DeviceId, DevicePair, Quat, Vec3};

/// Maps device-local poses into the master device's frame
///
/// With floor correction on and a floor plane stored for the master, the
/// master frame is additionally leveled (floor normal onto up) and shifted so
/// the floor sits at y = 0.
pub struct CoordinateFrames {
    master: DeviceId,
    store: Arc<CalibrationStore>,
    floor_correction: bool,
}

impl CoordinateFrames {
    pub fn new(master: DeviceId, store: Arc<CalibrationStore>) -> Self {
        Self {
            master,
            store,
            floor_correction: true,
        }
    }

    pub fn with_floor_correction(mut self, enabled: bool) -> Self {
        self.floor_correction = enabled;
        self
    }

    pub fn master(&self) -> DeviceId {
        self.master
    }

    pub fn set_master(&mut self, master: DeviceId) {
        if master != self.master {
            log::info!("Master device {} -> {master}", self.master);
        }
        self.master = master;
    }

    pub fn convert_position(&self, device: DeviceId, position: &Vec3) -> FusionResult<Vec3> {
        let in_master = if device == self.master {
            *position
        } else {
            self.calibration(device)?.transform.apply(position)
        };

        Ok(match self.floor() {
            Some((pitch, height)) => pitch * in_master + up() * height,
            None => in_master,
        })
    }

    pub fn convert_rotation(&self, device: DeviceId, rotation: &Quat) -> FusionResult<Quat> {
        let in_master = if device == self.master {
            *rotation
        } else {
            self.calibration(device)?.transform.rotation * rotation
        };

        Ok(match self.floor() {
            Some((pitch, _)) => pitch * in_master,
            None => in_master,
        })
    }

    fn calibration(&self, device: DeviceId) -> FusionResult<Arc<CalibrationResult>> {
        self.store
            .pair(device, self.master)
            .ok_or(FusionError::MissingCalibration(DevicePair::new(device, self.master)))
    }

    fn floor(&self) -> Option<(Quat, f64)> {
        if !self.floor_correction {
            return None;
        }
        self.store
            .floor(self.master)
            .map(|floor| (floor.pitch_rotation, floor.distance_from_floor))
    }
}
