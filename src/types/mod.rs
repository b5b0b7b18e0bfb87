pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical identifier of a tracking device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceId {
    Kinect1,
    Kinect2,
    PsMove,
    RazerHydra,
    OculusRift,
    OpenVr,
}

impl DeviceId {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceId::Kinect1 => "Kinect1",
            DeviceId::Kinect2 => "Kinect2",
            DeviceId::PsMove => "PSMove",
            DeviceId::RazerHydra => "RazerHydra",
            DeviceId::OculusRift => "OculusRift",
            DeviceId::OpenVr => "OpenVR",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Kinect1" => Some(DeviceId::Kinect1),
            "Kinect2" => Some(DeviceId::Kinect2),
            "PSMove" => Some(DeviceId::PsMove),
            "RazerHydra" => Some(DeviceId::RazerHydra),
            "OculusRift" => Some(DeviceId::OculusRift),
            "OpenVR" => Some(DeviceId::OpenVr),
            _ => None,
        }
    }

    /// Sensor units to meters for positions reported by this device
    pub fn unit_scale(&self) -> f64 {
        match self {
            // Kinect 1 floor points come in millimeters
            DeviceId::Kinect1 => 0.001,
            _ => 1.0,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered device pair: calibration maps `from` coordinates into `to` coordinates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DevicePair {
    pub from: DeviceId,
    pub to: DeviceId,
}

impl DevicePair {
    pub fn new(from: DeviceId, to: DeviceId) -> Self {
        Self { from, to }
    }

    pub fn reversed(&self) -> Self {
        Self::new(self.to, self.from)
    }

    /// Persistence key, e.g. "Kinect2-PSMove"
    pub fn key(&self) -> String {
        format!("{}-{}", self.from, self.to)
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let (from, to) = key.split_once('-')?;
        Some(Self::new(DeviceId::from_name(from)?, DeviceId::from_name(to)?))
    }
}

impl fmt::Display for DevicePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// One pose reading of a joint or controller
#[derive(Clone, Debug)]
pub struct PoseSample {
    pub device: DeviceId,
    /// Joint or controller index within the device
    pub joint: u32,
    pub position: Vec3,
    pub rotation: Quat,
    /// Confidence in [0, 1]
    pub position_confidence: f64,
    /// Confidence in [0, 1]
    pub rotation_confidence: f64,
}

impl PoseSample {
    pub fn new(device: DeviceId, joint: u32, position: Vec3, rotation: Quat) -> Self {
        Self {
            device,
            joint,
            position,
            rotation,
            position_confidence: 1.0,
            rotation_confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, position: f64, rotation: f64) -> Self {
        self.position_confidence = position.clamp(0.0, 1.0);
        self.rotation_confidence = rotation.clamp(0.0, 1.0);
        self
    }
}

/// Floor plane as reported by a depth sensor's floor detector
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FloorPlaneReading {
    pub normal: Vec3,
    pub point: Vec3,
}
