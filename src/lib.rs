//! Cross-device calibration and pose filtering for VR tracking rigs.
//!
//! Devices report positions and rotations in their own frames. This crate
//! smooths those readings, solves the rigid transform between any two devices
//! from synchronized samples, levels sensor frames against the floor, and keeps
//! drifting IMU headings aligned to a non-drifting compass source.

pub mod calibration;
pub mod config;
pub mod coordinates;
pub mod device;
pub mod drift;
pub mod error;
pub mod filters;
pub mod store;
pub mod types;

pub use calibration::{
    CalibrationPairKind, CalibrationPhase, CalibrationProcess, FloorPlane, FloorPlaneEstimator,
    PairwiseCalibrationSolver, RigidTransform,
};
pub use config::{CalibrationConfig, FilterConfig, FusionConfig};
pub use coordinates::CoordinateFrames;
pub use device::{FeedDevice, PoseSnapshot, SnapshotFeed, SnapshotPublisher, TrackedDevice};
pub use drift::YawDriftCorrector;
pub use error::{FusionError, FusionResult};
pub use filters::{KalmanFilter, PositionSmoother, RotationFilter};
pub use store::{CalibrationResult, CalibrationStore};
pub use types::{DeviceId, DevicePair, PoseSample};
