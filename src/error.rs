use thiserror::Error;

use crate::types::{DeviceId, DevicePair};

/// Fusion and calibration error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("Device {0} is not connected")]
    DeviceUnavailable(DeviceId),

    #[error(
        "Calibration samples are degenerate ({samples} samples): collect wider, calmer motions"
    )]
    SingularSystem { samples: usize },

    #[error("Need at least {needed} samples, got {got}")]
    TooFewSamples { got: usize, needed: usize },

    #[error("Sample sequences differ in length: {device_a} vs {device_b}")]
    SampleCountMismatch { device_a: usize, device_b: usize },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("No calibration stored for {0}")]
    MissingCalibration(DevicePair),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Result type for fusion operations
pub type FusionResult<T> = Result<T, FusionError>;

impl From<std::io::Error> for FusionError {
    fn from(err: std::io::Error) -> Self {
        FusionError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for FusionError {
    fn from(err: serde_json::Error) -> Self {
        FusionError::Persistence(err.to_string())
    }
}
