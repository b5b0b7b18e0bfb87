pub mod floor;
pub mod process;
pub mod solver;

pub use floor::{FloorPlane, FloorPlaneEstimator};
pub use process::{
    CalibrationFailure, CalibrationPairKind, CalibrationPhase, CalibrationProcess,
    CalibrationReport,
};
pub use solver::{PairwiseCalibrationSolver, ReprojectionError, RigidTransform};
