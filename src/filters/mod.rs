pub mod kalman;
pub mod position;
pub mod rotation;

pub use kalman::KalmanFilter;
pub use position::PositionSmoother;
pub use rotation::RotationFilter;
