//! Linear algebra type system for the fusion engine
//!
//! Fixed-size aliases for the 3D math shared by calibration, drift correction
//! and the runtime transform layer. The generic Kalman filter works on
//! dynamically sized matrices, everything else is compile-time sized.

use nalgebra::{DMatrix, DVector, Matrix3, Matrix4, SMatrix, UnitQuaternion, Vector2, Vector3};

// ===== Dimensions =====
pub const POSITION_DIM: usize = 3;
pub const ROTATION_VECTOR_DIM: usize = 3;
pub const YAW_VECTOR_DIM: usize = 2;
pub const HOMOGENEOUS_DIM: usize = 4; // (x, y, z, 1)

// ===== Spatial Types =====
pub type Vec3 = Vector3<f64>;
pub type Vec2 = Vector2<f64>;
pub type Quat = UnitQuaternion<f64>;
pub type RotationMat = Matrix3<f64>;
pub type Transform4 = Matrix4<f64>;

/// 3×4 layout of the least-squares solution: linear block plus translation column
pub type TransformSolution = SMatrix<f64, POSITION_DIM, HOMOGENEOUS_DIM>;

// ===== Filter Types =====
pub type StateVec = DVector<f64>;
pub type StateMat = DMatrix<f64>;

// ===== Frame Conventions =====
// Y up, Z forward (left-handed engine convention expressed in right-handed math:
// only the axis names matter to the algorithms below).

pub fn up() -> Vec3 {
    Vec3::y()
}

pub fn forward() -> Vec3 {
    Vec3::z()
}

/// Rotation mapping +Z onto `direction` while keeping `up` upward.
/// Returns `None` when the direction is degenerate or parallel to `up`.
pub fn look_rotation(direction: &Vec3, up_hint: &Vec3) -> Option<Quat> {
    if direction.norm_squared() < 1e-12 {
        return None;
    }
    if direction.normalize().cross(&up_hint.normalize()).norm_squared() < 1e-12 {
        return None;
    }
    Some(UnitQuaternion::face_towards(direction, up_hint))
}

/// Pure-yaw rotation with the same horizontal heading as `rotation`.
pub fn yaw_only(rotation: &Quat) -> Option<Quat> {
    let fwd = rotation * forward();
    look_rotation(&Vec3::new(fwd.x, 0.0, fwd.z), &up())
}

/// Heading of `rotation` about the up axis, degrees in [0, 360).
pub fn yaw_degrees(rotation: &Quat) -> f64 {
    let fwd = rotation * forward();
    fwd.x.atan2(fwd.z).to_degrees().rem_euclid(360.0)
}

/// Magnitude of the forward vector's elevation, degrees in [0, 90].
pub fn pitch_degrees(rotation: &Quat) -> f64 {
    let fwd = rotation * forward();
    fwd.y.clamp(-1.0, 1.0).asin().abs().to_degrees()
}

/// Smallest signed difference `a - b` between two headings, degrees in (-180, 180].
pub fn heading_difference(a_deg: f64, b_deg: f64) -> f64 {
    let d = (a_deg - b_deg).rem_euclid(360.0);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}
