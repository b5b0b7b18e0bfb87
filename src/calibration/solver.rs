/// Pairwise rigid calibration from synchronized position samples
///
/// Given device A positions a_i and device B positions b_i captured at the
/// same instants, fit b = L a + t by least squares over the augmented design
/// matrix X = [a_i | 1]:
///
///   M = (X^T X)^-1 X^T Y        (4x3)
///
/// L is not guaranteed orthonormal, so its columns are Gram-Schmidt
/// orthonormalized into the rotation R. The translation is taken from the
/// raw solution.
use nalgebra::{DMatrix, Matrix4, Rotation3};
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, FusionResult};
use crate::types::{Quat, RotationMat, Transform4, TransformSolution, Vec3, HOMOGENEOUS_DIM};

pub const MIN_CALIBRATION_SAMPLES: usize = 4;

/// Reciprocal condition number of X^T X below which the sample set is treated as degenerate
const MIN_RECIPROCAL_CONDITION: f64 = 1e-10;

/// Residual axis length below which Gram-Schmidt treats an axis as collapsed
const MIN_AXIS_NORM: f64 = 1e-9;

#[derive(Clone, Debug)]
pub struct RigidTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub rotation_matrix: RotationMat,
    pub transform: Transform4,
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            translation: Vec3::zeros(),
            rotation: Quat::identity(),
            rotation_matrix: RotationMat::identity(),
            transform: Transform4::identity(),
        }
    }

    pub fn from_parts(rotation: Quat, translation: Vec3) -> Self {
        let rotation_matrix = rotation.to_rotation_matrix().into_inner();
        Self {
            translation,
            rotation,
            rotation_matrix,
            transform: compose(&rotation_matrix, &translation),
        }
    }

    pub fn apply(&self, point: &Vec3) -> Vec3 {
        self.rotation_matrix * point + self.translation
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self::from_parts(rotation, -(rotation * self.translation))
    }
}

/// Error statistics of a transform over its calibration samples
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionError {
    pub mean: f64,
    pub max: f64,
}

pub struct PairwiseCalibrationSolver;

impl PairwiseCalibrationSolver {
    pub fn solve(samples_a: &[Vec3], samples_b: &[Vec3]) -> FusionResult<RigidTransform> {
        if samples_a.len() != samples_b.len() {
            return Err(FusionError::SampleCountMismatch {
                device_a: samples_a.len(),
                device_b: samples_b.len(),
            });
        }
        let n = samples_a.len();
        if n < MIN_CALIBRATION_SAMPLES {
            return Err(FusionError::TooFewSamples {
                got: n,
                needed: MIN_CALIBRATION_SAMPLES,
            });
        }

        let mut x = DMatrix::<f64>::zeros(n, HOMOGENEOUS_DIM);
        let mut y = DMatrix::<f64>::zeros(n, 3);
        for (i, (a, b)) in samples_a.iter().zip(samples_b).enumerate() {
            x[(i, 0)] = a.x;
            x[(i, 1)] = a.y;
            x[(i, 2)] = a.z;
            x[(i, 3)] = 1.0;
            y[(i, 0)] = b.x;
            y[(i, 1)] = b.y;
            y[(i, 2)] = b.z;
        }

        let x_t = x.transpose();
        let normal = &x_t * &x;
        if !is_well_conditioned(&normal) {
            log::warn!("Calibration normal equations are singular ({n} samples)");
            return Err(FusionError::SingularSystem { samples: n });
        }
        let normal_inv = normal
            .try_inverse()
            .ok_or(FusionError::SingularSystem { samples: n })?;
        let m = normal_inv * x_t * y; // 4x3

        let solution = TransformSolution::from_fn(|r, c| m[(c, r)]);
        let linear: RotationMat = solution.fixed_view::<3, 3>(0, 0).into_owned();
        let translation: Vec3 = solution.column(3).into_owned();

        // A's samples may span 3D while B's do not; L is then rank-deficient
        let Some(mut rotation_matrix) = orthonormalize(&linear) else {
            log::warn!("Calibration solution has a degenerate linear part ({n} samples)");
            return Err(FusionError::SingularSystem { samples: n });
        };
        if rotation_matrix.determinant() < 0.0 {
            // Mirrored sample sets; keep a proper rotation
            log::warn!("Calibration solution contains a reflection, flipping third axis");
            let flipped: Vec3 = -rotation_matrix.column(2).into_owned();
            rotation_matrix.set_column(2, &flipped);
        }

        let rotation =
            Quat::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation_matrix));

        log::debug!(
            "Solved calibration from {n} samples: translation {:?}, rotation {:.2} deg",
            translation.as_slice(),
            rotation.angle().to_degrees()
        );

        Ok(RigidTransform {
            translation,
            rotation,
            rotation_matrix,
            transform: compose(&rotation_matrix, &translation),
        })
    }

    /// Distance between each transformed A sample and its paired B sample
    pub fn reprojection_errors(
        samples_a: &[Vec3],
        samples_b: &[Vec3],
        transform: &RigidTransform,
    ) -> Vec<f64> {
        samples_a
            .iter()
            .zip(samples_b)
            .map(|(a, b)| (transform.apply(a) - b).norm())
            .collect()
    }

    pub fn calibration_error(
        samples_a: &[Vec3],
        samples_b: &[Vec3],
        transform: &RigidTransform,
    ) -> ReprojectionError {
        let errors = Self::reprojection_errors(samples_a, samples_b, transform);
        if errors.is_empty() {
            return ReprojectionError::default();
        }
        ReprojectionError {
            mean: errors.iter().sum::<f64>() / errors.len() as f64,
            max: errors.iter().copied().fold(0.0, f64::max),
        }
    }
}

fn is_well_conditioned(normal: &DMatrix<f64>) -> bool {
    if normal.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let singular_values = normal.clone().svd(false, false).singular_values;
    let max = singular_values.max();
    let min = singular_values.min();
    max > 0.0 && min / max > MIN_RECIPROCAL_CONDITION
}

/// Gram-Schmidt over the columns: normalize, then remove earlier components.
///
/// Returns `None` when the columns do not span 3D (an axis collapses to zero
/// or goes non-finite).
pub fn orthonormalize(m: &RotationMat) -> Option<RotationMat> {
    let unit = |v: Vec3| {
        let norm = v.norm();
        (norm.is_finite() && norm > MIN_AXIS_NORM).then(|| v / norm)
    };
    let c0 = unit(m.column(0).into_owned())?;
    let mut c1: Vec3 = m.column(1).into_owned();
    c1 -= c0 * c0.dot(&c1);
    let c1 = unit(c1)?;
    let mut c2: Vec3 = m.column(2).into_owned();
    c2 -= c0 * c0.dot(&c2);
    c2 -= c1 * c1.dot(&c2);
    let c2 = unit(c2)?;
    Some(RotationMat::from_columns(&[c0, c1, c2]))
}

/// Homogeneous transform with `rotation` upper-left and `translation` in the last column
pub fn compose(rotation: &RotationMat, translation: &Vec3) -> Transform4 {
    let mut t = Matrix4::identity();
    t.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    t.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn cube_corners() -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(1.0, 1.0, 1.0),
        ]
    }

    fn assert_orthonormal(r: &RotationMat) {
        for i in 0..3 {
            assert_relative_eq!(r.column(i).norm(), 1.0, epsilon = 1e-9);
            for j in (i + 1)..3 {
                assert_relative_eq!(r.column(i).dot(&r.column(j)), 0.0, epsilon = 1e-9);
            }
        }
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rz90_cube_scenario() {
        let rz = Quat::from_axis_angle(&Vec3::z_axis(), FRAC_PI_2);
        let offset = Vec3::new(1.0, 0.0, 0.0);
        let a = cube_corners();
        let b: Vec<Vec3> = a.iter().map(|p| rz * p + offset).collect();

        let result = PairwiseCalibrationSolver::solve(&a, &b).unwrap();
        assert!(result.rotation.angle_to(&rz) < 1e-6);
        assert_relative_eq!(result.translation, offset, epsilon = 1e-6);

        for err in PairwiseCalibrationSolver::reprojection_errors(&a, &b, &result) {
            assert!(err < 1e-3);
        }
        assert_relative_eq!(result.transform[(3, 3)], 1.0);
        assert_relative_eq!(result.transform[(0, 3)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(result.transform[(1, 0)], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_recovers_arbitrary_rigid_transform() {
        let rotation = Quat::from_euler_angles(0.3, -1.1, 2.0);
        let translation = Vec3::new(-0.4, 1.7, 2.5);
        let a: Vec<Vec3> = (0..20)
            .map(|i| {
                let t = i as f64;
                Vec3::new((t * 0.7).sin() * 1.5, (t * 1.3).cos(), t * 0.1 - 1.0)
            })
            .collect();
        let b: Vec<Vec3> = a.iter().map(|p| rotation * p + translation).collect();

        let result = PairwiseCalibrationSolver::solve(&a, &b).unwrap();
        assert!(result.rotation.angle_to(&rotation) < 1e-8);
        assert_relative_eq!(result.translation, translation, epsilon = 1e-8);
        assert_orthonormal(&result.rotation_matrix);

        let err = PairwiseCalibrationSolver::calibration_error(&a, &b, &result);
        assert!(err.mean < 1e-8 && err.max < 1e-8);
    }

    #[test]
    fn test_noisy_samples_still_orthonormal() {
        let rotation = Quat::from_axis_angle(&Vec3::y_axis(), 0.8);
        let a: Vec<Vec3> = (0..40)
            .map(|i| {
                let t = i as f64 * 0.37;
                Vec3::new(t.sin(), (2.0 * t).cos() * 0.8, (0.5 * t).sin() * 1.2)
            })
            .collect();
        // Deterministic pseudo-noise, a few millimeters
        let b: Vec<Vec3> = a
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let k = i as f64;
                let noise = Vec3::new((k * 12.9).sin(), (k * 78.2).sin(), (k * 37.7).sin()) * 0.003;
                rotation * p + Vec3::new(0.2, 0.0, -0.1) + noise
            })
            .collect();

        let result = PairwiseCalibrationSolver::solve(&a, &b).unwrap();
        assert_orthonormal(&result.rotation_matrix);
        assert!(result.rotation.angle_to(&rotation) < 0.02);
        let err = PairwiseCalibrationSolver::calibration_error(&a, &b, &result);
        assert!(err.mean < 0.02);
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let a = cube_corners();
        let b = &a[..5];
        assert_eq!(
            PairwiseCalibrationSolver::solve(&a, b).unwrap_err(),
            FusionError::SampleCountMismatch { device_a: 6, device_b: 5 }
        );
    }

    #[test]
    fn test_too_few_samples() {
        let a = cube_corners();
        assert!(matches!(
            PairwiseCalibrationSolver::solve(&a[..3], &a[..3]),
            Err(FusionError::TooFewSamples { got: 3, needed: 4 })
        ));
    }

    #[test]
    fn test_colinear_samples_are_singular() {
        let a: Vec<Vec3> = (0..10).map(|i| Vec3::new(i as f64, 0.0, 0.0)).collect();
        let b = a.clone();
        assert!(matches!(
            PairwiseCalibrationSolver::solve(&a, &b),
            Err(FusionError::SingularSystem { samples: 10 })
        ));
    }

    #[test]
    fn test_degenerate_target_samples_are_singular() {
        let a = cube_corners();
        // B collapses onto a line, and then onto a single point
        let colinear: Vec<Vec3> = a
            .iter()
            .map(|p| Vec3::new(p.x + p.y + p.z, 0.0, 0.0))
            .collect();
        let constant = vec![Vec3::new(0.5, 1.0, 2.0); a.len()];
        for b in [colinear, constant] {
            assert!(matches!(
                PairwiseCalibrationSolver::solve(&a, &b),
                Err(FusionError::SingularSystem { samples: 6 })
            ));
        }
    }

    #[test]
    fn test_orthonormalize_rejects_rank_deficient() {
        let flat = RotationMat::new(1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert!(orthonormalize(&flat).is_none());
        assert!(orthonormalize(&RotationMat::from_element(f64::NAN)).is_none());
        let skewed = RotationMat::new(2.0, 0.3, 0.0, 0.1, 1.5, 0.2, 0.0, 0.1, 0.9);
        assert_orthonormal(&orthonormalize(&skewed).unwrap());
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = RigidTransform::from_parts(
            Quat::from_axis_angle(&Vec3::x_axis(), 0.4),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let p = Vec3::new(-0.5, 0.25, 4.0);
        assert_relative_eq!(t.inverse().apply(&t.apply(&p)), p, epsilon = 1e-12);
    }
}
