use nalgebra::DVector;

use super::kalman::KalmanFilter;
use crate::config::FilterConfig;
use crate::types::{Vec3, POSITION_DIM};

/// 3D position smoother: identity kinematics, R = dt * noise covariance
pub struct PositionSmoother {
    filter: KalmanFilter,
    noise_covariance: f64,
    initialized: bool,
}

impl PositionSmoother {
    pub fn new(noise_covariance: f64) -> Self {
        Self {
            filter: KalmanFilter::new(POSITION_DIM, POSITION_DIM),
            noise_covariance,
            initialized: false,
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        let mut smoother = Self::new(config.position_noise_covariance);
        smoother.filter.skip_identical_measurements = config.skip_identical_measurements;
        smoother.filter.identical_measurements_cap = config.identical_measurements_cap;
        smoother
    }

    pub fn update(&mut self, measured: &Vec3, dt: f64) -> Vec3 {
        if !self.initialized {
            // Start at the first measurement instead of pulling in from the origin
            self.filter.seed_state(measured.as_slice());
            self.initialized = true;
            return *measured;
        }

        let z = DVector::from_column_slice(measured.as_slice());
        self.filter.predict();
        self.filter.set_r_scalar(dt.max(0.0) * self.noise_covariance);
        if let Err(e) = self.filter.update(&z) {
            log::warn!("Position update rejected: {e}");
        }
        self.current()
    }

    pub fn current(&self) -> Vec3 {
        let x = self.filter.state();
        Vec3::new(x[0], x[1], x[2])
    }

    pub fn reset(&mut self) {
        self.filter.reset();
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_jitter_is_attenuated() {
        let mut smoother = PositionSmoother::new(100.0);
        let center = Vec3::new(0.5, 1.2, -0.3);
        smoother.update(&center, 0.016);

        let mut max_dev: f64 = 0.0;
        for i in 0..200 {
            let jitter = if i % 2 == 0 { 0.02 } else { -0.02 };
            let out = smoother.update(&(center + Vec3::new(jitter, 0.0, 0.0)), 0.016);
            max_dev = max_dev.max((out - center).norm());
        }
        assert!(max_dev < 0.02);
    }

    #[test]
    fn test_follows_step() {
        let mut smoother = PositionSmoother::new(100.0);
        smoother.update(&Vec3::zeros(), 0.016);
        let target = Vec3::new(1.0, 0.0, 0.0);
        let mut out = Vec3::zeros();
        for i in 0..100 {
            // Small wobble so the repeat filter never kicks in
            let wobble = Vec3::new(0.0, 1e-6 * (i % 2) as f64, 0.0);
            out = smoother.update(&(target + wobble), 0.016);
        }
        assert_relative_eq!(out.x, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_first_measurement_seeds_filter() {
        let mut smoother = PositionSmoother::new(100.0);
        let p = Vec3::new(2.0, 1.5, -4.0);
        assert_eq!(smoother.update(&p, 0.016), p);
        assert_eq!(smoother.current(), p);

        // Filtering continues from the seed rather than from the origin
        let out = smoother.update(&(p + Vec3::new(0.01, 0.0, 0.0)), 0.016);
        assert_relative_eq!(out.y, p.y, epsilon = 1e-9);
        assert_relative_eq!(out.z, p.z, epsilon = 1e-9);
        assert!(out.x >= p.x && out.x <= p.x + 0.01);
    }

    #[test]
    fn test_reset_restarts_from_measurement() {
        let mut smoother = PositionSmoother::new(100.0);
        smoother.update(&Vec3::new(3.0, 3.0, 3.0), 0.016);
        smoother.reset();
        let p = Vec3::new(-1.0, 0.0, 2.0);
        assert_eq!(smoother.update(&p, 0.016), p);
    }
}
