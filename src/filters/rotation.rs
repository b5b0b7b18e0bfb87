use nalgebra::DVector;

use super::kalman::KalmanFilter;
use crate::config::FilterConfig;
use crate::types::{Quat, Vec3, ROTATION_VECTOR_DIM};

/// Quaternion smoother.
///
/// Quaternion components are not filtered directly (q and -q are the same
/// rotation, and component signs jump near 180°). Instead the Kalman filter
/// estimates the incremental rotation from the previous output to the new
/// measurement as a shortest-arc rotation vector, which stays small and
/// continuous. After every tick the output is recomposed and the filter state
/// is re-anchored to zero around it; the covariance carries over.
pub struct RotationFilter {
    filter: KalmanFilter,
    noise_covariance: f64,
    output: Option<Quat>,

    skip_identical_measurements: bool,
    identical_measurements_cap: u32,
    previous_measurement: Option<Quat>,
    identical_count: u32,
}

impl RotationFilter {
    pub fn new(noise_covariance: f64) -> Self {
        Self {
            filter: KalmanFilter::new(ROTATION_VECTOR_DIM, ROTATION_VECTOR_DIM),
            noise_covariance,
            output: None,
            skip_identical_measurements: true,
            identical_measurements_cap: super::kalman::DEFAULT_IDENTICAL_MEASUREMENTS_CAP,
            previous_measurement: None,
            identical_count: 0,
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        let mut filter = Self::new(config.rotation_noise_covariance);
        filter.skip_identical_measurements = config.skip_identical_measurements;
        filter.identical_measurements_cap = config.identical_measurements_cap;
        filter
    }

    pub fn set_noise_covariance(&mut self, noise_covariance: f64) {
        self.noise_covariance = noise_covariance;
    }

    /// Feed one measured rotation, returns the smoothed rotation
    pub fn update(&mut self, measured: &Quat, dt: f64) -> Quat {
        let reference = match self.output {
            Some(q) => q,
            None => {
                self.output = Some(*measured);
                self.previous_measurement = Some(*measured);
                return *measured;
            }
        };

        self.filter.predict();
        if self.is_stalled(measured) {
            return reference;
        }

        // Shortest arc: scaled_axis() picks the representative with angle <= pi
        let offset = (reference.inverse() * measured).scaled_axis();
        self.filter.set_r_scalar(dt.max(0.0) * self.noise_covariance);
        // Dimensions are fixed by construction
        if self.filter.update(&DVector::from_column_slice(offset.as_slice())).is_err() {
            return reference;
        }

        let state = self.filter.state();
        let correction = Quat::from_scaled_axis(Vec3::new(state[0], state[1], state[2]));
        let smoothed = reference * correction;
        self.output = Some(smoothed);
        // Re-anchor around the new output
        self.filter.zero_state();
        smoothed
    }

    fn is_stalled(&mut self, measured: &Quat) -> bool {
        if !self.skip_identical_measurements {
            self.previous_measurement = Some(*measured);
            return false;
        }
        let identical = self
            .previous_measurement
            .is_some_and(|prev| prev.coords == measured.coords);
        self.previous_measurement = Some(*measured);

        if identical && self.identical_count < self.identical_measurements_cap {
            self.identical_count += 1;
            return true;
        }
        self.identical_count = 0;
        false
    }

    pub fn current(&self) -> Option<Quat> {
        self.output
    }

    /// Forget the smoothed rotation; the next measurement is passed through
    pub fn reset(&mut self) {
        self.filter.reset();
        self.output = None;
        self.previous_measurement = None;
        self.identical_count = 0;
    }
}
