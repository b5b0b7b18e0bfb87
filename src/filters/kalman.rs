/// Generic linear Kalman filter
///
/// State x [dim_x], measurement z [dim_z]:
///   predict: x = F x,  P = F P F^T + Q
///   update:  y = z - H x,  S = H P H^T + R,  K = P H^T S^-1
///            x = x + K y,  P = P - K H P
///
/// Dimensions are fixed at construction. R is expected to be rescaled by the
/// caller every tick (R = dt * noise covariance) to model variable sample rates.
use nalgebra::{DMatrix, DVector};

use crate::error::{FusionError, FusionResult};
use crate::types::{StateMat, StateVec};

pub const DEFAULT_IDENTICAL_MEASUREMENTS_CAP: u32 = 10;

pub struct KalmanFilter {
    dim_x: usize,
    dim_z: usize,

    /// State transition [dim_x x dim_x]
    f: StateMat,
    /// Process noise [dim_x x dim_x]
    q: StateMat,
    /// Measurement matrix [dim_z x dim_x]
    h: StateMat,
    /// Measurement noise [dim_z x dim_z]
    r: StateMat,

    state: StateVec,
    covariance: StateMat,

    /// Last invertible innovation covariance inverse, reused when S is singular
    s_inv: StateMat,

    pub skip_identical_measurements: bool,
    pub identical_measurements_cap: u32,
    previous_measurement: Option<StateVec>,
    identical_count: u32,

    /// Update counters
    updates: u64,
    skipped_updates: u64,
    singular_updates: u64,
}

impl KalmanFilter {
    /// Identity kinematics: F = Q = I, H = I (dim_z x dim_x), R = 0
    pub fn new(dim_x: usize, dim_z: usize) -> Self {
        Self::build(
            DMatrix::identity(dim_x, dim_x),
            DMatrix::identity(dim_x, dim_x),
            DMatrix::identity(dim_z, dim_x),
        )
    }

    /// Explicit transition, process noise and measurement matrices
    pub fn with_model(f: StateMat, q: StateMat, h: StateMat) -> FusionResult<Self> {
        if !f.is_square() {
            return Err(FusionError::DimensionMismatch(format!(
                "F must be square, got {}x{}",
                f.nrows(),
                f.ncols()
            )));
        }
        if q.shape() != f.shape() {
            return Err(FusionError::DimensionMismatch(format!(
                "Q must be {}x{}, got {}x{}",
                f.nrows(),
                f.ncols(),
                q.nrows(),
                q.ncols()
            )));
        }
        if h.ncols() != f.ncols() {
            return Err(FusionError::DimensionMismatch(format!(
                "H must have {} columns, got {}",
                f.ncols(),
                h.ncols()
            )));
        }
        Ok(Self::build(f, q, h))
    }

    fn build(f: StateMat, q: StateMat, h: StateMat) -> Self {
        let dim_x = f.ncols();
        let dim_z = h.nrows();
        Self {
            dim_x,
            dim_z,
            f,
            q,
            h,
            r: DMatrix::zeros(dim_z, dim_z),
            state: DVector::zeros(dim_x),
            covariance: DMatrix::identity(dim_x, dim_x),
            s_inv: DMatrix::zeros(dim_z, dim_z),
            skip_identical_measurements: false,
            identical_measurements_cap: DEFAULT_IDENTICAL_MEASUREMENTS_CAP,
            previous_measurement: None,
            identical_count: 0,
            updates: 0,
            skipped_updates: 0,
            singular_updates: 0,
        }
    }

    pub fn dim_x(&self) -> usize {
        self.dim_x
    }

    pub fn dim_z(&self) -> usize {
        self.dim_z
    }

    pub fn predict(&mut self) {
        self.state = &self.f * &self.state;
        self.covariance = &self.f * &self.covariance * self.f.transpose() + &self.q;
    }

    /// Measurement update with the current R.
    ///
    /// Returns `Ok(false)` when the measurement was skipped as a repeat of the
    /// previous one.
    pub fn update(&mut self, measurement: &StateVec) -> FusionResult<bool> {
        if measurement.len() != self.dim_z {
            return Err(FusionError::DimensionMismatch(format!(
                "measurement has {} components, filter expects {}",
                measurement.len(),
                self.dim_z
            )));
        }

        if self.skip_identical_measurements && self.is_repeat(measurement) {
            self.skipped_updates += 1;
            return Ok(false);
        }
        self.previous_measurement = Some(measurement.clone());

        let h_t = self.h.transpose();
        let innovation = measurement - &self.h * &self.state;
        let s = &self.h * &self.covariance * &h_t + &self.r;

        match s.try_inverse() {
            Some(inv) => self.s_inv = inv,
            None => {
                // Keep filtering with the last good inverse
                self.singular_updates += 1;
                log::warn!(
                    "Kalman innovation covariance is singular, reusing previous inverse ({} times)",
                    self.singular_updates
                );
            }
        }

        let gain = &self.covariance * &h_t * &self.s_inv;
        self.state += &gain * innovation;
        self.covariance = &self.covariance - &gain * &self.h * &self.covariance;

        self.updates += 1;
        Ok(true)
    }

    /// Replace R, then update
    pub fn update_with_noise(
        &mut self,
        measurement: &StateVec,
        measurement_noise: StateMat,
    ) -> FusionResult<bool> {
        self.set_r(measurement_noise)?;
        self.update(measurement)
    }

    fn is_repeat(&mut self, measurement: &StateVec) -> bool {
        let identical = self
            .previous_measurement
            .as_ref()
            .is_some_and(|prev| prev == measurement);

        if identical && self.identical_count < self.identical_measurements_cap {
            self.identical_count += 1;
            return true;
        }
        self.identical_count = 0;
        false
    }

    pub fn set_r(&mut self, r: StateMat) -> FusionResult<()> {
        if r.shape() != (self.dim_z, self.dim_z) {
            return Err(FusionError::DimensionMismatch(format!(
                "R must be {0}x{0}, got {1}x{2}",
                self.dim_z,
                r.nrows(),
                r.ncols()
            )));
        }
        self.r = r;
        Ok(())
    }

    /// R = value * I
    pub fn set_r_scalar(&mut self, value: f64) {
        self.r = DMatrix::identity(self.dim_z, self.dim_z) * value;
    }

    pub fn set_q(&mut self, q: StateMat) -> FusionResult<()> {
        if q.shape() != (self.dim_x, self.dim_x) {
            return Err(FusionError::DimensionMismatch(format!(
                "Q must be {0}x{0}, got {1}x{2}",
                self.dim_x,
                q.nrows(),
                q.ncols()
            )));
        }
        self.q = q;
        Ok(())
    }

    /// Q = value * I
    pub fn set_q_scalar(&mut self, value: f64) {
        self.q = DMatrix::identity(self.dim_x, self.dim_x) * value;
    }

    pub fn set_state(&mut self, state: StateVec) -> FusionResult<()> {
        if state.len() != self.dim_x {
            return Err(FusionError::DimensionMismatch(format!(
                "state has {} components, filter expects {}",
                state.len(),
                self.dim_x
            )));
        }
        self.state = state;
        Ok(())
    }

    /// Clears the state estimate, keeping the covariance and the model
    pub fn zero_state(&mut self) {
        self.state.fill(0.0);
    }

    /// Copies `values` into the leading state components; the rest are untouched
    pub fn seed_state(&mut self, values: &[f64]) {
        let n = values.len().min(self.dim_x);
        self.state.rows_mut(0, n).copy_from_slice(&values[..n]);
    }

    pub fn state(&self) -> &StateVec {
        &self.state
    }

    pub fn covariance(&self) -> &StateMat {
        &self.covariance
    }

    pub fn covariance_trace(&self) -> f64 {
        self.covariance.trace()
    }

    pub fn update_count(&self) -> u64 {
        self.updates
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped_updates
    }

    /// Zero state, identity covariance; model matrices and R are kept
    pub fn reset(&mut self) {
        self.state = DVector::zeros(self.dim_x);
        self.covariance = DMatrix::identity(self.dim_x, self.dim_x);
        self.s_inv = DMatrix::zeros(self.dim_z, self.dim_z);
        self.previous_measurement = None;
        self.identical_count = 0;
    }
}
