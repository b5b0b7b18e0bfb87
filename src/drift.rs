// Yaw drift correction.
//
// A drifting rotation source (IMU-based HMD or controller) is pulled toward a
// compass source whose heading does not drift (optical tracker, body joint).
// Only the heading is corrected; pitch and roll of the drifting source are
// trusted as-is.

use nalgebra::DVector;

use crate::config::FilterConfig;
use crate::filters::KalmanFilter;
use crate::types::{
    forward, heading_difference, look_rotation, pitch_degrees, up, yaw_degrees, yaw_only, Quat,
    Vec3, YAW_VECTOR_DIM,
};

/// A body-joint compass is rejected when it faces further than this from the sensor
const MAX_BODY_FACING_DEGREES: f64 = 90.0;

/// Why a tick did not update the correction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriftHold {
    PitchLimit,
    FacingAway,
    DegenerateHeading,
}

pub struct YawDriftCorrector {
    filter: KalmanFilter,
    drift_noise_covariance: f64,
    correction_rate: f64,
    max_pitch_degrees: f64,
    /// Heading a tracked user has when facing the sensor, for body-joint compasses
    body_facing_heading: Option<f64>,

    filtered_difference: Quat,
    final_yaw_difference: Quat,
    last_hold: Option<DriftHold>,
}

impl YawDriftCorrector {
    pub fn new(drift_noise_covariance: f64, correction_rate: f64, max_pitch_degrees: f64) -> Self {
        let mut filter = KalmanFilter::new(YAW_VECTOR_DIM, YAW_VECTOR_DIM);
        // Two sources agreeing tick after tick is not a stalled sensor
        filter.skip_identical_measurements = false;
        Self {
            filter,
            drift_noise_covariance,
            correction_rate,
            max_pitch_degrees,
            body_facing_heading: None,
            filtered_difference: Quat::identity(),
            final_yaw_difference: Quat::identity(),
            last_hold: None,
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(
            config.drift_noise_covariance,
            config.drift_correction_rate,
            config.max_pitch_degrees,
        )
    }

    /// Treat the compass as a skeleton joint: readings facing away from the
    /// sensor are unreliable and get rejected. A sensor looking down +Z sees
    /// a user facing it at heading 180.
    pub fn with_body_joint_compass(mut self, facing_heading_degrees: f64) -> Self {
        self.body_facing_heading = Some(facing_heading_degrees);
        self
    }

    pub fn set_correction_rate(&mut self, rate: f64) {
        self.correction_rate = rate;
    }

    /// Feed one tick, returns the drifting rotation with its yaw corrected
    pub fn update(&mut self, drifting: &Quat, compass: &Quat, dt: f64) -> Quat {
        self.last_hold = self.track(drifting, compass, dt).err();
        if let Some(hold) = self.last_hold {
            log::trace!("Yaw drift correction held: {hold:?}");
        }
        self.corrected(drifting)
    }

    fn track(&mut self, drifting: &Quat, compass: &Quat, dt: f64) -> Result<(), DriftHold> {
        let limit = self.max_pitch_degrees;
        if pitch_degrees(drifting) > limit || pitch_degrees(compass) > limit {
            return Err(DriftHold::PitchLimit);
        }
        if let Some(facing) = self.body_facing_heading {
            if heading_difference(yaw_degrees(compass), facing).abs() > MAX_BODY_FACING_DEGREES {
                return Err(DriftHold::FacingAway);
            }
        }

        let (Some(drifting_yaw), Some(compass_yaw)) = (yaw_only(drifting), yaw_only(compass)) else {
            return Err(DriftHold::DegenerateHeading);
        };
        let difference = drifting_yaw * compass_yaw.inverse();
        let heading = difference * forward();

        let dt = dt.max(0.0);
        self.filter.predict();
        self.filter.set_r_scalar(dt * self.drift_noise_covariance);
        if self
            .filter
            .update(&DVector::from_column_slice(&[heading.x, heading.z]))
            .is_err()
        {
            return Err(DriftHold::DegenerateHeading);
        }

        let state = self.filter.state();
        // Zero state right after a recenter has no heading yet
        if let Some(filtered) = look_rotation(&Vec3::new(state[0], 0.0, state[1]), &up()) {
            self.filtered_difference = filtered;
        }

        let t = (dt * self.correction_rate).clamp(0.0, 1.0);
        let blended = self
            .final_yaw_difference
            .try_slerp(&self.filtered_difference, t, 1e-9)
            .unwrap_or(self.filtered_difference);
        // Slerp loses unit norm over many small steps; a stretched quaternion would scale poses
        self.final_yaw_difference = Quat::new_normalize(blended.into_inner());
        Ok(())
    }

    /// `drifting` with the current yaw correction removed
    pub fn corrected(&self, drifting: &Quat) -> Quat {
        self.final_yaw_difference.inverse() * drifting
    }

    /// Forget all accumulated drift and start over from zero correction
    pub fn recenter_pose(&mut self) {
        log::info!(
            "Recentering yaw drift correction ({:.1} deg)",
            self.yaw_correction_degrees()
        );
        self.filter.reset();
        self.filtered_difference = Quat::identity();
        self.final_yaw_difference = Quat::identity();
        self.last_hold = None;
    }

    pub fn yaw_difference(&self) -> Quat {
        self.final_yaw_difference
    }

    /// Current correction as a signed heading, degrees in (-180, 180]
    pub fn yaw_correction_degrees(&self) -> f64 {
        heading_difference(yaw_degrees(&self.final_yaw_difference), 0.0)
    }

    pub fn last_hold(&self) -> Option<DriftHold> {
        self.last_hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn yaw(degrees: f64) -> Quat {
        Quat::from_axis_angle(&Vec3::y_axis(), degrees.to_radians())
    }

    fn pitch(degrees: f64) -> Quat {
        Quat::from_axis_angle(&Vec3::x_axis(), degrees.to_radians())
    }

    fn heading_error(corrector: &YawDriftCorrector, drifting: &Quat, compass: &Quat) -> f64 {
        let corrected = corrector.corrected(drifting);
        heading_difference(yaw_degrees(&corrected), yaw_degrees(compass)).abs()
    }

    #[test]
    fn test_constant_offset_converges() {
        let mut corrector = YawDriftCorrector::from_config(&FilterConfig::default());
        let compass = yaw(30.0) * pitch(-15.0);
        let drifting = yaw(20.0) * compass;

        for _ in 0..3000 {
            corrector.update(&drifting, &compass, 0.1);
        }
        let corrected = corrector.corrected(&drifting);
        assert!(heading_error(&corrector, &drifting, &compass) < 0.1);
        assert_relative_eq!(corrector.yaw_correction_degrees(), 20.0, epsilon = 0.1);
        // Pitch is left alone
        assert_relative_eq!(pitch_degrees(&corrected), pitch_degrees(&drifting), epsilon = 1e-9);
    }

    #[test]
    fn test_correction_stays_unit_over_long_runs() {
        let mut corrector = YawDriftCorrector::from_config(&FilterConfig::default());
        let compass = yaw(-70.0) * pitch(25.0);
        let drifting = yaw(33.0) * compass;
        for _ in 0..30_000 {
            corrector.update(&drifting, &compass, 0.011);
        }
        assert!((corrector.yaw_difference().norm() - 1.0).abs() < 1e-12);

        let corrected = corrector.corrected(&drifting);
        assert!((corrected.norm() - 1.0).abs() < 1e-12);
        assert_relative_eq!(pitch_degrees(&corrected), pitch_degrees(&drifting), epsilon = 1e-9);
    }

    #[test]
    fn test_higher_rate_converges_faster() {
        let compass = yaw(-40.0);
        let drifting = yaw(25.0) * compass;

        let errors: Vec<f64> = [0.05, 0.1, 0.5]
            .iter()
            .map(|&rate| {
                let mut corrector = YawDriftCorrector::new(3000.0, rate, 60.0);
                for _ in 0..300 {
                    corrector.update(&drifting, &compass, 0.1);
                }
                heading_error(&corrector, &drifting, &compass)
            })
            .collect();
        assert!(errors[0] > errors[1], "{errors:?}");
        assert!(errors[1] > errors[2], "{errors:?}");
    }

    #[test]
    fn test_tracks_slow_ramp() {
        let mut corrector = YawDriftCorrector::from_config(&FilterConfig::default());
        let compass = yaw(10.0);
        let mut worst: f64 = 0.0;
        for i in 0..6000 {
            let drift = i as f64 * 0.01;
            let drifting = yaw(drift) * compass;
            corrector.update(&drifting, &compass, 0.1);
            if i > 1000 {
                worst = worst.max(heading_error(&corrector, &drifting, &compass));
            }
        }
        assert!(worst < 3.0, "lag {worst}");
    }

    #[test]
    fn test_steep_pitch_holds_correction() {
        let mut corrector = YawDriftCorrector::from_config(&FilterConfig::default());
        let compass = yaw(0.0);
        let drifting = yaw(15.0);
        for _ in 0..200 {
            corrector.update(&drifting, &compass, 0.1);
        }
        let before = corrector.yaw_difference();

        let looking_up = yaw(60.0) * pitch(-75.0);
        for _ in 0..100 {
            corrector.update(&looking_up, &compass, 0.1);
            assert_eq!(corrector.last_hold(), Some(DriftHold::PitchLimit));
        }
        assert_eq!(corrector.yaw_difference(), before);
    }

    #[test]
    fn test_body_joint_facing_away_is_rejected() {
        let mut corrector =
            YawDriftCorrector::from_config(&FilterConfig::default()).with_body_joint_compass(180.0);
        let away = yaw(10.0);
        for _ in 0..100 {
            corrector.update(&yaw(40.0), &away, 0.1);
        }
        assert_eq!(corrector.last_hold(), Some(DriftHold::FacingAway));
        assert_eq!(corrector.yaw_difference(), Quat::identity());

        let facing = yaw(170.0);
        corrector.update(&yaw(200.0), &facing, 0.1);
        assert_eq!(corrector.last_hold(), None);
        assert!(corrector.yaw_correction_degrees() > 0.0);
    }

    #[test]
    fn test_recenter_clears_correction() {
        let mut corrector = YawDriftCorrector::from_config(&FilterConfig::default());
        let compass = yaw(90.0);
        let drifting = yaw(-30.0) * compass;
        for _ in 0..2000 {
            corrector.update(&drifting, &compass, 0.1);
        }
        assert!(corrector.yaw_correction_degrees().abs() > 20.0);

        corrector.recenter_pose();
        assert_eq!(corrector.yaw_difference(), Quat::identity());
        assert_eq!(corrector.corrected(&drifting), drifting);
    }
}
