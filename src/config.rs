// Configuration surface for filtering and calibration.
//
// Every field has a default; a JSON file only needs the keys it overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::calibration::solver::MIN_CALIBRATION_SAMPLES;
use crate::error::{FusionError, FusionResult};

/// Shortest interval between two accepted calibration samples [s]
pub const MIN_SAMPLE_INTERVAL: f64 = 0.1;

// ─── Filtering ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    // ── Noise covariances (R = dt * value) ──
    pub position_noise_covariance: f64,
    pub rotation_noise_covariance: f64,
    pub drift_noise_covariance: f64,

    // ── Stalled sensor handling ──
    pub skip_identical_measurements: bool,
    pub identical_measurements_cap: u32,

    // ── Yaw drift correction ──
    pub drift_correction_rate: f64,
    pub max_pitch_degrees: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            position_noise_covariance: 100.0,
            rotation_noise_covariance: 200.0,
            drift_noise_covariance: 3000.0,
            skip_identical_measurements: true,
            identical_measurements_cap: 10,
            drift_correction_rate: 0.1,
            max_pitch_degrees: 60.0,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> FusionResult<()> {
        positive("position_noise_covariance", self.position_noise_covariance)?;
        positive("rotation_noise_covariance", self.rotation_noise_covariance)?;
        positive("drift_noise_covariance", self.drift_noise_covariance)?;
        positive("drift_correction_rate", self.drift_correction_rate)?;
        if !(0.0..90.0).contains(&self.max_pitch_degrees) {
            return Err(FusionError::InvalidConfig(format!(
                "max_pitch_degrees must be in [0, 90), got {}",
                self.max_pitch_degrees
            )));
        }
        Ok(())
    }
}

// ─── Calibration ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub samples_to_take: usize,
    pub samples_per_second: f64,
    /// Both devices must move at least this far between accepted samples
    pub motion_threshold: f64,
    /// Settling window granted to each device before its connectivity check [s]
    pub device_settle_secs: f64,
    /// Calibration file written when results are shown (.json or .json.gz)
    pub output_path: Option<PathBuf>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            samples_to_take: 50,
            samples_per_second: 5.0,
            motion_threshold: 0.1,
            device_settle_secs: 5.0,
            output_path: None,
        }
    }
}

impl CalibrationConfig {
    /// Interval between samples, floored at `MIN_SAMPLE_INTERVAL`
    pub fn sample_interval(&self) -> f64 {
        if self.samples_per_second <= 0.0 {
            return MIN_SAMPLE_INTERVAL;
        }
        (1.0 / self.samples_per_second).max(MIN_SAMPLE_INTERVAL)
    }

    pub fn validate(&self) -> FusionResult<()> {
        // Fewer samples can never be solved, so fail before the operator starts sampling
        if self.samples_to_take < MIN_CALIBRATION_SAMPLES {
            return Err(FusionError::InvalidConfig(format!(
                "samples_to_take must be at least {MIN_CALIBRATION_SAMPLES}, got {}",
                self.samples_to_take
            )));
        }
        positive("samples_per_second", self.samples_per_second)?;
        if self.motion_threshold < 0.0 || self.device_settle_secs < 0.0 {
            return Err(FusionError::InvalidConfig(
                "motion_threshold and device_settle_secs must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub filter: FilterConfig,
    pub calibration: CalibrationConfig,
}

impl FusionConfig {
    pub fn from_json_file(path: &Path) -> FusionResult<Self> {
        let text = fs::read_to_string(path)?;
        let config: FusionConfig = serde_json::from_str(&text)
            .map_err(|e| FusionError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FusionResult<()> {
        self.filter.validate()?;
        self.calibration.validate()
    }
}

fn positive(name: &str, value: f64) -> FusionResult<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(FusionError::InvalidConfig(format!(
            "{name} must be positive, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(FusionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_sample_interval_floor() {
        let mut config = CalibrationConfig::default();
        config.samples_per_second = 100.0;
        assert_eq!(config.sample_interval(), MIN_SAMPLE_INTERVAL);
        config.samples_per_second = 2.0;
        assert_eq!(config.sample_interval(), 0.5);
    }

    #[test]
    fn test_partial_json_override() {
        let config: FusionConfig =
            serde_json::from_str(r#"{ "calibration": { "samples_to_take": 12 } }"#).unwrap();
        assert_eq!(config.calibration.samples_to_take, 12);
        assert_eq!(config.calibration.motion_threshold, 0.1);
        assert_eq!(config.filter.identical_measurements_cap, 10);
    }

    #[test]
    fn test_rejects_unsolvable_sample_count() {
        let mut config = CalibrationConfig::default();
        for samples in 0..MIN_CALIBRATION_SAMPLES {
            config.samples_to_take = samples;
            assert!(matches!(config.validate(), Err(FusionError::InvalidConfig(_))));
        }
        config.samples_to_take = MIN_CALIBRATION_SAMPLES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_noise() {
        let mut config = FilterConfig::default();
        config.drift_noise_covariance = 0.0;
        assert!(matches!(config.validate(), Err(FusionError::InvalidConfig(_))));
    }
}
