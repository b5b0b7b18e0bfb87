use crate::types::{up, FloorPlaneReading, Quat, Vec3};

/// Normals shorter than this are treated as missing
const MIN_NORMAL_NORM_SQUARED: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FloorPlane {
    /// Unit floor normal in sensor coordinates
    pub normal: Vec3,
    /// Height of the sensor above the floor [m], negative when below
    pub distance_from_floor: f64,
    /// Rotation taking the measured normal onto up
    pub pitch_rotation: Quat,
}

impl FloorPlane {
    pub fn level() -> Self {
        Self {
            normal: up(),
            distance_from_floor: 0.0,
            pitch_rotation: Quat::identity(),
        }
    }

    /// Rotation to apply to a model or avatar root tracked by this sensor
    pub fn model_rotation(&self) -> Quat {
        self.pitch_rotation.inverse()
    }
}

pub struct FloorPlaneEstimator;

impl FloorPlaneEstimator {
    /// `scale` converts sensor units of `reading.point` into meters.
    pub fn estimate(reading: &FloorPlaneReading, scale: f64) -> FloorPlane {
        let normal = Self::normalized_normal(&reading.normal);

        // Closest floor point to the sensor origin: n (n . p) / |n|^2, n is unit here
        let along_normal = normal.dot(&reading.point);
        let closest = normal * along_normal * scale;
        let mut distance = closest.norm();
        if distance.is_nan() {
            distance = 0.0;
        }
        // The floor lies against the normal when the sensor is above it
        let distance_from_floor = if along_normal > 0.0 { -distance } else { distance };

        let pitch_rotation = Quat::rotation_between(&normal, &up()).unwrap_or_else(|| {
            // Only fails for an exactly downward normal, which normalization excludes
            Quat::identity()
        });

        log::debug!(
            "Floor plane: normal {:?}, distance {:.3} m, pitch {:.2} deg",
            normal.as_slice(),
            distance_from_floor,
            pitch_rotation.angle().to_degrees()
        );

        FloorPlane {
            normal,
            distance_from_floor,
            pitch_rotation,
        }
    }

    /// Unit normal pointing into the upper hemisphere; degenerate input yields up.
    pub fn normalized_normal(normal: &Vec3) -> Vec3 {
        let norm_squared = normal.norm_squared();
        if !norm_squared.is_finite() || norm_squared < MIN_NORMAL_NORM_SQUARED {
            log::warn!("Degenerate floor normal {:?}, assuming up", normal.as_slice());
            return up();
        }
        let unit = normal / norm_squared.sqrt();
        if unit.dot(&up()) < 0.0 {
            // Plane equations are sign-ambiguous; the floor normal faces the room
            -unit
        } else {
            unit
        }
    }
}
