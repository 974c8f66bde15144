//! Distance sensor ring simulation
//!
//! Eight time-of-flight sensors are ray-cast from the robot center against
//! walls and obstacles. Readings are in centimeters with bounded Gaussian
//! noise and are clamped to `[0, max_range_cm]`. A ray that hits nothing
//! reports exactly `max_range_cm` ("out of range").

use super::config::DistanceSensorConfig;
use super::floor_map::FloorMap;
use super::noise::NoiseGenerator;
use crate::core::math::heading_to_direction;
use crate::core::types::{DistanceDirection, DistanceReadings, RobotPose};

/// Distance sensor simulator
pub struct DistanceSimulator {
    config: DistanceSensorConfig,
    noise: NoiseGenerator,
}

impl DistanceSimulator {
    pub fn new(config: &DistanceSensorConfig, noise: NoiseGenerator) -> Self {
        Self {
            config: config.clone(),
            noise,
        }
    }

    /// Measure all directions from `pose`.
    pub fn measure(&mut self, map: &FloorMap, pose: &RobotPose) -> DistanceReadings {
        let mut readings = DistanceReadings::uniform(self.config.max_range_cm);
        for dir in DistanceDirection::ALL {
            readings.set(dir, self.measure_one(map, pose, dir));
        }
        readings
    }

    fn measure_one(&mut self, map: &FloorMap, pose: &RobotPose, dir: DistanceDirection) -> f32 {
        let max_range = self.config.max_range_cm;
        let angle = heading_to_direction(pose.rotation + dir.offset());

        match map.raycast(pose.position(), angle, max_range / 100.0) {
            Some(hit) => {
                let noise = self
                    .noise
                    .bounded_gaussian(self.config.noise_stddev_cm, self.config.noise_clamp_sigma);
                (hit.distance * 100.0 + noise).clamp(0.0, max_range)
            }
            None => max_range,
        }
    }
}
