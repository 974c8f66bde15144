//! IMU simulation
//!
//! Body frame: X forward, Y left, Z up.
//!
//! - **Accelerometer** (m/s²): X from the derivative of linear velocity, Y
//!   from centripetal acceleration `v·ω`, Z reads +1 g when level.
//! - **Gyroscope** (deg/s): Z is the yaw rate, counter-clockwise positive.
//! - **Heading**: compass degrees of the true rotation in [0, 360).

use super::config::ImuConfig;
use super::noise::NoiseGenerator;
use crate::core::math::heading_degrees;
use crate::core::types::{ImuData, RobotVelocity};

/// Standard gravity (m/s²)
pub const GRAVITY: f32 = 9.81;

/// IMU simulator
pub struct ImuSimulator {
    config: ImuConfig,
    noise: NoiseGenerator,
    prev_linear: f32,
}

impl ImuSimulator {
    pub fn new(config: &ImuConfig, noise: NoiseGenerator) -> Self {
        Self {
            config: config.clone(),
            noise,
            prev_linear: 0.0,
        }
    }

    /// Forget the previous velocity sample (after a teleport).
    pub fn reset(&mut self) {
        self.prev_linear = 0.0;
    }

    /// Generate a reading for the current twist and heading.
    pub fn generate(&mut self, velocity: &RobotVelocity, rotation: f32, dt: f32) -> ImuData {
        let forward_accel = if dt > 0.0 {
            (velocity.linear - self.prev_linear) / dt
        } else {
            0.0
        };
        self.prev_linear = velocity.linear;

        let centripetal = velocity.linear * velocity.angular;
        let a = self.config.accel_stddev;
        let g = self.config.gyro_stddev;

        ImuData {
            accel: [
                forward_accel + self.noise.gaussian(a),
                centripetal + self.noise.gaussian(a),
                GRAVITY + self.noise.gaussian(a),
            ],
            gyro: [
                self.noise.gaussian(g),
                self.noise.gaussian(g),
                velocity.angular.to_degrees() + self.noise.gaussian(g),
            ],
            heading_deg: heading_degrees(rotation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quiet() -> ImuSimulator {
        let config = ImuConfig {
            gyro_stddev: 0.0,
            accel_stddev: 0.0,
        };
        ImuSimulator::new(&config, NoiseGenerator::new(42))
    }

    #[test]
    fn test_stationary_level() {
        let mut imu = ImuSimulator::new(&ImuConfig::default(), NoiseGenerator::new(42));
        let r = imu.generate(&RobotVelocity::default(), 0.0, 0.01);
        assert!(r.accel[0].abs() < 0.2, "accel_x={}", r.accel[0]);
        assert!((r.accel[2] - GRAVITY).abs() < 0.2, "accel_z={}", r.accel[2]);
        assert!(r.gyro[2].abs() < 1.0, "gyro_z={}", r.gyro[2]);
    }

    #[test]
    fn test_acceleration_from_velocity_change() {
        let mut imu = quiet();
        let v = RobotVelocity {
            linear: 0.1,
            angular: 0.0,
        };
        let r = imu.generate(&v, 0.0, 0.01);
        assert_relative_eq!(r.accel[0], 10.0, epsilon = 1e-3);
        // Constant velocity afterwards
        let r = imu.generate(&v, 0.0, 0.01);
        assert_relative_eq!(r.accel[0], 0.0);
    }

    #[test]
    fn test_ccw_rotation_positive_gyro() {
        let mut imu = quiet();
        let v = RobotVelocity {
            linear: 0.2,
            angular: 1.0,
        };
        let r = imu.generate(&v, 0.5, 0.01);
        assert_relative_eq!(r.gyro[2], 1.0f32.to_degrees(), epsilon = 1e-3);
        assert_relative_eq!(r.accel[1], 0.2, epsilon = 1e-6);
        assert_relative_eq!(r.heading_deg, 0.5f32.to_degrees(), epsilon = 1e-3);
    }
}
