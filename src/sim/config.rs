//! Simulation configuration
//!
//! Every parameter has a default matching the cube robot hardware, so an
//! empty `[simulation]` table is a valid configuration.
//!
//! # Configuration Hierarchy
//!
//! ```text
//! SimulationConfig
//! ├── tick_rate_hz, random_seed      # Simulation control
//! ├── RobotConfig                    # Physical parameters
//! │   ├── wheel_base, wheel_radius, max_rpm
//! │   └── robot_radius, ticks_per_meter
//! ├── DistanceSensorConfig           # 8-direction ToF sensors
//! ├── LineSensorConfig               # Downward IR array
//! ├── ImuConfig                      # Gyro / accel noise
//! ├── EncoderConfig                  # Wheel slip noise
//! └── BatteryConfig                  # Capacity and draw model
//! ```
//!
//! # Default Values
//!
//! | Parameter | Default | Source |
//! |-----------|---------|--------|
//! | wheel_base | 0.08 m | Cube chassis |
//! | wheel_radius | 0.016 m | 32 mm wheels |
//! | max_rpm | 150 | N20 gear motor |
//! | ticks_per_meter | 1000 | Firmware scaling |
//! | distance max_range | 255 cm | u8 sensor register |
//! | tick_rate | 100 Hz | Simulation loop |

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

// ============================================================================
// Robot
// ============================================================================

/// Physical robot parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotConfig {
    /// Distance between wheel contact points (meters)
    #[serde(default = "default_wheel_base")]
    pub wheel_base: f32,

    /// Wheel radius (meters)
    #[serde(default = "default_wheel_radius")]
    pub wheel_radius: f32,

    /// Motor speed at full duty
    #[serde(default = "default_max_rpm")]
    pub max_rpm: f32,

    /// Collision radius of the chassis (meters)
    #[serde(default = "default_robot_radius")]
    pub robot_radius: f32,

    /// Encoder ticks per meter of wheel travel
    #[serde(default = "default_ticks_per_meter")]
    pub ticks_per_meter: f32,
}

fn default_wheel_base() -> f32 {
    0.08
}
fn default_wheel_radius() -> f32 {
    0.016
}
fn default_max_rpm() -> f32 {
    150.0
}
fn default_robot_radius() -> f32 {
    0.04
}
fn default_ticks_per_meter() -> f32 {
    1000.0
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            wheel_base: default_wheel_base(),
            wheel_radius: default_wheel_radius(),
            max_rpm: default_max_rpm(),
            robot_radius: default_robot_radius(),
            ticks_per_meter: default_ticks_per_meter(),
        }
    }
}

impl RobotConfig {
    /// Wheel surface speed at full duty (m/s): max RPM × circumference.
    pub fn max_wheel_speed(&self) -> f32 {
        self.max_rpm / 60.0 * 2.0 * PI * self.wheel_radius
    }
}

// ============================================================================
// Sensors
// ============================================================================

/// Distance (time-of-flight) sensor ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceSensorConfig {
    /// Readings are clamped to this range (cm)
    #[serde(default = "default_max_range_cm")]
    pub max_range_cm: f32,

    /// Gaussian noise standard deviation (cm)
    #[serde(default = "default_distance_stddev")]
    pub noise_stddev_cm: f32,

    /// Noise is clamped to ± this many standard deviations
    #[serde(default = "default_noise_clamp_sigma")]
    pub noise_clamp_sigma: f32,
}

fn default_max_range_cm() -> f32 {
    255.0
}
fn default_distance_stddev() -> f32 {
    0.3
}
fn default_noise_clamp_sigma() -> f32 {
    3.0
}

impl Default for DistanceSensorConfig {
    fn default() -> Self {
        Self {
            max_range_cm: default_max_range_cm(),
            noise_stddev_cm: default_distance_stddev(),
            noise_clamp_sigma: default_noise_clamp_sigma(),
        }
    }
}

/// Downward-facing line sensor array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSensorConfig {
    /// Number of sensors, laid out left to right
    #[serde(default = "default_line_count")]
    pub count: usize,

    /// Distance of the array ahead of the robot center (meters)
    #[serde(default = "default_line_forward_offset")]
    pub forward_offset: f32,

    /// Spacing between adjacent sensors (meters)
    #[serde(default = "default_line_spacing")]
    pub spacing: f32,

    /// Width beyond a track edge over which intensity fades to white (meters)
    #[serde(default = "default_line_falloff")]
    pub edge_falloff: f32,
}

fn default_line_count() -> usize {
    5
}
fn default_line_forward_offset() -> f32 {
    0.03
}
fn default_line_spacing() -> f32 {
    0.012
}
fn default_line_falloff() -> f32 {
    0.004
}

impl Default for LineSensorConfig {
    fn default() -> Self {
        Self {
            count: default_line_count(),
            forward_offset: default_line_forward_offset(),
            spacing: default_line_spacing(),
            edge_falloff: default_line_falloff(),
        }
    }
}

/// IMU noise
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImuConfig {
    /// Gyro noise standard deviation (deg/s)
    #[serde(default = "default_gyro_stddev")]
    pub gyro_stddev: f32,

    /// Accelerometer noise standard deviation (m/s²)
    #[serde(default = "default_accel_stddev")]
    pub accel_stddev: f32,
}

fn default_gyro_stddev() -> f32 {
    0.05
}
fn default_accel_stddev() -> f32 {
    0.02
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            gyro_stddev: default_gyro_stddev(),
            accel_stddev: default_accel_stddev(),
        }
    }
}

/// Encoder slip noise
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Multiplicative slip standard deviation (0.01 = 1%)
    #[serde(default = "default_slip_stddev")]
    pub slip_stddev: f32,

    /// Systematic slip bias
    #[serde(default)]
    pub slip_bias: f32,
}

fn default_slip_stddev() -> f32 {
    0.005
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            slip_stddev: default_slip_stddev(),
            slip_bias: 0.0,
        }
    }
}

// ============================================================================
// Battery
// ============================================================================

/// Battery capacity and draw model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryConfig {
    /// Usable capacity (mAh)
    #[serde(default = "default_capacity_mah")]
    pub capacity_mah: f32,

    /// Charge at engine creation and on `reset` (%)
    #[serde(default = "default_initial_percentage")]
    pub initial_percentage: f32,

    /// Electronics draw with motors and LED off (mA)
    #[serde(default = "default_idle_ma")]
    pub idle_ma: f32,

    /// Motor draw per unit of |PWM| summed over both wheels (mA)
    #[serde(default = "default_motor_ma_per_pwm")]
    pub motor_ma_per_pwm: f32,

    /// LED draw at full brightness (mA)
    #[serde(default = "default_led_ma_full")]
    pub led_ma_full: f32,

    /// Percentage below which `LowBattery` fires
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f32,
}

fn default_capacity_mah() -> f32 {
    500.0
}
fn default_initial_percentage() -> f32 {
    100.0
}
fn default_idle_ma() -> f32 {
    60.0
}
fn default_motor_ma_per_pwm() -> f32 {
    1.2
}
fn default_led_ma_full() -> f32 {
    40.0
}
fn default_low_threshold() -> f32 {
    20.0
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_mah: default_capacity_mah(),
            initial_percentage: default_initial_percentage(),
            idle_ma: default_idle_ma(),
            motor_ma_per_pwm: default_motor_ma_per_pwm(),
            led_ma_full: default_led_ma_full(),
            low_threshold: default_low_threshold(),
        }
    }
}

// ============================================================================
// Top level
// ============================================================================

/// Complete simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Fixed tick rate of the simulation thread
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: f32,

    /// Noise seed; 0 uses entropy
    #[serde(default)]
    pub random_seed: u64,

    #[serde(default)]
    pub robot: RobotConfig,

    #[serde(default)]
    pub distance: DistanceSensorConfig,

    #[serde(default)]
    pub line: LineSensorConfig,

    #[serde(default)]
    pub imu: ImuConfig,

    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(default)]
    pub battery: BatteryConfig,
}

fn default_tick_rate_hz() -> f32 {
    100.0
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate_hz(),
            random_seed: 0,
            robot: RobotConfig::default(),
            distance: DistanceSensorConfig::default(),
            line: LineSensorConfig::default(),
            imu: ImuConfig::default(),
            encoder: EncoderConfig::default(),
            battery: BatteryConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Fixed timestep in seconds.
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate_hz.max(1.0)
    }

    /// Noise-free configuration for deterministic tests and replays.
    pub fn noiseless() -> Self {
        let mut config = Self::default();
        config.random_seed = 1;
        config.distance.noise_stddev_cm = 0.0;
        config.imu.gyro_stddev = 0.0;
        config.imu.accel_stddev = 0.0;
        config.encoder.slip_stddev = 0.0;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_empty_table_uses_defaults() {
        let config: SimulationConfig = toml::from_str("").unwrap();
        assert_relative_eq!(config.tick_rate_hz, 100.0);
        assert_eq!(config.line.count, 5);
        assert_relative_eq!(config.distance.max_range_cm, 255.0);
    }

    #[test]
    fn test_partial_override() {
        let config: SimulationConfig = toml::from_str(
            r#"
            random_seed = 42
            [robot]
            max_rpm = 300.0
            "#,
        )
        .unwrap();
        assert_eq!(config.random_seed, 42);
        assert_relative_eq!(config.robot.max_rpm, 300.0);
        assert_relative_eq!(config.robot.wheel_base, 0.08);
    }

    #[test]
    fn test_max_wheel_speed() {
        let robot = RobotConfig::default();
        // 150 rpm × 2π × 0.016 m / 60 s
        assert_relative_eq!(robot.max_wheel_speed(), 0.251327, epsilon = 1e-5);
    }
}
