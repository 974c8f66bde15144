//! Robot state data model
//!
//! These are the snapshot types published by the simulator in `StateUpdate`
//! events and returned by `get_state` / `read_sensors`. All of them serialize
//! to the JSON shapes used on the device wire protocol.

use serde::{Deserialize, Serialize};

use super::geometry::Point2D;

/// Signed motor duty limit
pub const MAX_PWM: i16 = 255;

/// Robot pose in floor meters, rotation normalized to (-π, π]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotPose {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
}

impl RobotPose {
    pub const fn new(x: f32, y: f32, rotation: f32) -> Self {
        Self { x, y, rotation }
    }

    #[inline]
    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }
}

/// Body velocity derived from motor state each tick
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotVelocity {
    /// m/s, positive forward
    pub linear: f32,
    /// rad/s, positive counter-clockwise
    pub angular: f32,
}

/// Motor duty and derived wheel speed
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorState {
    pub left_pwm: i16,
    pub right_pwm: i16,
    pub left_rpm: f32,
    pub right_rpm: f32,
}

impl MotorState {
    /// Store both duties, clamped to ±[`MAX_PWM`].
    pub fn set_pwm(&mut self, left: i32, right: i32) {
        self.left_pwm = clamp_pwm(left);
        self.right_pwm = clamp_pwm(right);
    }

    pub fn stop(&mut self) {
        self.set_pwm(0, 0);
        self.left_rpm = 0.0;
        self.right_rpm = 0.0;
    }

    pub fn is_stopped(&self) -> bool {
        self.left_pwm == 0 && self.right_pwm == 0
    }
}

/// Clamp any integer duty into the signed PWM range.
#[inline]
pub fn clamp_pwm(value: i32) -> i16 {
    value.clamp(-(MAX_PWM as i32), MAX_PWM as i32) as i16
}

/// The eight distance sensor directions, in wire order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceDirection {
    Front,
    FrontLeft,
    FrontRight,
    Left,
    Right,
    Back,
    BackLeft,
    BackRight,
}

impl DistanceDirection {
    pub const ALL: [DistanceDirection; 8] = [
        DistanceDirection::Front,
        DistanceDirection::FrontLeft,
        DistanceDirection::FrontRight,
        DistanceDirection::Left,
        DistanceDirection::Right,
        DistanceDirection::Back,
        DistanceDirection::BackLeft,
        DistanceDirection::BackRight,
    ];

    /// Mounting angle relative to the heading (counter-clockwise positive).
    pub fn offset(self) -> f32 {
        use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};
        match self {
            DistanceDirection::Front => 0.0,
            DistanceDirection::FrontLeft => FRAC_PI_4,
            DistanceDirection::FrontRight => -FRAC_PI_4,
            DistanceDirection::Left => FRAC_PI_2,
            DistanceDirection::Right => -FRAC_PI_2,
            DistanceDirection::Back => PI,
            DistanceDirection::BackLeft => 3.0 * FRAC_PI_4,
            DistanceDirection::BackRight => -3.0 * FRAC_PI_4,
        }
    }
}

/// Distance readings in centimeters, clamped to [0, max_range]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DistanceReadings {
    pub front: f32,
    pub front_left: f32,
    pub front_right: f32,
    pub left: f32,
    pub right: f32,
    pub back: f32,
    pub back_left: f32,
    pub back_right: f32,
}

impl DistanceReadings {
    /// All sensors reading the same value.
    pub fn uniform(value: f32) -> Self {
        Self {
            front: value,
            front_left: value,
            front_right: value,
            left: value,
            right: value,
            back: value,
            back_left: value,
            back_right: value,
        }
    }

    pub fn get(&self, dir: DistanceDirection) -> f32 {
        match dir {
            DistanceDirection::Front => self.front,
            DistanceDirection::FrontLeft => self.front_left,
            DistanceDirection::FrontRight => self.front_right,
            DistanceDirection::Left => self.left,
            DistanceDirection::Right => self.right,
            DistanceDirection::Back => self.back,
            DistanceDirection::BackLeft => self.back_left,
            DistanceDirection::BackRight => self.back_right,
        }
    }

    pub fn set(&mut self, dir: DistanceDirection, value: f32) {
        let slot = match dir {
            DistanceDirection::Front => &mut self.front,
            DistanceDirection::FrontLeft => &mut self.front_left,
            DistanceDirection::FrontRight => &mut self.front_right,
            DistanceDirection::Left => &mut self.left,
            DistanceDirection::Right => &mut self.right,
            DistanceDirection::Back => &mut self.back,
            DistanceDirection::BackLeft => &mut self.back_left,
            DistanceDirection::BackRight => &mut self.back_right,
        };
        *slot = value;
    }
}

/// IMU reading in the robot body frame (X forward, Y left, Z up)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuData {
    /// m/s², Z includes gravity
    pub accel: [f32; 3],
    /// deg/s, Z is yaw rate (counter-clockwise positive)
    pub gyro: [f32; 3],
    /// Compass heading in [0, 360)
    pub heading_deg: f32,
}

/// Bumper contact flags, latched for the tick of contact
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BumperState {
    pub front: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
}

impl BumperState {
    pub const FRONT: u8 = 0x01;
    pub const LEFT: u8 = 0x02;
    pub const RIGHT: u8 = 0x04;
    pub const BACK: u8 = 0x08;

    /// Hardware bit-field representation.
    pub fn bits(&self) -> u8 {
        let mut bits = 0;
        if self.front {
            bits |= Self::FRONT;
        }
        if self.left {
            bits |= Self::LEFT;
        }
        if self.right {
            bits |= Self::RIGHT;
        }
        if self.back {
            bits |= Self::BACK;
        }
        bits
    }

    pub fn any(&self) -> bool {
        self.bits() != 0
    }
}

/// Wheel encoder tick counters
///
/// Counters accumulate for the lifetime of the engine (`reset` clears them).
/// Reverse motion counts down, matching the signed hardware counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderState {
    pub left: i64,
    pub right: i64,
}

/// All sensor readings of one tick
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    pub distance: DistanceReadings,
    /// Line intensities 0 (white) .. 255 (black), left to right
    pub line: Vec<u8>,
    pub imu: ImuData,
    pub bumper: BumperState,
    pub encoders: EncoderState,
}

/// Battery status
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    pub voltage: f32,
    /// 0..=100, non-increasing while not charging
    pub percentage: f32,
    pub charging: bool,
    /// Present draw in mA
    pub current: f32,
}

impl Default for BatteryState {
    fn default() -> Self {
        Self {
            voltage: 4.2,
            percentage: 100.0,
            charging: false,
            current: 0.0,
        }
    }
}

/// Status LED: a single RGB color or an 8x8 matrix of RGB cells
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LedState {
    Color { r: u8, g: u8, b: u8 },
    Matrix { matrix: Vec<[u8; 3]> },
}

impl Default for LedState {
    fn default() -> Self {
        LedState::Color { r: 0, g: 0, b: 0 }
    }
}

impl LedState {
    /// Number of cells in an LED matrix
    pub const MATRIX_CELLS: usize = 64;

    /// Build a matrix state, padding or truncating to 64 cells.
    pub fn matrix(mut cells: Vec<[u8; 3]>) -> Self {
        cells.resize(Self::MATRIX_CELLS, [0, 0, 0]);
        LedState::Matrix { matrix: cells }
    }

    /// Mean channel intensity in [0, 1].
    pub fn brightness(&self) -> f32 {
        match self {
            LedState::Color { r, g, b } => (*r as f32 + *g as f32 + *b as f32) / (3.0 * 255.0),
            LedState::Matrix { matrix } => {
                if matrix.is_empty() {
                    return 0.0;
                }
                let sum: f32 = matrix
                    .iter()
                    .map(|c| c[0] as f32 + c[1] as f32 + c[2] as f32)
                    .sum();
                sum / (matrix.len() as f32 * 3.0 * 255.0)
            }
        }
    }
}

/// Full robot state snapshot
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub pose: RobotPose,
    pub velocity: RobotVelocity,
    pub motors: MotorState,
    pub sensors: SensorData,
    pub battery: BatteryState,
    pub led: LedState,
    pub uptime_ms: u64,
}
