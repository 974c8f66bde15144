//! Core types shared by the simulator, transports, fleet and console layers

pub mod events;
pub mod geometry;
pub mod math;
pub mod types;

pub use events::{EventBus, Subscription};
pub use geometry::{Circle, Point2D, Rect};
pub use types::{
    BatteryState, BumperState, DistanceDirection, DistanceReadings, EncoderState, ImuData,
    LedState, MotorState, RobotPose, RobotState, RobotVelocity, SensorData,
};
