//! Cube robot simulation
//!
//! A complete simulation of the cube robot's drive train and sensors, so the
//! same command vocabulary can drive a virtual robot or a physical one.
//!
//! | Component | Simulation Method |
//! |-----------|-------------------|
//! | Drive train | Differential drive kinematics from signed PWM |
//! | Collisions | Circle footprint against wall segments and obstacle discs |
//! | Distance sensors (8) | Ray casts against walls and obstacles, bounded noise |
//! | Line sensors (5) | Distance to track centerlines versus painted width |
//! | IMU | Velocity derivative, centripetal term, yaw rate |
//! | Encoders | Wheel travel × ticks per meter with slip noise |
//! | Battery | Idle + motor + LED draw against a LiPo curve |
//!
//! # Thread Model
//!
//! ```text
//! ┌─────────────────┐        ┌──────────────────┐
//! │  DeviceRegistry │ ─────▶ │ SimulationRunner │  sim-<device id>
//! │  send_command   │  lock  │  tick(dt) @100Hz │
//! └─────────────────┘        └────────┬─────────┘
//!                                     │ EventBus<SimEvent>
//!                                     ▼
//!                          ConsoleVM / UI subscribers
//! ```
//!
//! # Module Structure
//!
//! - [`config`]: simulation parameters with defaults
//! - [`floor_map`]: geometry arena (walls, obstacles, lines, checkpoints)
//! - [`physics`]: kinematics, collision and bounds handling
//! - [`engine`]: the per-robot [`PhysicsEngine`] and its command handler
//! - [`runner`]: fixed-rate tick thread

mod battery_sim;
pub mod config;
mod distance_sim;
mod encoder_sim;
pub mod engine;
pub mod events;
pub mod floor_map;
mod imu_sim;
mod noise;
pub mod physics;
pub mod runner;
mod sensor_sim;

pub use config::SimulationConfig;
pub use engine::{EngineHandle, PhysicsEngine};
pub use events::{CollisionEvent, SimEvent};
pub use floor_map::{Checkpoint, FloorMap, GeometryRef, LineId, ObstacleId, RayHit, WallId};
pub use physics::ContactSide;
pub use runner::SimulationRunner;
pub use sensor_sim::ON_LINE_THRESHOLD;
