//! Simulation lifecycle events

use serde::Serialize;

use super::floor_map::GeometryRef;
use super::physics::ContactSide;
use crate::core::types::{RobotPose, RobotState};

/// A blocked move
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CollisionEvent {
    pub side: ContactSide,
    pub target: GeometryRef,
    pub pose: RobotPose,
}

/// Events emitted by a [`super::PhysicsEngine`]
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SimEvent {
    /// Full snapshot, once per tick
    StateUpdate(Box<RobotState>),
    Collision(CollisionEvent),
    /// Index of the checkpoint in the floor map
    CheckpointReached(usize),
    LowBattery { percentage: f32 },
}
