//! Fleet event stream

use serde::Serialize;

use super::Device;
use super::deploy::DeploymentResult;

/// Everything the registry reports to its subscribers
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    DeviceDiscovered { device: Device },
    DeviceConnected { device: Device },
    DeviceDisconnected { id: String },
    DeviceError { id: String, message: String },
    DeploymentStarted { id: String, name: String, size: usize },
    DeploymentComplete { id: String, result: DeploymentResult },
    /// Any status or descriptor change
    StateChange { device: Device },
}

impl FleetEvent {
    /// Device id the event concerns
    pub fn device_id(&self) -> &str {
        match self {
            FleetEvent::DeviceDiscovered { device }
            | FleetEvent::DeviceConnected { device }
            | FleetEvent::StateChange { device } => &device.id,
            FleetEvent::DeviceDisconnected { id }
            | FleetEvent::DeviceError { id, .. }
            | FleetEvent::DeploymentStarted { id, .. }
            | FleetEvent::DeploymentComplete { id, .. } => id,
        }
    }
}
