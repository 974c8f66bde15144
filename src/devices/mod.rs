//! Device fleet
//!
//! A [`Device`] is the uniform face of either a simulated robot or a physical
//! board. The live half of a device is a [`DeviceLink`], a tagged variant
//! dispatched by pattern matching:
//!
//! | Link | Backing | Commands |
//! |------|---------|----------|
//! | `Virtual` | [`PhysicsEngine`] + [`SimulationRunner`] thread | handled in-process, synchronously |
//! | `Physical` | [`TransportConnection`] | JSON lines with a per-command timeout |
//!
//! The [`DeviceRegistry`] is the only owner of devices and links.
//!
//! [`PhysicsEngine`]: crate::sim::PhysicsEngine

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::sim::{EngineHandle, SimulationRunner};
use crate::transport::{PortInfo, TransportConnection};

pub mod deploy;
pub mod events;
pub mod registry;

pub use deploy::{DeployTarget, DeploymentResult};
pub use events::FleetEvent;
pub use registry::{DeviceRegistry, VIRTUAL_DEVICE_ID};

/// Connection status of a device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connect or link failure; cleared only by a fresh connect
    Error,
    /// A program is being deployed
    Updating,
}

/// What backs a device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Virtual,
    Physical,
}

/// Descriptors filled in by discovery and `get_info`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    /// Port a physical device is reached through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<PortInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware: Option<String>,
    /// WebSocket endpoint for binary deployment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_url: Option<String>,
}

/// Snapshot of one device
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub kind: DeviceKind,
    pub status: DeviceStatus,
    pub info: DeviceInfo,
}

impl Device {
    pub fn new_virtual(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: DeviceKind::Virtual,
            status: DeviceStatus::Disconnected,
            info: DeviceInfo {
                name: "Simulated cube robot".to_string(),
                hardware: Some("virtual-cube".to_string()),
                ..Default::default()
            },
        }
    }

    pub fn new_physical(port: &PortInfo) -> Self {
        Self {
            id: port.id.clone(),
            kind: DeviceKind::Physical,
            status: DeviceStatus::Disconnected,
            info: DeviceInfo {
                name: port.name.clone(),
                port: Some(port.clone()),
                ..Default::default()
            },
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == DeviceStatus::Connected
    }
}

/// Running simulation behind a virtual device
pub struct VirtualLink {
    pub engine: EngineHandle,
    runner: Mutex<SimulationRunner>,
}

impl VirtualLink {
    pub fn new(engine: EngineHandle, runner: SimulationRunner) -> Self {
        Self {
            engine,
            runner: Mutex::new(runner),
        }
    }
}

/// Live side of a connected device
pub enum DeviceLink {
    Virtual(VirtualLink),
    Physical(TransportConnection),
}

impl DeviceLink {
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceLink::Virtual(_) => DeviceKind::Virtual,
            DeviceLink::Physical(_) => DeviceKind::Physical,
        }
    }

    /// Stop the tick thread or release the port. Idempotent.
    pub fn close(&self) {
        match self {
            DeviceLink::Virtual(link) => link.runner.lock().stop(),
            DeviceLink::Physical(conn) => conn.disconnect(),
        }
    }
}
