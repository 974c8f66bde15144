//! Device registry
//!
//! Owns the `id → device` map for the whole fleet. Construct one per process
//! and hand clones (cheap, shared) to every consumer.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──▶ Connected ──deploy──▶ Updating
//!       ▲                        │             │   ◀──────────────┘
//!       │                        ▼             ▼ link lost
//!   (removed) ◀──disconnect── Error ◀──────────┘
//! ```
//!
//! Slow work (port open, `get_info`, commands) runs without the map lock;
//! the link is shared as an `Arc` so a disconnect never waits on a command.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::events::FleetEvent;
use super::{Device, DeviceKind, DeviceLink, DeviceStatus, VirtualLink};
use crate::config::TransportConfig;
use crate::core::events::{EventBus, Subscription};
use crate::error::{Error, Result};
use crate::protocol::{Command, Response, actions};
use crate::sim::{EngineHandle, FloorMap, PhysicsEngine, SimulationConfig, SimulationRunner};
use crate::transport::{LinkEvent, PortInfo, PortProvider, TransportConnection};

/// Id of the virtual device every discovery offers
pub const VIRTUAL_DEVICE_ID: &str = "virtual";

pub(super) struct Entry {
    pub(super) device: Device,
    pub(super) link: Option<Arc<DeviceLink>>,
}

pub(super) struct Inner {
    pub(super) provider: Arc<dyn PortProvider>,
    pub(super) transport: TransportConfig,
    simulation: SimulationConfig,
    floor_map: Mutex<FloorMap>,
    pub(super) devices: Mutex<HashMap<String, Entry>>,
    pub(super) events: EventBus<FleetEvent>,
}

impl Inner {
    /// Update a device's status and announce it.
    pub(super) fn set_status(&self, id: &str, status: DeviceStatus) -> Option<Device> {
        let snapshot = {
            let mut devices = self.devices.lock();
            let entry = devices.get_mut(id)?;
            if entry.device.status == status {
                return Some(entry.device.clone());
            }
            entry.device.status = status;
            entry.device.clone()
        };
        log::debug!("Device {} is now {:?}", id, status);
        self.events.emit(FleetEvent::StateChange {
            device: snapshot.clone(),
        });
        Some(snapshot)
    }

    pub(super) fn link(&self, id: &str) -> Result<(Device, Arc<DeviceLink>)> {
        let devices = self.devices.lock();
        let entry = devices
            .get(id)
            .ok_or_else(|| Error::Connection(format!("unknown device '{}'", id)))?;
        match &entry.link {
            Some(link) => Ok((entry.device.clone(), Arc::clone(link))),
            None => Err(Error::Connection(format!(
                "device '{}' is not connected ({:?})",
                id, entry.device.status
            ))),
        }
    }

    /// Check and claim a device for deployment under one lock: only a
    /// `Connected` device with a live link moves to `Updating`.
    pub(super) fn begin_update(&self, id: &str) -> Result<(Device, Arc<DeviceLink>)> {
        let (snapshot, link) = {
            let mut devices = self.devices.lock();
            let entry = devices
                .get_mut(id)
                .ok_or_else(|| Error::Connection(format!("unknown device '{}'", id)))?;
            let Some(link) = entry.link.clone() else {
                return Err(Error::Connection(format!(
                    "device '{}' is not connected ({:?})",
                    id, entry.device.status
                )));
            };
            if entry.device.status != DeviceStatus::Connected {
                return Err(Error::Deployment(format!(
                    "device '{}' is not ready for deployment ({:?})",
                    id, entry.device.status
                )));
            }
            entry.device.status = DeviceStatus::Updating;
            (entry.device.clone(), link)
        };
        log::debug!("Device {} is now {:?}", id, DeviceStatus::Updating);
        self.events.emit(FleetEvent::StateChange {
            device: snapshot.clone(),
        });
        Ok((snapshot, link))
    }

    fn mark_lost(&self, id: &str, reason: &str) {
        log::error!("Device {} lost: {}", id, reason);
        self.set_status(id, DeviceStatus::Error);
        self.events.emit(FleetEvent::DeviceError {
            id: id.to_string(),
            message: reason.to_string(),
        });
    }
}

/// Registry of virtual and physical devices
#[derive(Clone)]
pub struct DeviceRegistry {
    pub(super) inner: Arc<Inner>,
}

impl DeviceRegistry {
    pub fn new(
        provider: Arc<dyn PortProvider>,
        transport: TransportConfig,
        simulation: SimulationConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                transport,
                simulation,
                floor_map: Mutex::new(FloorMap::default()),
                devices: Mutex::new(HashMap::new()),
                events: EventBus::new(),
            }),
        }
    }

    /// Fleet event stream.
    pub fn subscribe(&self) -> Subscription<FleetEvent> {
        self.inner.events.subscribe()
    }

    /// Offer the virtual placeholder plus every port the provider knows.
    ///
    /// Already known ids are left untouched, so repeated discovery only
    /// announces new devices.
    pub fn discover(&self) -> Vec<Device> {
        let mut found = vec![Device::new_virtual(VIRTUAL_DEVICE_ID)];
        match self.inner.provider.enumerate() {
            Ok(ports) => found.extend(ports.iter().map(Device::new_physical)),
            Err(e) => log::warn!("Port enumeration failed: {}", e),
        }

        let mut announced = Vec::new();
        {
            let mut devices = self.inner.devices.lock();
            for device in found {
                if !devices.contains_key(&device.id) {
                    announced.push(device.clone());
                    devices.insert(device.id.clone(), Entry { device, link: None });
                }
            }
        }
        for device in announced {
            log::info!("Discovered {:?} device {} ({})", device.kind, device.id, device.info.name);
            self.inner.events.emit(FleetEvent::DeviceDiscovered { device });
        }
        self.devices()
    }

    /// Register an additional simulated robot under `id`.
    pub fn add_virtual(&self, id: &str) -> Result<Device> {
        let device = Device::new_virtual(id);
        {
            let mut devices = self.inner.devices.lock();
            if devices.contains_key(id) {
                return Err(Error::InvalidParameter(format!("device '{}' already exists", id)));
            }
            devices.insert(
                id.to_string(),
                Entry {
                    device: device.clone(),
                    link: None,
                },
            );
        }
        log::info!("Added virtual device {}", id);
        self.inner.events.emit(FleetEvent::DeviceDiscovered {
            device: device.clone(),
        });
        Ok(device)
    }

    /// All known devices, sorted by id.
    pub fn devices(&self) -> Vec<Device> {
        let mut list: Vec<Device> = self
            .inner
            .devices
            .lock()
            .values()
            .map(|e| e.device.clone())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn device(&self, id: &str) -> Option<Device> {
        self.inner.devices.lock().get(id).map(|e| e.device.clone())
    }

    /// Connect a discovered device.
    ///
    /// Connecting an already connected device is a no-op. A device in
    /// `Error` is reconnected from scratch.
    pub fn connect(&self, id: &str) -> Result<Device> {
        let (kind, port, stale) = {
            let mut devices = self.inner.devices.lock();
            let entry = devices
                .get_mut(id)
                .ok_or_else(|| Error::Connection(format!("unknown device '{}'", id)))?;
            match entry.device.status {
                DeviceStatus::Connected | DeviceStatus::Updating => {
                    return Ok(entry.device.clone());
                }
                DeviceStatus::Connecting => {
                    return Err(Error::Connection(format!("device '{}' is already connecting", id)));
                }
                DeviceStatus::Disconnected | DeviceStatus::Error => {}
            }
            (entry.device.kind, entry.device.info.port.clone(), entry.link.take())
        };
        if let Some(stale) = stale {
            stale.close();
        }
        self.inner.set_status(id, DeviceStatus::Connecting);

        let outcome = match kind {
            DeviceKind::Virtual => self.start_virtual(id).map(|link| (link, None)),
            DeviceKind::Physical => match port {
                Some(port) => self.open_physical(id, &port),
                None => Err(Error::Connection(format!("device '{}' has no port", id))),
            },
        };

        match outcome {
            Ok((link, info)) => {
                let device = {
                    let mut devices = self.inner.devices.lock();
                    match devices.get_mut(id) {
                        Some(entry) => {
                            entry.device.status = DeviceStatus::Connected;
                            if let Some(info) = info {
                                apply_info(&mut entry.device, &info, &self.inner.transport);
                            }
                            entry.link = Some(Arc::new(link));
                            entry.device.clone()
                        }
                        None => {
                            // Disconnected while connecting
                            link.close();
                            return Err(Error::Connection(format!("device '{}' was removed", id)));
                        }
                    }
                };
                log::info!("Connected {:?} device {}", device.kind, id);
                self.inner.events.emit(FleetEvent::StateChange {
                    device: device.clone(),
                });
                self.inner.events.emit(FleetEvent::DeviceConnected {
                    device: device.clone(),
                });
                Ok(device)
            }
            Err(e) => {
                log::error!("Failed to connect {}: {}", id, e);
                self.inner.set_status(id, DeviceStatus::Error);
                self.inner.events.emit(FleetEvent::DeviceError {
                    id: id.to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn start_virtual(&self, id: &str) -> Result<DeviceLink> {
        let map = self.inner.floor_map.lock().clone();
        let engine = PhysicsEngine::new(self.inner.simulation.clone(), map).into_handle();
        let runner =
            SimulationRunner::start(id, Arc::clone(&engine), self.inner.simulation.tick_rate_hz)?;
        Ok(DeviceLink::Virtual(VirtualLink::new(engine, runner)))
    }

    fn open_physical(&self, id: &str, port: &PortInfo) -> Result<(DeviceLink, Option<Response>)> {
        let conn = TransportConnection::connect(self.inner.provider.as_ref(), port)?;

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let lost_id = id.to_string();
        conn.set_on_lost(Box::new(move |reason| {
            if let Some(inner) = weak.upgrade() {
                inner.mark_lost(&lost_id, reason);
            }
        }));

        let info = match conn.send_command(
            &Command::new(actions::GET_INFO),
            self.inner.transport.command_timeout(),
        ) {
            Ok(r) if r.is_ok() => Some(r),
            Ok(r) => {
                log::warn!("{}: get_info refused: {}", id, r.message().unwrap_or("no message"));
                None
            }
            Err(e) => {
                log::warn!("{}: get_info failed: {}", id, e);
                None
            }
        };
        Ok((DeviceLink::Physical(conn), info))
    }

    /// Stop the device, release its link and forget it.
    pub fn disconnect(&self, id: &str) -> Result<()> {
        let entry = self
            .inner
            .devices
            .lock()
            .remove(id)
            .ok_or_else(|| Error::Connection(format!("unknown device '{}'", id)))?;
        if let Some(link) = entry.link {
            link.close();
        }
        log::info!("Disconnected device {}", id);
        self.inner
            .events
            .emit(FleetEvent::DeviceDisconnected { id: id.to_string() });
        Ok(())
    }

    /// Disconnect every device.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.inner.devices.lock().keys().cloned().collect();
        for id in ids {
            let _ = self.disconnect(&id);
        }
    }

    /// Send one command and wait for its response.
    ///
    /// Virtual devices answer synchronously from the engine. Physical devices
    /// use the command timeout, or the install timeout for `install_wasm`.
    pub fn send_command(&self, id: &str, cmd: &Command) -> Result<Response> {
        let (device, link) = self.inner.link(id)?;
        if device.status != DeviceStatus::Connected {
            return Err(Error::Connection(format!(
                "device '{}' is not connected ({:?})",
                id, device.status
            )));
        }
        match link.as_ref() {
            DeviceLink::Virtual(v) => Ok(v.engine.lock().handle_command(cmd)),
            DeviceLink::Physical(conn) => {
                let timeout = if cmd.action == actions::INSTALL_WASM {
                    self.inner.transport.install_timeout()
                } else {
                    self.inner.transport.command_timeout()
                };
                conn.send_command(cmd, timeout)
            }
        }
    }

    /// Engine of a connected virtual device.
    pub fn engine(&self, id: &str) -> Option<EngineHandle> {
        let devices = self.inner.devices.lock();
        match devices.get(id)?.link.as_deref()? {
            DeviceLink::Virtual(v) => Some(Arc::clone(&v.engine)),
            DeviceLink::Physical(_) => None,
        }
    }

    /// Raw message stream of a connected physical device.
    pub fn link_events(&self, id: &str) -> Option<Subscription<LinkEvent>> {
        let devices = self.inner.devices.lock();
        match devices.get(id)?.link.as_deref()? {
            DeviceLink::Physical(conn) => Some(conn.subscribe()),
            DeviceLink::Virtual(_) => None,
        }
    }

    /// Floor map given to virtual devices on their next connect.
    pub fn set_default_floor_map(&self, map: FloorMap) {
        *self.inner.floor_map.lock() = map;
    }

    /// Replace the floor map of a running virtual device.
    pub fn set_floor_map(&self, id: &str, map: FloorMap) -> Result<()> {
        let (_, link) = self.inner.link(id)?;
        match link.as_ref() {
            DeviceLink::Virtual(v) => {
                v.engine.lock().load_floor_map(map);
                Ok(())
            }
            DeviceLink::Physical(_) => Err(Error::NotSupported(format!(
                "device '{}' is physical; floor maps apply to virtual devices",
                id
            ))),
        }
    }
}

/// Copy `get_info` descriptors onto the device.
fn apply_info(device: &mut Device, info: &Response, transport: &TransportConfig) {
    let text = |key: &str| info.field(key).and_then(|v| v.as_str()).map(str::to_string);
    if let Some(firmware) = text("firmware") {
        device.info.firmware = Some(firmware);
    }
    if let Some(hardware) = text("hardware").or_else(|| text("device")) {
        device.info.hardware = Some(hardware);
    }
    device.info.deploy_url = text("deploy_url")
        .or_else(|| text("ip").map(|ip| format!("ws://{}:{}/", ip, transport.deploy_port)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockPortProvider, MockTransport};

    fn registry_with(provider: MockPortProvider) -> DeviceRegistry {
        DeviceRegistry::new(
            Arc::new(provider),
            TransportConfig::default(),
            SimulationConfig::noiseless(),
        )
    }

    #[test]
    fn test_discover_is_idempotent() {
        let provider = MockPortProvider::new();
        provider.add("bench", MockTransport::new());
        let registry = registry_with(provider);
        let events = registry.subscribe();

        assert_eq!(registry.discover().len(), 2);
        assert_eq!(registry.discover().len(), 2);
        let discovered = events
            .drain()
            .into_iter()
            .filter(|e| matches!(e, FleetEvent::DeviceDiscovered { .. }))
            .count();
        assert_eq!(discovered, 2);
    }

    #[test]
    fn test_send_to_unknown_device_fails_fast() {
        let registry = registry_with(MockPortProvider::new());
        let err = registry
            .send_command("nope", &Command::new(actions::GET_STATE))
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[test]
    fn test_virtual_connect_and_command() {
        let registry = registry_with(MockPortProvider::new());
        registry.discover();
        let device = registry.connect(VIRTUAL_DEVICE_ID).unwrap();
        assert_eq!(device.status, DeviceStatus::Connected);
        assert!(registry.engine(VIRTUAL_DEVICE_ID).is_some());

        let r = registry
            .send_command(VIRTUAL_DEVICE_ID, &Command::drive(50, 50))
            .unwrap();
        assert!(r.is_ok());

        registry.disconnect(VIRTUAL_DEVICE_ID).unwrap();
        assert!(registry.device(VIRTUAL_DEVICE_ID).is_none());
    }

    #[test]
    fn test_apply_info_derives_deploy_url() {
        let mut device = Device::new_virtual("x");
        let info = Response::ok().with("firmware", "1.2.0").with("ip", "10.0.0.7");
        apply_info(&mut device, &info, &TransportConfig::default());
        assert_eq!(device.info.firmware.as_deref(), Some("1.2.0"));
        assert_eq!(device.info.deploy_url.as_deref(), Some("ws://10.0.0.7:8081/"));
    }
}
