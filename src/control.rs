//! Inward command surface
//!
//! [`ControlHub`] is the composition root: it owns the [`DeviceRegistry`]
//! and one [`ConsoleVm`] per device, and executes [`ControlRequest`]s.
//! Requests are JSON objects tagged by `"tool"`:
//!
//! ```json
//! {"tool": "connect", "device_id": "virtual"}
//! {"tool": "drive", "device_id": "virtual", "left": 120, "right": 120}
//! {"tool": "load_game", "device_id": "virtual", "cartridge": "<base64>", "autostart": true}
//! ```
//!
//! Every request yields one reply object, `{"ok": true, ...}` or
//! `{"ok": false, "error": "..."}`. Nothing here panics on bad input.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::config::{AppConfig, ConsoleConfig};
use crate::console::{Button, ButtonState, ConsoleVm, Palette, SyncMode};
use crate::core::events::Subscription;
use crate::core::types::LedState;
use crate::devices::{DeployTarget, DeviceKind, DeviceRegistry, FleetEvent};
use crate::error::{Error, Result};
use crate::protocol::{Command, Response, actions};
use crate::sim::FloorMap;
use crate::transport::{PortProvider, SystemPortProvider};

/// Console playback controls
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackAction {
    Start,
    Pause,
    Stop,
    Reset,
    Step,
}

/// One inward request
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ControlRequest {
    Discover,
    Connect {
        device_id: String,
    },
    Disconnect {
        device_id: String,
    },
    Drive {
        device_id: String,
        left: i32,
        right: i32,
    },
    Stop {
        device_id: String,
    },
    SetLed {
        device_id: String,
        led: LedState,
    },
    GetState {
        device_id: String,
    },
    SetMode {
        device_id: String,
        mode: SyncMode,
    },
    LoadGame {
        device_id: String,
        /// Base64 cartridge image
        cartridge: String,
        #[serde(default)]
        palette: Option<Palette>,
        #[serde(default)]
        autostart: bool,
    },
    ControlPlayback {
        device_id: String,
        action: PlaybackAction,
    },
    SetButtons {
        device_id: String,
        /// Replace the whole mask
        #[serde(default)]
        mask: Option<u8>,
        #[serde(default)]
        press: Vec<Button>,
        #[serde(default)]
        release: Vec<Button>,
    },
    GetFrameState {
        device_id: String,
        /// Include the palette indices as base64
        #[serde(default)]
        include_pixels: bool,
    },
    SetPalette {
        device_id: String,
        palette: Palette,
    },
    Deploy {
        device_id: String,
        name: String,
        /// Base64 program image
        binary: String,
        #[serde(default)]
        heap_size: Option<u32>,
    },
    SetFloorMap {
        /// Running virtual device; omitted sets the map for future connects
        #[serde(default)]
        device_id: Option<String>,
        map: FloorMap,
    },
    AddObstacle {
        device_id: String,
        x: f32,
        y: f32,
        radius: f32,
    },
    ClearObstacles {
        device_id: String,
    },
}

/// Owner of the fleet and the consoles
pub struct ControlHub {
    registry: DeviceRegistry,
    consoles: Mutex<HashMap<String, Arc<ConsoleVm>>>,
    console_config: ConsoleConfig,
}

impl ControlHub {
    pub fn new(registry: DeviceRegistry, console_config: ConsoleConfig) -> Self {
        Self {
            registry,
            consoles: Mutex::new(HashMap::new()),
            console_config,
        }
    }

    /// Build the hub with system ports and the configured floor map.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let provider: Arc<dyn PortProvider> = Arc::new(SystemPortProvider::new(&config.transport));
        let registry = DeviceRegistry::new(
            provider,
            config.transport.clone(),
            config.simulation.engine.clone(),
        );
        if let Some(path) = &config.simulation.floor_map_file {
            let contents = fs::read_to_string(path)?;
            let map: FloorMap = serde_json::from_str(&contents)
                .map_err(|e| Error::Config(format!("floor map {}: {}", path, e)))?;
            log::info!("Loaded floor map from {}", path);
            registry.set_default_floor_map(map);
        }
        Ok(Self::new(registry, config.console.clone()))
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> Subscription<FleetEvent> {
        self.registry.subscribe()
    }

    /// Console of a device, if one was created.
    pub fn console(&self, device_id: &str) -> Option<Arc<ConsoleVm>> {
        self.consoles.lock().get(device_id).cloned()
    }

    /// Parse and execute one JSON request line.
    pub fn handle_line(&self, line: &str) -> Value {
        match serde_json::from_str::<ControlRequest>(line) {
            Ok(request) => self.execute(request),
            Err(e) => {
                log::warn!("Rejected control request: {}", e);
                json!({"ok": false, "error": format!("invalid request: {}", e)})
            }
        }
    }

    /// Execute a request and wrap the outcome as a reply object.
    pub fn execute(&self, request: ControlRequest) -> Value {
        log::debug!("Control request: {:?}", request);
        match self.dispatch(request) {
            Ok(Value::Object(mut fields)) => {
                fields.insert("ok".to_string(), Value::Bool(true));
                Value::Object(fields)
            }
            Ok(other) => json!({"ok": true, "result": other}),
            Err(e) => json!({"ok": false, "error": e.to_string()}),
        }
    }

    fn dispatch(&self, request: ControlRequest) -> Result<Value> {
        match request {
            ControlRequest::Discover => Ok(json!({"devices": self.registry.discover()})),
            ControlRequest::Connect { device_id } => {
                let device = self.registry.connect(&device_id)?;
                Ok(json!({"device": device}))
            }
            ControlRequest::Disconnect { device_id } => {
                if let Some(console) = self.consoles.lock().remove(&device_id) {
                    console.stop();
                    console.detach();
                }
                self.registry.disconnect(&device_id)?;
                Ok(json!({}))
            }
            ControlRequest::Drive {
                device_id,
                left,
                right,
            } => self.device_reply(&device_id, &Command::drive(left, right)),
            ControlRequest::Stop { device_id } => {
                self.device_reply(&device_id, &Command::new(actions::STOP))
            }
            ControlRequest::SetLed { device_id, led } => {
                let cmd = match led {
                    LedState::Color { r, g, b } => Command::new(actions::SET_LED)
                        .with("r", r)
                        .with("g", g)
                        .with("b", b),
                    LedState::Matrix { matrix } => {
                        Command::new(actions::SET_LED).with("matrix", matrix)
                    }
                };
                self.device_reply(&device_id, &cmd)
            }
            ControlRequest::GetState { device_id } => self.get_state(&device_id),
            ControlRequest::SetMode { device_id, mode } => {
                self.console_for(&device_id)?.set_sync_mode(mode);
                Ok(json!({"mode": mode}))
            }
            ControlRequest::LoadGame {
                device_id,
                cartridge,
                palette,
                autostart,
            } => {
                let bytes = decode_base64("cartridge", &cartridge)?;
                let console = self.console_for(&device_id)?;
                console.load_cartridge(&bytes, palette)?;
                if autostart {
                    console.start()?;
                }
                Ok(frame_state(&console, false))
            }
            ControlRequest::ControlPlayback { device_id, action } => {
                let console = self
                    .console(&device_id)
                    .ok_or_else(|| Error::Console(format!("no game loaded on '{}'", device_id)))?;
                match action {
                    PlaybackAction::Start => console.start()?,
                    PlaybackAction::Pause => console.pause()?,
                    PlaybackAction::Stop => console.stop(),
                    PlaybackAction::Reset => console.reset()?,
                    PlaybackAction::Step => {
                        console.step_frame()?;
                    }
                }
                Ok(frame_state(&console, false))
            }
            ControlRequest::SetButtons {
                device_id,
                mask,
                press,
                release,
            } => {
                let console = self.console_for(&device_id)?;
                if let Some(mask) = mask {
                    console.set_buttons(ButtonState::from_mask(mask));
                }
                for button in press {
                    console.press(button);
                }
                for button in release {
                    console.release(button);
                }
                let buttons = console.buttons();
                Ok(json!({"buttons": buttons.mask(), "pressed": buttons.pressed()}))
            }
            ControlRequest::GetFrameState {
                device_id,
                include_pixels,
            } => {
                let console = self
                    .console(&device_id)
                    .ok_or_else(|| Error::Console(format!("no game loaded on '{}'", device_id)))?;
                Ok(frame_state(&console, include_pixels))
            }
            ControlRequest::SetPalette { device_id, palette } => {
                self.console_for(&device_id)?.set_palette(palette);
                Ok(json!({"palette": palette}))
            }
            ControlRequest::Deploy {
                device_id,
                name,
                binary,
                heap_size,
            } => {
                let binary = decode_base64("binary", &binary)?;
                let mut target = DeployTarget::new(&device_id, &name, binary);
                if let Some(heap_size) = heap_size {
                    target.heap_size = heap_size;
                }
                let result = self.registry.deploy(&target);
                if result.success {
                    Ok(json!({"result": result}))
                } else {
                    Err(Error::Deployment(result.message))
                }
            }
            ControlRequest::SetFloorMap { device_id, map } => match device_id {
                Some(id) => {
                    self.registry.set_floor_map(&id, map)?;
                    Ok(json!({"device_id": id}))
                }
                None => {
                    self.registry.set_default_floor_map(map);
                    Ok(json!({}))
                }
            },
            ControlRequest::AddObstacle {
                device_id,
                x,
                y,
                radius,
            } => self.device_reply(
                &device_id,
                &Command::new(actions::ADD_OBSTACLE)
                    .with("x", x)
                    .with("y", y)
                    .with("radius", radius),
            ),
            ControlRequest::ClearObstacles { device_id } => {
                self.device_reply(&device_id, &Command::new(actions::CLEAR_OBSTACLES))
            }
        }
    }

    /// Send a wire command; a device-side error becomes a failed reply.
    fn device_reply(&self, device_id: &str, cmd: &Command) -> Result<Value> {
        let response = self.registry.send_command(device_id, cmd)?;
        response_fields(response)
    }

    fn get_state(&self, device_id: &str) -> Result<Value> {
        let device = self
            .registry
            .device(device_id)
            .ok_or_else(|| Error::Connection(format!("unknown device '{}'", device_id)))?;
        let action = match device.kind {
            DeviceKind::Virtual => actions::GET_STATE,
            DeviceKind::Physical => actions::READ_SENSORS,
        };
        let mut fields = match self.device_reply(device_id, &Command::new(action))? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        fields.insert("device".to_string(), serde_json::to_value(&device)?);
        Ok(Value::Object(fields))
    }

    /// Console for a device, created and attached on first use.
    fn console_for(&self, device_id: &str) -> Result<Arc<ConsoleVm>> {
        let mut consoles = self.consoles.lock();
        if let Some(console) = consoles.get(device_id) {
            return Ok(Arc::clone(console));
        }
        let console = Arc::new(ConsoleVm::new(device_id, &self.console_config));
        console.attach(&self.registry, device_id)?;
        consoles.insert(device_id.to_string(), Arc::clone(&console));
        Ok(console)
    }

    /// Stop consoles and release every device.
    pub fn shutdown(&self) {
        let consoles: Vec<Arc<ConsoleVm>> = self.consoles.lock().drain().map(|(_, c)| c).collect();
        for console in consoles {
            console.stop();
            console.detach();
        }
        self.registry.shutdown();
    }
}

fn response_fields(response: Response) -> Result<Value> {
    if response.is_ok() {
        Ok(Value::Object(response.fields))
    } else {
        Err(Error::Other(format!(
            "device error: {}",
            response.message().unwrap_or("unspecified")
        )))
    }
}

fn decode_base64(field: &str, data: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(data.trim())
        .map_err(|e| Error::InvalidParameter(format!("{} is not valid base64: {}", field, e)))
}

fn frame_state(console: &ConsoleVm, include_pixels: bool) -> Value {
    let buttons = console.buttons();
    let mut state = json!({
        "state": console.state(),
        "frame_index": console.frame_index(),
        "sync_mode": console.sync_mode(),
        "mapping": console.mapping_name(),
        "title": console.cartridge_title(),
        "buttons": buttons.mask(),
        "palette": console.palette(),
    });
    if include_pixels && let Value::Object(map) = &mut state {
        map.insert(
            "pixels".to_string(),
            Value::String(BASE64.encode(console.framebuffer().pixels())),
        );
    }
    state
}
