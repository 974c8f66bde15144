//! Configuration for YantraIO
//!
//! Loaded from a TOML file. Every section and field has a default, so an
//! empty file (or no file) yields the built-in cube robot profile.
//!
//! ```toml
//! [simulation]
//! tick_rate_hz = 100.0
//! random_seed = 42
//! floor_map_file = "maps/arena.json"
//!
//! [transport]
//! serial_ports = ["/dev/ttyACM0"]
//! tcp_devices = ["192.168.4.1:8080"]
//! command_timeout_ms = 5000
//!
//! [console]
//! fps = 60.0
//!
//! [control]
//! tcp_bind_address = "127.0.0.1:5560"
//!
//! [logging]
//! level = "info"
//! ```

use crate::console::SyncMode;
use crate::error::Result;
use crate::sim::SimulationConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Simulation parameters plus the floor map to load for virtual devices
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimulationSection {
    /// Optional JSON floor map; the default walled arena is used otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor_map_file: Option<String>,

    #[serde(flatten)]
    pub engine: SimulationConfig,
}

/// Physical device links
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Serial baud rate (device firmware is fixed at 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Serial ports always offered by discovery
    #[serde(default)]
    pub serial_ports: Vec<String>,

    /// Also offer detected USB serial ports
    #[serde(default = "default_true")]
    pub scan_serial: bool,

    /// Network devices ("host:port") speaking JSON lines over TCP
    #[serde(default)]
    pub tcp_devices: Vec<String>,

    /// Deadline for ordinary commands
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Deadline for `install_wasm` over the command channel
    #[serde(default = "default_install_timeout_ms")]
    pub install_timeout_ms: u64,

    /// Deadline for the status frame of a socket deployment
    #[serde(default = "default_socket_deploy_timeout_ms")]
    pub socket_deploy_timeout_ms: u64,

    /// Deployment socket port when a device reports only its IP
    #[serde(default = "default_deploy_port")]
    pub deploy_port: u16,
}

fn default_baud_rate() -> u32 {
    crate::transport::DEFAULT_BAUD_RATE
}
fn default_true() -> bool {
    true
}
fn default_command_timeout_ms() -> u64 {
    5_000
}
fn default_install_timeout_ms() -> u64 {
    60_000
}
fn default_socket_deploy_timeout_ms() -> u64 {
    30_000
}
fn default_deploy_port() -> u16 {
    8081
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            serial_ports: Vec::new(),
            scan_serial: true,
            tcp_devices: Vec::new(),
            command_timeout_ms: default_command_timeout_ms(),
            install_timeout_ms: default_install_timeout_ms(),
            socket_deploy_timeout_ms: default_socket_deploy_timeout_ms(),
            deploy_port: default_deploy_port(),
        }
    }
}

impl TransportConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_millis(self.install_timeout_ms)
    }

    pub fn socket_deploy_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_deploy_timeout_ms)
    }
}

/// Console VM defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsoleConfig {
    /// Frame rate of the console loop
    #[serde(default = "default_fps")]
    pub fps: f32,

    /// Sync mode applied when a game is loaded
    #[serde(default)]
    pub sync_mode: SyncMode,
}

fn default_fps() -> f32 {
    60.0
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            sync_mode: SyncMode::default(),
        }
    }
}

/// Inward command surface of the daemon
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// TCP bind address for JSON-lines control clients; empty disables it
    ///
    /// Examples:
    /// - `127.0.0.1:5560` - Localhost only
    /// - `0.0.0.0:5560` - All interfaces
    #[serde(default)]
    pub tcp_bind_address: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tcp_bind_address: String::new(),
        }
    }
}

impl ControlConfig {
    pub fn tcp_enabled(&self) -> bool {
        !self.tcp_bind_address.trim().is_empty()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `path`, or use defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}
