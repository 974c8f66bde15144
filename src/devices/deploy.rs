//! Program deployment
//!
//! | Device | Path |
//! |--------|------|
//! | Virtual | no transfer, always succeeds with "simulated" |
//! | Physical with `deploy_url` | WebSocket: metadata text frame, binary frame, one status frame |
//! | Physical, serial only | one `install_wasm` command with a base64 payload |
//!
//! Failures come back as `DeploymentResult { success: false, .. }`; nothing
//! is retried.

use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use tungstenite::handshake::HandshakeError;
use tungstenite::http::Uri;
use tungstenite::{Message, WebSocket};

use super::events::FleetEvent;
use super::registry::DeviceRegistry;
use super::{DeviceLink, DeviceStatus};
use crate::error::{Error, Result};
use crate::protocol::{Command, InstallMetadata, InstallStatus, ResponseStatus, actions};
use crate::transport::TransportConnection;

/// Default heap reserved for an installed program
pub const DEFAULT_HEAP_SIZE: u32 = 64 * 1024;

/// TCP connect timeout of the deployment socket
const SOCKET_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A compiled program and where it goes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeployTarget {
    pub device_id: String,
    pub name: String,
    pub binary: Vec<u8>,
    #[serde(default = "default_heap_size")]
    pub heap_size: u32,
}

fn default_heap_size() -> u32 {
    DEFAULT_HEAP_SIZE
}

impl DeployTarget {
    pub fn new(device_id: &str, name: &str, binary: Vec<u8>) -> Self {
        Self {
            device_id: device_id.to_string(),
            name: name.to_string(),
            binary,
            heap_size: DEFAULT_HEAP_SIZE,
        }
    }
}

/// Outcome of one deployment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub success: bool,
    pub message: String,
}

impl DeploymentResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl DeviceRegistry {
    /// Transfer a program to a connected device.
    ///
    /// Blocks until the device reports a status or the deadline passes.
    pub fn deploy(&self, target: &DeployTarget) -> DeploymentResult {
        let id = target.device_id.as_str();
        let (device, link) = match self.inner.begin_update(id) {
            Ok(claimed) => claimed,
            Err(e) => return DeploymentResult::failure(e.to_string()),
        };

        log::info!(
            "Deploying '{}' ({} bytes) to {}",
            target.name,
            target.binary.len(),
            id
        );
        self.inner.events.emit(FleetEvent::DeploymentStarted {
            id: id.to_string(),
            name: target.name.clone(),
            size: target.binary.len(),
        });

        let outcome = match link.as_ref() {
            DeviceLink::Virtual(_) => Ok(DeploymentResult::success("simulated")),
            DeviceLink::Physical(conn) => match device.info.deploy_url.as_deref() {
                Some(url) => {
                    deploy_over_socket(url, target, self.inner.transport.socket_deploy_timeout())
                }
                None => deploy_over_commands(conn, target, self.inner.transport.install_timeout()),
            },
        };
        let result = outcome.unwrap_or_else(|e| DeploymentResult::failure(e.to_string()));

        // A link lost mid-transfer has already moved the device to Error
        if self.device(id).is_some_and(|d| d.status == DeviceStatus::Updating) {
            self.inner.set_status(id, DeviceStatus::Connected);
        }
        if result.success {
            log::info!("Deployment of '{}' to {} finished: {}", target.name, id, result.message);
        } else {
            log::warn!("Deployment of '{}' to {} failed: {}", target.name, id, result.message);
        }
        self.inner.events.emit(FleetEvent::DeploymentComplete {
            id: id.to_string(),
            result: result.clone(),
        });
        result
    }
}

/// Serial path: the whole program in one `install_wasm` command.
fn deploy_over_commands(
    conn: &TransportConnection,
    target: &DeployTarget,
    timeout: Duration,
) -> Result<DeploymentResult> {
    let cmd = Command::new(actions::INSTALL_WASM)
        .with("name", &target.name)
        .with("size", target.binary.len())
        .with("heap_size", target.heap_size)
        .with("data", BASE64.encode(&target.binary));
    let response = conn.send_command(&cmd, timeout)?;
    Ok(if response.is_ok() {
        DeploymentResult::success(response.message().unwrap_or("installed"))
    } else {
        DeploymentResult::failure(response.message().unwrap_or("device rejected the program"))
    })
}

/// Socket path: metadata, payload, then wait for one status frame.
fn deploy_over_socket(url: &str, target: &DeployTarget, timeout: Duration) -> Result<DeploymentResult> {
    let mut socket = open_socket(url, timeout)?;

    let metadata = InstallMetadata::new(&target.name, target.binary.len(), target.heap_size);
    socket.send(Message::Text(serde_json::to_string(&metadata)?))?;
    socket.send(Message::Binary(target.binary.clone()))?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        if Instant::now() >= deadline {
            return Err(install_timeout(timeout));
        }
        match socket.read() {
            Ok(Message::Text(text)) => match serde_json::from_str::<InstallStatus>(&text) {
                Ok(status) => break status,
                Err(e) => log::warn!("Ignoring unexpected deploy frame ({}): {}", e, text),
            },
            Ok(Message::Close(_)) => {
                return Err(Error::Deployment(
                    "device closed the socket before reporting a status".to_string(),
                ));
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                return Err(install_timeout(timeout));
            }
            Err(e) => return Err(e.into()),
        }
    };
    let _ = socket.close(None);

    let message = status.message.unwrap_or_default();
    Ok(match status.status {
        ResponseStatus::Ok => DeploymentResult::success(if message.is_empty() {
            "installed".to_string()
        } else {
            message
        }),
        ResponseStatus::Error => DeploymentResult::failure(if message.is_empty() {
            "device rejected the program".to_string()
        } else {
            message
        }),
    })
}

fn install_timeout(timeout: Duration) -> Error {
    Error::Timeout {
        action: "install".to_string(),
        timeout_ms: timeout.as_millis() as u64,
    }
}

/// Connect the TCP stream ourselves so the read deadline applies to the
/// handshake and status wait alike.
fn open_socket(url: &str, timeout: Duration) -> Result<WebSocket<TcpStream>> {
    let uri: Uri = url
        .parse()
        .map_err(|e| Error::InvalidParameter(format!("deploy url '{}': {}", url, e)))?;
    let host = uri
        .host()
        .ok_or_else(|| Error::InvalidParameter(format!("deploy url '{}' has no host", url)))?;
    let port = uri.port_u16().unwrap_or(80);

    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::Connection(format!("cannot resolve {}", host)))?;
    let stream = TcpStream::connect_timeout(&addr, SOCKET_CONNECT_TIMEOUT)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_nodelay(true)?;

    let (socket, _) = tungstenite::client(url, stream).map_err(|e| match e {
        HandshakeError::Failure(e) => Error::from(e),
        HandshakeError::Interrupted(_) => {
            Error::Deployment("deployment socket handshake interrupted".to_string())
        }
    })?;
    Ok(socket)
}
