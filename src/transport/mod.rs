//! Transport layer for device links
//!
//! A [`Transport`] is a raw byte stream to one physical device. Serial and
//! TCP links are provided, plus an in-memory [`MockTransport`] for tests.
//! [`TransportConnection`] runs the newline-delimited JSON protocol on top of
//! a transport, and a [`PortProvider`] decides which links exist.

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod connection;
pub mod framing;
mod mock;
mod provider;
mod serial;
mod tcp;

pub use connection::{LinkEvent, TransportConnection};
pub use framing::LineFramer;
pub use mock::{MockPortProvider, MockTransport};
pub use provider::SystemPortProvider;
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

/// Fixed baud rate of the device firmware
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Transport trait for device communication
pub trait Transport: Send {
    /// Read available bytes into `buffer`.
    ///
    /// Returns `Ok(0)` when nothing arrived within the transport's poll
    /// timeout. A closed link is an error.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write all of `data`.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Independent handle to the same link, used to split reader and writer.
    fn try_clone(&self) -> Result<Box<dyn Transport>>;

    /// Close the underlying link. Further reads on any clone fail.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Kind of link a port offers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    Serial,
    Tcp,
    Mock,
}

/// A port a provider can open
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortInfo {
    /// Stable identifier, used as the device id
    pub id: String,
    /// Human readable name
    pub name: String,
    pub kind: PortKind,
    /// Path or socket address
    pub address: String,
}

impl PortInfo {
    pub fn new(kind: PortKind, address: &str, name: &str) -> Self {
        let prefix = match kind {
            PortKind::Serial => "serial",
            PortKind::Tcp => "tcp",
            PortKind::Mock => "mock",
        };
        Self {
            id: format!("{}:{}", prefix, address),
            name: name.to_string(),
            kind,
            address: address.to_string(),
        }
    }
}

/// Source of physical device ports
///
/// The interactive "choose a port" capability lives behind this trait; a
/// provider with nothing to offer fails `open` with a connection error.
pub trait PortProvider: Send + Sync {
    /// Ports currently available.
    fn enumerate(&self) -> Result<Vec<PortInfo>>;

    /// Open a byte stream to `port`.
    fn open(&self, port: &PortInfo) -> Result<Box<dyn Transport>>;
}
