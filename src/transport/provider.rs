//! Port discovery for serial and network devices

use std::time::Duration;

use super::serial::SerialTransport;
use super::tcp::TcpTransport;
use super::{PortInfo, PortKind, PortProvider, Transport};
use crate::config::TransportConfig;
use crate::error::{Error, Result};

/// TCP connect timeout for network devices
const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Offers configured serial ports, detected USB serial ports and configured
/// TCP endpoints
pub struct SystemPortProvider {
    config: TransportConfig,
}

impl SystemPortProvider {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl PortProvider for SystemPortProvider {
    fn enumerate(&self) -> Result<Vec<PortInfo>> {
        let mut ports: Vec<PortInfo> = self
            .config
            .serial_ports
            .iter()
            .map(|path| PortInfo::new(PortKind::Serial, path, path))
            .collect();

        if self.config.scan_serial {
            match serialport::available_ports() {
                Ok(found) => {
                    for p in found {
                        if let serialport::SerialPortType::UsbPort(usb) = &p.port_type {
                            let name = usb.product.clone().unwrap_or_else(|| p.port_name.clone());
                            let info = PortInfo::new(PortKind::Serial, &p.port_name, &name);
                            if !ports.iter().any(|q| q.id == info.id) {
                                ports.push(info);
                            }
                        }
                    }
                }
                Err(e) => log::warn!("Serial port scan failed: {}", e),
            }
        }

        ports.extend(
            self.config
                .tcp_devices
                .iter()
                .map(|addr| PortInfo::new(PortKind::Tcp, addr, addr)),
        );
        Ok(ports)
    }

    fn open(&self, port: &PortInfo) -> Result<Box<dyn Transport>> {
        match port.kind {
            PortKind::Serial => Ok(Box::new(SerialTransport::open(
                &port.address,
                self.config.baud_rate,
            )?)),
            PortKind::Tcp => Ok(Box::new(TcpTransport::connect(
                &port.address,
                TCP_CONNECT_TIMEOUT,
            )?)),
            PortKind::Mock => Err(Error::Connection(format!(
                "port {} needs a mock provider",
                port.id
            ))),
        }
    }
}
