//! Mock transport for testing

use super::{PortInfo, PortKind, PortProvider, Transport};
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// How long an empty read waits for injected data
const READ_WAIT: Duration = Duration::from_millis(10);

type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// In-memory transport for unit and integration tests
///
/// Clones share the same buffers, like clones of a real port. A responder
/// can be installed to play the device: it sees each written line and may
/// return a reply line.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<(Mutex<MockTransportInner>, Condvar)>,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    line_buffer: Vec<u8>,
    responder: Option<Responder>,
    closed: bool,
    fail_reads: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new((
                Mutex::new(MockTransportInner {
                    read_buffer: VecDeque::new(),
                    write_buffer: Vec::new(),
                    line_buffer: Vec::new(),
                    responder: None,
                    closed: false,
                    fail_reads: false,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Device that answers every command line with the responder's output.
    pub fn with_responder(responder: impl FnMut(&str) -> Option<String> + Send + 'static) -> Self {
        let mock = Self::new();
        mock.inner.0.lock().responder = Some(Box::new(responder));
        mock
    }

    /// Inject data to be read
    pub fn inject_read(&self, data: &[u8]) {
        let (lock, cvar) = &*self.inner;
        lock.lock().read_buffer.extend(data);
        cvar.notify_all();
    }

    /// Inject one line (newline appended)
    pub fn inject_line(&self, line: &str) {
        let mut data = line.as_bytes().to_vec();
        data.push(b'\n');
        self.inject_read(&data);
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        self.inner.0.lock().write_buffer.clone()
    }

    /// Written data split into lines
    pub fn written_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.get_written())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Make subsequent reads fail as if the cable was pulled
    pub fn fail_reads(&self) {
        let (lock, cvar) = &*self.inner;
        lock.lock().fail_reads = true;
        cvar.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.0.lock().closed
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let (lock, cvar) = &*self.inner;
        let mut inner = lock.lock();
        if inner.read_buffer.is_empty() && !inner.closed && !inner.fail_reads {
            cvar.wait_for(&mut inner, READ_WAIT);
        }
        if inner.closed {
            return Err(Error::Connection("mock transport closed".to_string()));
        }
        if inner.fail_reads {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock device unplugged",
            )));
        }

        let available = inner.read_buffer.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..available)) {
            *slot = byte;
        }
        Ok(available)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let (lock, cvar) = &*self.inner;
        let mut inner = lock.lock();
        if inner.closed {
            return Err(Error::Connection("mock transport closed".to_string()));
        }
        inner.write_buffer.extend_from_slice(data);

        if inner.responder.is_some() {
            inner.line_buffer.extend_from_slice(data);
            while let Some(pos) = inner.line_buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = inner.line_buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line[..pos]).to_string();
                let reply = inner.responder.as_mut().and_then(|r| r(&line));
                if let Some(reply) = reply {
                    inner.read_buffer.extend(reply.as_bytes());
                    inner.read_buffer.push_back(b'\n');
                }
            }
            cvar.notify_all();
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(self.clone()))
    }

    fn close(&mut self) -> Result<()> {
        let (lock, cvar) = &*self.inner;
        lock.lock().closed = true;
        cvar.notify_all();
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Port provider over a fixed set of mock transports
#[derive(Clone, Default)]
pub struct MockPortProvider {
    ports: Arc<Mutex<HashMap<String, (PortInfo, MockTransport)>>>,
}

impl MockPortProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer `transport` under `address`; returns the port descriptor.
    pub fn add(&self, address: &str, transport: MockTransport) -> PortInfo {
        let info = PortInfo::new(PortKind::Mock, address, &format!("Mock device {}", address));
        self.ports
            .lock()
            .insert(info.id.clone(), (info.clone(), transport));
        info
    }

    pub fn remove(&self, id: &str) {
        self.ports.lock().remove(id);
    }
}

impl PortProvider for MockPortProvider {
    fn enumerate(&self) -> Result<Vec<PortInfo>> {
        let mut ports: Vec<PortInfo> = self.ports.lock().values().map(|(p, _)| p.clone()).collect();
        ports.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(ports)
    }

    fn open(&self, port: &PortInfo) -> Result<Box<dyn Transport>> {
        self.ports
            .lock()
            .get(&port.id)
            .map(|(_, t)| Box::new(t.clone()) as Box<dyn Transport>)
            .ok_or_else(|| Error::Connection(format!("no device chosen for port {}", port.id)))
    }
}
