//! JSON-lines connection to one physical device
//!
//! # Threads
//!
//! ```text
//! caller ── send_command ──▶ writer (mutex) ──▶ port
//!    ▲                                           │
//!    │ response slot                             ▼
//!    └──────────────── link-<id> reader thread ◀─┘
//!                         │ LinkEvent fan-out
//!                         ▼
//!                     subscribers
//! ```
//!
//! # Single response slot
//!
//! Responses carry no request id, so a connection holds exactly one pending
//! response slot. The next line carrying a `status` field completes it. If a
//! second `send_command` arms the slot while the first is still waiting, the
//! first waiter fails at once with [`Error::ResponseSlotReplaced`] and the
//! second receives whatever response line arrives next, which may be the
//! reply to the first command. Commands are never queued.
//!
//! # Shutdown order
//!
//! `disconnect` stops and joins the reader thread (dropping its port
//! handle), then takes and drops the writer, and only then closes the port.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use super::framing::LineFramer;
use super::{PortInfo, PortProvider, Transport};
use crate::core::events::{EventBus, Subscription};
use crate::error::{Error, Result};
use crate::protocol::{Command, Response};

/// Read chunk size of the reader thread
const READ_CHUNK: usize = 1024;

/// Events from the reader thread
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkEvent {
    /// Every well-formed inbound JSON value
    Message { value: Value },
    /// The link dropped without a `disconnect` call
    Closed { reason: String },
}

/// Callback invoked once when the read loop fails
pub type LostCallback = Box<dyn Fn(&str) + Send + Sync>;

enum SlotOutcome {
    Response(Response),
    Replaced,
    Lost(String),
}

struct PendingSlot {
    ticket: u64,
    tx: Sender<SlotOutcome>,
}

struct Shared {
    port_id: String,
    connected: AtomicBool,
    stop: AtomicBool,
    pending: Mutex<Option<PendingSlot>>,
    writer: Mutex<Option<Box<dyn Transport>>>,
    events: EventBus<LinkEvent>,
    on_lost: Mutex<Option<LostCallback>>,
}

impl Shared {
    fn fail_pending(&self, reason: &str) {
        if let Some(slot) = self.pending.lock().take() {
            let _ = slot.tx.send(SlotOutcome::Lost(reason.to_string()));
        }
    }

    /// Release the writer and close the port. Idempotent.
    fn release_writer(&self) {
        if let Some(mut writer) = self.writer.lock().take() {
            let _ = writer.flush();
            if let Err(e) = writer.close() {
                log::warn!("Closing {} failed: {}", self.port_id, e);
            }
        }
    }
}

/// Connection to one physical device
pub struct TransportConnection {
    port: PortInfo,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    next_ticket: AtomicU64,
}

impl TransportConnection {
    /// Open `port` through `provider` and start the reader thread.
    pub fn connect(provider: &dyn PortProvider, port: &PortInfo) -> Result<Self> {
        let transport = provider.open(port)?;
        Self::with_transport(port.clone(), transport)
    }

    /// Run the protocol over an already open transport.
    pub fn with_transport(port: PortInfo, transport: Box<dyn Transport>) -> Result<Self> {
        let reader_port = transport.try_clone()?;
        let shared = Arc::new(Shared {
            port_id: port.id.clone(),
            connected: AtomicBool::new(true),
            stop: AtomicBool::new(false),
            pending: Mutex::new(None),
            writer: Mutex::new(Some(transport)),
            events: EventBus::new(),
            on_lost: Mutex::new(None),
        });

        let shared_clone = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("link-{}", port.id))
            .spawn(move || reader_loop(reader_port, shared_clone))
            .map_err(|e| Error::Other(format!("Failed to spawn reader thread: {}", e)))?;

        log::info!("Connected to {} ({})", port.name, port.id);
        Ok(Self {
            port,
            shared,
            reader: Mutex::new(Some(handle)),
            next_ticket: AtomicU64::new(1),
        })
    }

    pub fn port(&self) -> &PortInfo {
        &self.port
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Register the callback fired when the link drops on its own.
    pub fn set_on_lost(&self, callback: LostCallback) {
        *self.shared.on_lost.lock() = Some(callback);
    }

    /// Listen to every inbound message and link loss.
    pub fn subscribe(&self) -> Subscription<LinkEvent> {
        self.shared.events.subscribe()
    }

    /// Write one command and wait for the next response line.
    pub fn send_command(&self, cmd: &Command, timeout: Duration) -> Result<Response> {
        if !self.is_connected() {
            return Err(Error::Connection(format!("{} is not connected", self.port.id)));
        }
        let line = cmd.to_line()?;
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(1);

        // Arm before writing so a fast reply cannot slip past
        if let Some(previous) = self.shared.pending.lock().replace(PendingSlot { ticket, tx }) {
            log::warn!(
                "{}: '{}' sent while another command was pending; previous waiter displaced",
                self.port.id,
                cmd.action
            );
            let _ = previous.tx.send(SlotOutcome::Replaced);
        }

        let written = match self.shared.writer.lock().as_mut() {
            Some(writer) => writer.write_all(line.as_bytes()).and_then(|_| writer.flush()),
            None => Err(Error::Connection(format!("{} is not connected", self.port.id))),
        };
        if let Err(e) = written {
            self.clear_slot(ticket);
            return Err(e);
        }
        log::debug!("{} <- {}", self.port.id, line.trim_end());

        match rx.recv_timeout(timeout) {
            Ok(SlotOutcome::Response(response)) => Ok(response),
            Ok(SlotOutcome::Replaced) => Err(Error::ResponseSlotReplaced),
            Ok(SlotOutcome::Lost(reason)) => Err(Error::Connection(reason)),
            Err(RecvTimeoutError::Timeout) => {
                self.clear_slot(ticket);
                log::warn!(
                    "{}: no response to '{}' within {} ms",
                    self.port.id,
                    cmd.action,
                    timeout.as_millis()
                );
                Err(Error::Timeout {
                    action: cmd.action.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Connection(format!("{} response slot dropped", self.port.id)))
            }
        }
    }

    fn clear_slot(&self, ticket: u64) {
        let mut pending = self.shared.pending.lock();
        if pending.as_ref().is_some_and(|s| s.ticket == ticket) {
            *pending = None;
        }
    }

    /// Stop the reader, release the writer, then close the port. Idempotent.
    pub fn disconnect(&self) {
        let was_connected = self.shared.connected.swap(false, Ordering::AcqRel);
        self.shared.stop.store(true, Ordering::Release);

        if let Some(handle) = self.reader.lock().take() {
            if handle.join().is_err() {
                log::error!("{}: reader thread panicked", self.port.id);
            }
        }
        self.shared.release_writer();
        self.shared.fail_pending("disconnected");

        if was_connected {
            log::info!("Disconnected from {}", self.port.id);
        }
    }
}

impl Drop for TransportConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn reader_loop(mut port: Box<dyn Transport>, shared: Arc<Shared>) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_CHUNK];

    while !shared.stop.load(Ordering::Acquire) {
        let n = match port.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                if shared.stop.load(Ordering::Acquire) {
                    break;
                }
                log::error!("{}: read failed, dropping link: {}", shared.port_id, e);
                let reason = e.to_string();
                shared.connected.store(false, Ordering::Release);
                shared.release_writer();
                shared.fail_pending(&reason);
                if let Some(cb) = shared.on_lost.lock().as_ref() {
                    cb(&reason);
                }
                shared.events.emit(LinkEvent::Closed { reason });
                break;
            }
        };
        if n == 0 {
            continue;
        }

        for line in framer.push(&buf[..n]) {
            let value: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("{}: dropping malformed line ({}): {}", shared.port_id, e, line);
                    continue;
                }
            };
            log::trace!("{} -> {}", shared.port_id, line);

            if let Some(response) = Response::from_value(&value) {
                if let Some(slot) = shared.pending.lock().take() {
                    let _ = slot.tx.send(SlotOutcome::Response(response));
                }
            }
            shared.events.emit(LinkEvent::Message { value });
        }
    }
}
