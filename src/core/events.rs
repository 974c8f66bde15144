//! Typed event fan-out with drop-to-unsubscribe handles
//!
//! Each subscriber owns a crossbeam receiver, unbounded by default. Emitting
//! clones the event into every live subscriber; dropping a [`Subscription`]
//! removes it. A bounded subscriber that falls behind loses the newest events
//! instead of growing its queue.

use crossbeam_channel::{
    Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded, unbounded,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;

struct Subscriber<E> {
    id: u64,
    tx: Sender<E>,
    accepts: fn(&E) -> bool,
}

struct BusInner<E> {
    next_id: u64,
    subscribers: Vec<Subscriber<E>>,
}

/// Multi-subscriber event bus
pub struct EventBus<E> {
    inner: Arc<Mutex<BusInner<E>>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 1,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = unbounded();
        self.register(tx, rx, |_| true)
    }

    /// Subscriber that only queues events `accepts` lets through and holds at
    /// most `capacity` of them.
    pub fn subscribe_bounded(&self, capacity: usize, accepts: fn(&E) -> bool) -> Subscription<E> {
        let (tx, rx) = bounded(capacity.max(1));
        self.register(tx, rx, accepts)
    }

    fn register(&self, tx: Sender<E>, rx: Receiver<E>, accepts: fn(&E) -> bool) -> Subscription<E> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(Subscriber { id, tx, accepts });
        Subscription {
            id,
            receiver: rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&self, event: E) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|sub| {
            if !(sub.accepts)(&event) {
                return true;
            }
            !matches!(sub.tx.try_send(event.clone()), Err(TrySendError::Disconnected(_)))
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

/// Subscription handle; dropping it unsubscribes
pub struct Subscription<E> {
    id: u64,
    receiver: Receiver<E>,
    bus: Weak<Mutex<BusInner<E>>>,
}

impl<E> Subscription<E> {
    pub fn try_recv(&self) -> Option<E> {
        match self.receiver.try_recv() {
            Ok(e) => Some(e),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<E> {
        match self.receiver.recv_timeout(timeout) {
            Ok(e) => Some(e),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drain everything queued so far.
    pub fn drain(&self) -> Vec<E> {
        self.receiver.try_iter().collect()
    }

    /// Underlying receiver, for use with `crossbeam_channel::select!`.
    pub fn receiver(&self) -> &Receiver<E> {
        &self.receiver
    }

    /// Events queued and not yet received
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock().subscribers.retain(|sub| sub.id != self.id);
        }
    }
}
