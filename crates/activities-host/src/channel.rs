//! In-process `MessageChannel`: a pair of entangled ports.
//!
//! Each port is a cheap clonable handle. Messages posted on one end land in
//! the other end's queue in FIFO order. Closing either end disentangles both;
//! later posts are dropped, matching the browser's fire-and-forget semantics.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::sync::lock;

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

/// One message delivered through a port.
#[derive(Debug, Clone)]
pub struct PortMessage {
    pub data: Value,
    /// Ports transferred along with the message.
    pub ports: Vec<MessagePort>,
}

/// Constructor for entangled port pairs.
pub struct MessageChannel;

impl MessageChannel {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (MessagePort, MessagePort) {
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        let entangled = Arc::new(AtomicBool::new(true));
        let port1 = MessagePort::from_parts(tx2, rx1, Arc::clone(&entangled));
        let port2 = MessagePort::from_parts(tx1, rx2, entangled);
        (port1, port2)
    }
}

#[derive(Clone)]
pub struct MessagePort {
    inner: Arc<PortInner>,
}

struct PortInner {
    id: u64,
    peer: mpsc::UnboundedSender<PortMessage>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<PortMessage>>>,
    entangled: Arc<AtomicBool>,
}

impl MessagePort {
    fn from_parts(
        peer: mpsc::UnboundedSender<PortMessage>,
        rx: mpsc::UnboundedReceiver<PortMessage>,
        entangled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Arc::new(PortInner {
                id: NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed),
                peer,
                rx: Mutex::new(Some(rx)),
                entangled,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Identity comparison (clones of one port are the same port).
    pub fn same_port(&self, other: &MessagePort) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_open(&self) -> bool {
        self.inner.entangled.load(Ordering::Acquire)
    }

    /// Post to the entangled peer. Returns whether the message was queued.
    pub fn post_message(&self, data: Value, transfer: Vec<MessagePort>) -> bool {
        if !self.is_open() {
            tracing::debug!(port = self.id(), "post on closed port dropped");
            return false;
        }
        self.inner
            .peer
            .send(PortMessage {
                data,
                ports: transfer,
            })
            .is_ok()
    }

    /// Take this port's inbound queue. Only one consumer may read a port;
    /// later calls return `None`.
    pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<PortMessage>> {
        lock(&self.inner.rx).take()
    }

    /// Disentangle both ends. Safe to call repeatedly.
    pub fn close(&self) {
        self.inner.entangled.store(false, Ordering::Release);
    }
}

impl fmt::Debug for MessagePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePort")
            .field("id", &self.inner.id)
            .field("open", &self.is_open())
            .finish()
    }
}
