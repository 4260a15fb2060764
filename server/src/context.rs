//! Per-physical-connection state shared by every logical connection.
//!
//! DESIGN
//! ======
//! One [`ConnectionContext`] exists per accepted websocket. It owns the tag
//! pair, the outbound queue feeding the socket task, the ready state, and the
//! list of logical connections derived from the socket in creation order.
//! Logical connections hold an `Arc` to it; nothing about tags is duplicated
//! per handle.
//!
//! Writers take the tag lock for the whole announce-then-enqueue step, so
//! concurrent senders on one socket can never split a control frame from the
//! data it tags.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ServerError;
use crate::connection::ConnectionEvent;
use crate::ws::Handshake;
use frames::{Frame, TagState};

/// Websocket ready state, as seen through any logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Instruction for the socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outbound {
    Frame(Frame),
    Close,
}

/// A logical connection's event sinks, one per subscriber that accepted it.
struct Derived {
    name: String,
    sinks: Vec<mpsc::UnboundedSender<ConnectionEvent>>,
}

pub(crate) struct ConnectionContext {
    id: Uuid,
    tags: Mutex<TagState>,
    outbound: mpsc::UnboundedSender<Outbound>,
    ready: AtomicU8,
    request: Arc<Handshake>,
    derived: Mutex<Vec<Derived>>,
}

impl ConnectionContext {
    pub(crate) fn new(request: Handshake) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Self {
            id: Uuid::new_v4(),
            tags: Mutex::new(TagState::new()),
            outbound: tx,
            ready: AtomicU8::new(ReadyState::Open as u8),
            request: Arc::new(request),
            derived: Mutex::new(Vec::new()),
        };
        (Arc::new(ctx), rx)
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn request(&self) -> Arc<Handshake> {
        Arc::clone(&self.request)
    }

    pub(crate) fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready.load(Ordering::Acquire))
    }

    fn set_ready_state(&self, state: ReadyState) {
        self.ready.store(state as u8, Ordering::Release);
    }

    pub(crate) fn tags(&self) -> MutexGuard<'_, TagState> {
        self.tags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `frame` under `tag`, switching the shared write tag first if needed.
    pub(crate) fn send_tagged(&self, tag: &str, frame: Frame) -> Result<(), ServerError> {
        if self.ready_state() != ReadyState::Open {
            return Err(ServerError::Closed);
        }
        let mut tags = self.tags();
        if let Some(control) = tags.announce(tag) {
            self.enqueue(Outbound::Frame(control))?;
        }
        self.enqueue(Outbound::Frame(frame))
    }

    fn enqueue(&self, item: Outbound) -> Result<(), ServerError> {
        self.outbound.send(item).map_err(|_| ServerError::Closed)
    }

    /// Ask the socket task to close. Derived connections learn about it
    /// through their close event once the socket is actually gone.
    pub(crate) fn close(&self) {
        if self.ready_state() == ReadyState::Open {
            self.set_ready_state(ReadyState::Closing);
            let _ = self.outbound.send(Outbound::Close);
        }
    }

    /// Record a new logical connection named `name` with its subscriber sinks.
    /// Creation order is preserved for close delivery.
    pub(crate) fn derive(&self, name: &str, sinks: Vec<mpsc::UnboundedSender<ConnectionEvent>>) {
        let mut derived = self.derived.lock().unwrap_or_else(PoisonError::into_inner);
        derived.push(Derived { name: name.to_owned(), sinks });
    }

    /// Deliver a data frame to every logical connection named `tag`.
    pub(crate) fn deliver(&self, tag: &str, frame: &Frame) {
        let derived = self.derived.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in derived.iter().filter(|d| d.name == tag) {
            for sink in &entry.sinks {
                let _ = sink.send(ConnectionEvent::Message(frame.clone()));
            }
        }
    }

    /// Surface a socket error on every logical connection.
    pub(crate) fn broadcast_error(&self, message: &str) {
        let derived = self.derived.lock().unwrap_or_else(PoisonError::into_inner);
        for sink in derived.iter().flat_map(|d| &d.sinks) {
            let _ = sink.send(ConnectionEvent::Error(message.to_owned()));
        }
    }

    /// Mark the socket closed and send exactly one close event per logical
    /// connection, in creation order. Later calls find nothing to notify.
    pub(crate) fn shutdown(&self) -> usize {
        self.set_ready_state(ReadyState::Closed);
        let derived = std::mem::take(&mut *self.derived.lock().unwrap_or_else(PoisonError::into_inner));
        for sink in derived.iter().flat_map(|d| &d.sinks) {
            let _ = sink.send(ConnectionEvent::Close);
        }
        derived.len()
    }
}
