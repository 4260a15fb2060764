//! Logical connection: a named view over one physical server connection.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ServerError;
use crate::context::{ConnectionContext, ReadyState};
use crate::ws::Handshake;
use frames::Frame;

/// Event observed on a logical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Data frame sent by the client under this connection's tag.
    Message(Frame),
    /// Socket error. The close event follows.
    Error(String),
    /// The physical connection is gone. Always the last event.
    Close,
}

/// Handed to a subscriber when a logical connection is bound.
#[derive(Debug)]
pub struct Accepted {
    pub connection: LogicalConnection,
    /// This subscriber's own view of the connection's events. Created when the
    /// binding happens, so nothing sent after the binding frame is lost.
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
    /// The HTTP request that opened the physical connection.
    pub request: Arc<Handshake>,
}

#[derive(Clone)]
pub struct LogicalConnection {
    name: String,
    ctx: Arc<ConnectionContext>,
}

impl LogicalConnection {
    pub(crate) fn new(name: &str, ctx: Arc<ConnectionContext>) -> Self {
        Self { name: name.to_owned(), ctx }
    }

    /// Channel name; empty for the root connection.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the underlying physical connection, shared by every logical
    /// connection derived from it.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.ctx.id()
    }

    /// Send a frame tagged with this connection's name.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Closed`] once the physical connection is closing.
    pub fn send(&self, frame: impl Into<Frame>) -> Result<(), ServerError> {
        self.ctx.send_tagged(&self.name, frame.into())
    }

    /// Close the physical connection, and with it every sibling.
    pub fn close(&self) {
        self.ctx.close();
    }

    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.ctx.ready_state()
    }
}

impl fmt::Debug for LogicalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalConnection")
            .field("name", &self.name)
            .field("id", &self.ctx.id())
            .finish_non_exhaustive()
    }
}
