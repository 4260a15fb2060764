//! Logical channel handle sharing a manager's physical connection.

use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::manager::AutoWs;
use frames::Frame;

/// Named view onto an [`AutoWs`] connection.
///
/// Outbound frames are tagged with the handle's name; inbound frames are
/// delivered to [`Subsocket::messages`] when the peer's current tag equals
/// the name at arrival time.
#[derive(Clone)]
pub struct Subsocket {
    manager: AutoWs,
    name: String,
}

impl Subsocket {
    pub(crate) fn new(manager: AutoWs, name: &str) -> Self {
        Self { manager, name: name.to_owned() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send on this channel, queueing while disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Destroyed`] once the manager has shut down.
    pub fn send(&self, frame: impl Into<Frame>) -> Result<(), ClientError> {
        self.manager.send_tagged(&self.name, frame.into(), true)
    }

    /// Send on this channel if connected; drop the frame otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Destroyed`] once the manager has shut down.
    pub fn send_unbuffered(&self, frame: impl Into<Frame>) -> Result<(), ClientError> {
        self.manager.send_tagged(&self.name, frame.into(), false)
    }

    /// Derived handle on the same connection, never announced with `_channel:`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidName`] for names a control frame cannot carry.
    pub fn subsocket(&self, name: &str) -> Result<Subsocket, ClientError> {
        self.manager.subsocket(name)
    }

    /// Subscribe to data frames addressed to this channel. Frames that arrive
    /// before the subscription is registered are not replayed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Destroyed`] once the manager has shut down.
    pub fn messages(&self) -> Result<mpsc::UnboundedReceiver<Frame>, ClientError> {
        self.manager.listen(&self.name)
    }
}
