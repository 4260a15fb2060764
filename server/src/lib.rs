//! Server half of the multiplexed websocket protocol.
//!
//! SYSTEM CONTEXT
//! ==============
//! [`AutoWsServer`] plugs into an axum router and upgrades requests into
//! physical connections. Each physical connection gets a shared context
//! holding its tag state; every logical connection derived from it (the root
//! one plus one per accepted `_channel:` binding) is a thin handle over that
//! context.

mod connection;
mod context;
mod dispatch;
mod registry;
mod ws;

pub use connection::{Accepted, ConnectionEvent, LogicalConnection};
pub use context::ReadyState;
pub use registry::{Channel, ChannelRegistry};
pub use ws::{AutoWsServer, Handshake};

pub use frames::Frame;

/// Error returned by [`LogicalConnection::send`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The physical connection has already shut down.
    #[error("connection closed")]
    Closed,
}
