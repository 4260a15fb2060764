//! Self-healing multiplexed websocket client.
//!
//! [`AutoWs`] owns one physical connection at a time. Sends issued while the
//! connection is down are queued and flushed on the next open; lost
//! connections are re-established with capped exponential backoff. Named
//! [`Subsocket`] handles share the connection and are told apart purely by
//! in-band tag frames (see the `frames` crate).
//!
//! ```ignore
//! let ws = AutoWs::connect("ws://127.0.0.1:3000/ws");
//! let chat = ws.channel("chat")?;
//! let mut inbox = chat.messages()?;
//! chat.send("hello")?;
//! while let Some(frame) = inbox.recv().await { /* ... */ }
//! ```

mod backoff;
mod config;
mod error;
mod manager;
mod subsocket;
mod transport;

pub use backoff::{Backoff, Schedule};
pub use config::ClientConfig;
pub use error::{ClientError, TransportError};
pub use manager::{AutoWs, ClientEvent, ConnectionState};
pub use subsocket::Subsocket;
pub use transport::{Endpoint, Link, Outbound, Transport, TransportEvent, WsTransport};

pub use frames::Frame;
