//! Auto-reconnecting, multiplexed websockets.
//!
//! Many named logical channels share one physical websocket. Channel
//! identity travels in-band as `_subsocket:<name>` and `_channel:<name>`
//! text frames; everything else is application data passed through verbatim.
//!
//! - [`client`]: reconnecting connection manager with an outbound queue
//! - [`server`]: axum upgrade handler that binds registered channels
//! - [`frames`]: the shared wire vocabulary and tag state

pub use client;
pub use frames;
pub use server;

pub use client::{AutoWs, ClientConfig, ClientError, ClientEvent, Subsocket};
pub use frames::Frame;
pub use server::{AutoWsServer, ChannelRegistry, LogicalConnection};
