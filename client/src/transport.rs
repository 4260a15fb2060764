//! Transport seam: one physical connection, surfaced as an event stream.
//!
//! DESIGN
//! ======
//! A [`Transport`] opens a physical connection without blocking and hands back
//! a [`Link`]: a sender for outbound frames plus a receiver of lifecycle
//! events. The implementation drives the socket on its own task through the
//! matching [`Endpoint`]. Every opened link ends with exactly one
//! [`TransportEvent::Close`], including links whose handshake never
//! completed, which is what lets the manager treat failed dials and dropped
//! connections the same way.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::TransportError;
use frames::Frame;

/// Lifecycle event reported by a physical connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is ready to carry frames.
    Open,
    /// A frame arrived from the peer.
    Message(Frame),
    /// Something went wrong. Never ends the connection by itself.
    Error(TransportError),
    /// The connection is gone. Always the last event on a link.
    Close,
}

/// Instruction from the manager to the transport task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    Close,
}

/// Opens physical connections on behalf of a manager.
pub trait Transport: Send + Sync + 'static {
    /// Start connecting to `url`. Must not block; progress is reported
    /// through the returned link's events.
    fn open(&self, url: &str) -> Link;
}

/// Manager side of a physical connection.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Transport side of a physical connection.
#[derive(Debug)]
pub struct Endpoint {
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Link {
    /// Create a connected link/endpoint pair.
    #[must_use]
    pub fn pair() -> (Link, Endpoint) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Link { outbound: outbound_tx, events: events_rx },
            Endpoint { outbound: outbound_rx, events: events_tx },
        )
    }

    /// Queue a frame for the transport task. Frames sent after the task has
    /// gone away are dropped; its close event is already on the way.
    pub fn send(&self, frame: Frame) {
        let _ = self.outbound.send(Outbound::Frame(frame));
    }

    /// Ask the transport to close the connection.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Next lifecycle event. A transport task that vanished without saying
    /// goodbye counts as closed.
    pub async fn recv(&mut self) -> TransportEvent {
        self.events.recv().await.unwrap_or(TransportEvent::Close)
    }
}

impl Endpoint {
    /// Report an event to the manager.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

// =============================================================================
// WEBSOCKET TRANSPORT
// =============================================================================

/// Default transport: a tokio-tungstenite websocket per physical connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn open(&self, url: &str) -> Link {
        let (link, endpoint) = Link::pair();
        tokio::spawn(run_socket(url.to_owned(), endpoint));
        link
    }
}

async fn run_socket(url: String, mut endpoint: Endpoint) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            endpoint.emit(TransportEvent::Error(TransportError::Connect(Box::new(e))));
            endpoint.emit(TransportEvent::Close);
            return;
        }
    };
    endpoint.emit(TransportEvent::Open);

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        endpoint.emit(TransportEvent::Message(Frame::Text(text.as_str().to_owned())));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        endpoint.emit(TransportEvent::Message(Frame::Binary(bytes.to_vec())));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        endpoint.emit(TransportEvent::Error(TransportError::Socket(Box::new(e))));
                        break;
                    }
                }
            }
            out = endpoint.outbound.recv() => {
                match out {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = write.send(to_message(frame)).await {
                            endpoint.emit(TransportEvent::Error(TransportError::Socket(Box::new(e))));
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = write.close().await;
                        break;
                    }
                }
            }
        }
    }

    debug!(%url, "ws transport: socket closed");
    endpoint.emit(TransportEvent::Close);
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
