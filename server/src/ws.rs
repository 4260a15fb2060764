//! WebSocket upgrade and socket relay.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade: a connection context is created and the root logical
//!    connection is handed to [`AutoWsServer::connections`] subscribers
//! 2. Socket frames: dispatched through the context's tag state
//! 3. Outbound frames: drained from the context's queue onto the socket
//! 4. Close: every derived logical connection gets one close event

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use axum::routing::get;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::connection::Accepted;
use crate::context::{ConnectionContext, Outbound};
use crate::dispatch::Dispatcher;
use crate::registry::{Channel, ChannelRegistry, Subscribers};
use frames::Frame;

/// The parts of the upgrade request subscribers get to see.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// Multiplexing websocket server. Cheap to clone; clones share the registry
/// and subscriber lists.
#[derive(Clone, Default)]
pub struct AutoWsServer {
    registry: ChannelRegistry,
    root: Arc<Subscribers>,
}

impl AutoWsServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel clients may bind with `_channel:<name>`.
    pub fn channel(&self, name: &str) -> Channel {
        self.registry.channel(name)
    }

    #[must_use]
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Receive the root logical connection of every physical connection.
    #[must_use]
    pub fn connections(&self) -> mpsc::UnboundedReceiver<Accepted> {
        self.root.subscribe()
    }

    /// Complete a websocket upgrade and serve the socket.
    pub fn handle_upgrade(&self, ws: WebSocketUpgrade, request: Handshake) -> Response {
        let server = self.clone();
        ws.on_upgrade(move |socket| server.serve_socket(socket, request))
    }

    /// Router with the upgrade endpoint at `path` and a `/healthz` probe.
    pub fn router(&self, path: &str) -> Router {
        Router::new()
            .route(path, get(upgrade))
            .route("/healthz", get(healthz))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    async fn serve_socket(self, socket: WebSocket, request: Handshake) {
        let (ctx, outbound) = ConnectionContext::new(request);
        let dispatcher = Dispatcher::new(Arc::clone(&ctx), self.registry.clone());
        info!(conn_id = %ctx.id(), path = %ctx.request().uri.path(), "autows: client connected");

        dispatcher.on_open(&self.root);
        run_socket(socket, &dispatcher, outbound).await;
        dispatcher.on_close();

        info!(conn_id = %ctx.id(), "autows: client disconnected");
    }
}

async fn upgrade(State(server): State<AutoWsServer>, ws: WebSocketUpgrade, uri: Uri, headers: HeaderMap) -> Response {
    server.handle_upgrade(ws, Handshake { uri, headers })
}

async fn healthz() -> &'static str {
    "ok"
}

async fn run_socket(mut socket: WebSocket, dispatcher: &Dispatcher, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => dispatcher.on_frame(Frame::Text(text.as_str().to_owned())),
                    Some(Ok(Message::Binary(bytes))) => dispatcher.on_frame(Frame::Binary(bytes.to_vec())),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        dispatcher.on_error(&e.to_string());
                        break;
                    }
                }
            }
            out = outbound.recv() => {
                match out {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = socket.send(to_message(frame)).await {
                            dispatcher.on_error(&e.to_string());
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
    }
}
