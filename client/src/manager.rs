//! Connection manager: lifecycle, reconnect, outbound queue, tag state.
//!
//! DESIGN
//! ======
//! [`AutoWs`] is a cheap handle; the state lives in a [`Manager`] owned by a
//! single spawned task. Handles talk to it over an unbounded command channel,
//! so every operation is non-blocking and all mutation (queue, tags, replay
//! set, timer) happens on one task in submission order. The task `select!`s
//! over three sources:
//! - commands from handles
//! - events from the current physical connection
//! - the single pending reconnect deadline, if armed
//!
//! LIFECYCLE
//! =========
//! 1. `connect()` → Connecting
//! 2. Open → replay `_channel:` registrations, flush queue, emit open/connect
//! 3. Close → emit disconnect, plus close and a tag reset if it had opened; reconnect
//! 4. `destroy()` → Destroyed; the close that follows never reconnects
//!
//! The task exits once the manager is destroyed and its last physical
//! connection has closed. Dropping every handle counts as `destroy()`.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, Schedule};
use crate::config::ClientConfig;
use crate::error::{ClientError, TransportError};
use crate::subsocket::Subsocket;
use crate::transport::{Link, Transport, TransportEvent, WsTransport};
use frames::{Frame, Inbound, ROOT, TagState};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Terminal. Reached through `destroy()` from any state.
    Destroyed,
}

/// Event delivered to subscribers of [`AutoWs::events`].
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// First successful connect of this manager. Emitted once.
    Open,
    /// Every successful connect.
    Connect,
    /// Every lost physical connection, opened or not.
    Disconnect,
    /// Every lost physical connection that had reached open.
    Close,
    /// Non-fatal transport error.
    Error(Arc<TransportError>),
    /// Data frame addressed to the root channel.
    Message(Frame),
}

pub(crate) enum Command {
    Send { tag: String, frame: Frame, buffered: bool },
    Register(String),
    Subscribe(mpsc::UnboundedSender<ClientEvent>),
    Listen { name: String, tx: mpsc::UnboundedSender<Frame> },
    State(oneshot::Sender<ConnectionState>),
    Destroy,
}

/// The physical connection currently owned by the manager.
struct Active {
    link: Link,
    opened: bool,
}

// =============================================================================
// HANDLE
// =============================================================================

/// Handle to a self-reconnecting multiplexed connection.
///
/// Cloning shares the same manager. The manager is destroyed when
/// [`AutoWs::destroy`] is called or the last handle (including every
/// [`Subsocket`]) is dropped.
#[derive(Clone)]
pub struct AutoWs {
    commands: mpsc::UnboundedSender<Command>,
}

impl AutoWs {
    /// Connect to `url` over the default websocket transport, with
    /// configuration read from the environment.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn connect(url: impl Into<String>) -> Self {
        Self::with_transport(url, Arc::new(WsTransport), ClientConfig::from_env())
    }

    /// Connect to `url` through `transport`. The first connection attempt
    /// starts immediately.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn with_transport(url: impl Into<String>, transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Manager::new(url.into(), transport, config);
        tokio::spawn(manager.run(rx));
        Self { commands: tx }
    }

    /// Name of the root scope.
    #[must_use]
    pub fn name(&self) -> &str {
        ROOT
    }

    /// Send on the root channel, queueing while disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Destroyed`] once the manager has shut down.
    pub fn send(&self, frame: impl Into<Frame>) -> Result<(), ClientError> {
        self.send_tagged(ROOT, frame.into(), true)
    }

    /// Send on the root channel if connected; drop the frame otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Destroyed`] once the manager has shut down.
    pub fn send_unbuffered(&self, frame: impl Into<Frame>) -> Result<(), ClientError> {
        self.send_tagged(ROOT, frame.into(), false)
    }

    /// Register `name` for announcement on every connect and return a handle
    /// bound to it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidName`] for names a control frame cannot
    /// carry and [`ClientError::Destroyed`] once the manager has shut down.
    pub fn channel(&self, name: &str) -> Result<Subsocket, ClientError> {
        frames::validate_name(name)?;
        self.dispatch(Command::Register(name.to_owned()))?;
        Ok(Subsocket::new(self.clone(), name))
    }

    /// Handle bound to `name` that is never announced with `_channel:`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidName`] for names a control frame cannot carry.
    pub fn subsocket(&self, name: &str) -> Result<Subsocket, ClientError> {
        frames::validate_name(name)?;
        Ok(Subsocket::new(self.clone(), name))
    }

    /// Subscribe to lifecycle events and root-channel messages.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Destroyed`] once the manager has shut down.
    pub fn events(&self) -> Result<mpsc::UnboundedReceiver<ClientEvent>, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.dispatch(Command::Subscribe(tx))?;
        Ok(rx)
    }

    /// Snapshot of the connection state.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Destroyed`] once the manager has shut down.
    pub async fn state(&self) -> Result<ConnectionState, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(Command::State(tx))?;
        rx.await.map_err(|_| ClientError::Destroyed)
    }

    /// Stop reconnecting and close the current connection. Safe to call more
    /// than once. Queued frames are not guaranteed to be delivered.
    pub fn destroy(&self) {
        let _ = self.dispatch(Command::Destroy);
    }

    pub(crate) fn send_tagged(&self, tag: &str, frame: Frame, buffered: bool) -> Result<(), ClientError> {
        self.dispatch(Command::Send { tag: tag.to_owned(), frame, buffered })
    }

    pub(crate) fn listen(&self, name: &str) -> Result<mpsc::UnboundedReceiver<Frame>, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.dispatch(Command::Listen { name: name.to_owned(), tx })?;
        Ok(rx)
    }

    fn dispatch(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Destroyed)
    }
}

// =============================================================================
// MANAGER
// =============================================================================

struct Manager {
    url: String,
    transport: Arc<dyn Transport>,
    state: ConnectionState,
    live: bool,
    active: Option<Active>,
    queue: VecDeque<Frame>,
    /// Replay set, in registration order.
    channels: Vec<String>,
    tags: TagState,
    backoff: Backoff,
    reconnect_at: Option<Instant>,
    ever_opened: bool,
    subscribers: Vec<mpsc::UnboundedSender<ClientEvent>>,
    listeners: Vec<(String, mpsc::UnboundedSender<Frame>)>,
}

impl Manager {
    fn new(url: String, transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            url,
            transport,
            state: ConnectionState::Disconnected,
            live: true,
            active: None,
            queue: VecDeque::new(),
            channels: Vec::new(),
            tags: TagState::new(),
            backoff: Backoff::new(&config),
            reconnect_at: None,
            ever_opened: false,
            subscribers: Vec::new(),
            listeners: Vec::new(),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut handles_alive = true;
        self.connect();

        while self.live || self.active.is_some() {
            let deadline = self.reconnect_at;
            tokio::select! {
                biased;
                cmd = commands.recv(), if handles_alive => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            handles_alive = false;
                            self.destroy();
                        }
                    }
                }
                event = next_event(self.active.as_mut()) => self.handle_event(event),
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.reconnect_at = None;
                    self.connect();
                }
            }
        }

        debug!(url = %self.url, "autows: manager stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Send { tag, frame, buffered } => self.send(&tag, frame, buffered),
            Command::Register(name) => self.register(name),
            Command::Subscribe(tx) => self.subscribers.push(tx),
            Command::Listen { name, tx } => self.listeners.push((name, tx)),
            Command::State(reply) => {
                let _ = reply.send(self.state);
            }
            Command::Destroy => self.destroy(),
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Close => self.on_close(),
            TransportEvent::Error(e) => {
                warn!(url = %self.url, error = %e, "autows: transport error");
                self.emit(&ClientEvent::Error(Arc::new(e)));
            }
            TransportEvent::Message(frame) => self.on_message(frame),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    fn connect(&mut self) {
        info!(url = %self.url, attempts = self.backoff.attempts(), "autows: connecting");
        let link = self.transport.open(&self.url);
        self.active = Some(Active { link, opened: false });
        self.state = ConnectionState::Connecting;
        self.backoff.record_attempt(Instant::now());
    }

    fn reconnect(&mut self) {
        self.reconnect_at = None;
        match self.backoff.schedule() {
            Schedule::Now => self.connect(),
            Schedule::After(wait) => {
                info!(url = %self.url, ?wait, "autows: reconnect scheduled");
                self.reconnect_at = Some(Instant::now() + wait);
            }
        }
    }

    fn on_open(&mut self) {
        // Destroyed while dialing: the close is already on its way.
        if !self.live {
            return;
        }
        let Some(active) = self.active.as_mut() else { return };
        active.opened = true;
        self.state = ConnectionState::Open;
        self.backoff.reset();

        // Registrations first, then everything queued while down. The queue
        // was tagged against the fresh tag state, so it goes out verbatim.
        for name in &self.channels {
            active.link.send(frames::channel_frame(name));
        }
        for frame in self.queue.drain(..) {
            active.link.send(frame);
        }

        info!(url = %self.url, "autows: connected");
        if !self.ever_opened {
            self.ever_opened = true;
            self.emit(&ClientEvent::Open);
        }
        self.emit(&ClientEvent::Connect);
    }

    fn on_close(&mut self) {
        let opened = self.active.take().is_some_and(|active| active.opened);
        info!(url = %self.url, opened, "autows: disconnected");

        self.emit(&ClientEvent::Disconnect);
        // A dial that never opened sent nothing, and the queue was tagged
        // against the current write tag, so only an opened link resets it.
        if opened {
            self.emit(&ClientEvent::Close);
            self.tags.reset();
        }

        if self.live {
            self.state = ConnectionState::Disconnected;
            self.reconnect();
        }
    }

    fn destroy(&mut self) {
        if self.live {
            info!(url = %self.url, "autows: destroyed");
        }
        self.live = false;
        self.state = ConnectionState::Destroyed;
        self.reconnect_at = None;
        if let Some(active) = &self.active {
            active.link.close();
        }
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    fn send(&mut self, tag: &str, frame: Frame, buffered: bool) {
        match open_link(self.active.as_ref()) {
            Some(link) => {
                if let Some(control) = self.tags.announce(tag) {
                    link.send(control);
                }
                link.send(frame);
            }
            None if buffered => {
                if let Some(control) = self.tags.announce(tag) {
                    self.queue.push_back(control);
                }
                self.queue.push_back(frame);
            }
            None => {}
        }
    }

    fn register(&mut self, name: String) {
        if let Some(link) = open_link(self.active.as_ref()) {
            link.send(frames::channel_frame(&name));
        }
        if !self.channels.contains(&name) {
            self.channels.push(name);
        }
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    fn on_message(&mut self, frame: Frame) {
        let Inbound::Data(frame) = self.tags.demux(frame) else { return };

        let tag = self.tags.read();
        if tag == ROOT {
            self.emit(&ClientEvent::Message(frame));
        } else {
            self.listeners
                .retain(|(name, tx)| name != tag || tx.send(frame.clone()).is_ok());
        }
    }

    fn emit(&mut self, event: &ClientEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// The current link, only while it is open.
fn open_link(active: Option<&Active>) -> Option<&Link> {
    active.filter(|active| active.opened).map(|active| &active.link)
}

async fn next_event(active: Option<&mut Active>) -> TransportEvent {
    match active {
        Some(active) => active.link.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;
