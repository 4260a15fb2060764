//! Inbound dispatch for one physical connection.
//!
//! Every frame read from the socket goes through [`Dispatcher::on_frame`]:
//!
//! 1. `_subsocket:<name>` updates the read tag and is consumed.
//! 2. `_channel:<name>` binds a logical connection if `name` is registered,
//!    otherwise the whole socket is closed.
//! 3. Anything else is data for the logical connections named by the read tag.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{Accepted, LogicalConnection};
use crate::context::{ConnectionContext, ReadyState};
use crate::registry::{ChannelRegistry, Subscribers};
use frames::{Control, Frame, Inbound, ROOT};

pub(crate) struct Dispatcher {
    ctx: Arc<ConnectionContext>,
    registry: ChannelRegistry,
}

impl Dispatcher {
    pub(crate) fn new(ctx: Arc<ConnectionContext>, registry: ChannelRegistry) -> Self {
        Self { ctx, registry }
    }

    /// Create the root logical connection and hand it to the server's own
    /// subscribers. Happens once, before any frame is read.
    pub(crate) fn on_open(&self, root: &Subscribers) {
        self.accept(ROOT, root);
    }

    pub(crate) fn on_frame(&self, frame: Frame) {
        // A rejected binding ends the connection; frames already buffered
        // behind it are dropped.
        if self.ctx.ready_state() != ReadyState::Open {
            return;
        }
        let frame = match self.ctx.tags().demux(frame) {
            Inbound::Retagged => return,
            Inbound::Data(frame) => frame,
        };

        if let Some(Control::Channel(name)) = Control::parse(&frame) {
            self.bind(&name);
            return;
        }

        let tag = self.ctx.tags().read().to_owned();
        self.ctx.deliver(&tag, &frame);
    }

    pub(crate) fn on_error(&self, message: &str) {
        warn!(conn_id = %self.ctx.id(), error = %message, "autows: socket error");
        self.ctx.broadcast_error(message);
    }

    pub(crate) fn on_close(&self) {
        let closed = self.ctx.shutdown();
        debug!(conn_id = %self.ctx.id(), logical = closed, "autows: socket closed");
    }

    fn bind(&self, name: &str) {
        let Some(channel) = self.registry.get(name) else {
            warn!(conn_id = %self.ctx.id(), channel = %name, "autows: unknown channel, closing connection");
            self.ctx.close();
            return;
        };
        info!(conn_id = %self.ctx.id(), channel = %name, "autows: channel bound");
        self.accept(name, channel.subscribers());
    }

    /// Derive a logical connection named `name` and give each live subscriber
    /// its own event stream for it.
    fn accept(&self, name: &str, subscribers: &Subscribers) {
        let connection = LogicalConnection::new(name, Arc::clone(&self.ctx));
        let mut sinks = Vec::new();
        let mut accepted = Vec::new();
        for subscriber in subscribers.live() {
            let (tx, rx) = mpsc::unbounded_channel();
            sinks.push(tx);
            accepted.push((subscriber, rx));
        }
        self.ctx.derive(name, sinks);

        for (subscriber, events) in accepted {
            let _ = subscriber.send(Accepted {
                connection: connection.clone(),
                events,
                request: self.ctx.request(),
            });
        }
    }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
