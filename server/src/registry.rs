//! Channel registry: names the server is willing to bind.
//!
//! Entries are created on first use and live as long as the registry. A
//! `_channel:<name>` request for a name that was never registered is rejected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::connection::Accepted;

/// Subscribers for `connection` events of one kind of logical connection.
#[derive(Default)]
pub(crate) struct Subscribers {
    list: Mutex<Vec<mpsc::UnboundedSender<Accepted>>>,
}

impl Subscribers {
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<Accepted> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.list.lock().unwrap_or_else(PoisonError::into_inner).push(tx);
        rx
    }

    /// Live subscribers, pruning ones whose receiver was dropped.
    pub(crate) fn live(&self) -> Vec<mpsc::UnboundedSender<Accepted>> {
        let mut list = self.list.lock().unwrap_or_else(PoisonError::into_inner);
        list.retain(|tx| !tx.is_closed());
        list.clone()
    }
}

/// Handle to a registered channel.
#[derive(Clone)]
pub struct Channel {
    name: Arc<str>,
    subscribers: Arc<Subscribers>,
}

impl Channel {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive every logical connection bound to this channel from now on.
    #[must_use]
    pub fn connections(&self) -> mpsc::UnboundedReceiver<Accepted> {
        self.subscribers.subscribe()
    }

    pub(crate) fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }
}

#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<Mutex<HashMap<String, Channel>>>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, or return the existing entry.
    pub fn channel(&self, name: &str) -> Channel {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(name.to_owned())
            .or_insert_with(|| Channel { name: Arc::from(name), subscribers: Arc::default() })
            .clone()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Channel> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
