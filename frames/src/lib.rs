//! Shared frame model and tag protocol for multiplexed WS transport.
//!
//! This crate owns the wire vocabulary used by both `server` and `client`.
//! Application payloads travel verbatim; channel metadata rides in-band as
//! plain text control frames:
//!
//! - `_subsocket:<name>`: every following data frame belongs to `<name>`
//! - `_channel:<name>`: ask the peer to bind a logical channel `<name>`
//!
//! DESIGN
//! ======
//! A physical connection carries one [`TagState`]: the tag last announced on
//! the write side and the tag last declared by the peer on the read side. A
//! control frame is emitted only when the write tag actually changes, so
//! consecutive sends on one channel cost a single announcement. Both tags start
//! at [`ROOT`] and never survive the physical connection they belong to.

use serde::{Deserialize, Serialize};

/// Prefix of the control frame that switches the current channel tag.
pub const SUBSOCKET_PREFIX: &str = "_subsocket:";

/// Prefix of the control frame that requests a channel binding.
pub const CHANNEL_PREFIX: &str = "_channel:";

/// Tag of the default (root) channel.
pub const ROOT: &str = "";

/// Error returned by [`validate_name`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The name holds a line terminator, so a control frame carrying it would
    /// not be recognized by the peer and would leak into application data.
    #[error("channel name contains a line terminator: {0:?}")]
    InvalidName(String),
}

// =============================================================================
// FRAME
// =============================================================================

/// One opaque message on a physical connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Frame {
    /// UTF-8 text payload. The only kind that may carry a control frame.
    Text(String),
    /// Binary payload. Never interpreted as protocol metadata.
    Binary(Vec<u8>),
}

impl Frame {
    /// Text content, if this is a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for Frame {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

// =============================================================================
// CONTROL FRAMES
// =============================================================================

/// Protocol metadata decoded from a text frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Control {
    /// `_subsocket:<name>`: following data frames belong to `<name>`.
    Subsocket(String),
    /// `_channel:<name>`: bind logical channel `<name>` on this connection.
    Channel(String),
}

impl Control {
    /// Decode a control frame. Binary frames and text that does not match a
    /// control pattern exactly return `None` and count as application data.
    #[must_use]
    pub fn parse(frame: &Frame) -> Option<Self> {
        let text = frame.as_text()?;
        if let Some(name) = text.strip_prefix(SUBSOCKET_PREFIX) {
            return valid_name(name).then(|| Self::Subsocket(name.to_owned()));
        }
        if let Some(name) = text.strip_prefix(CHANNEL_PREFIX) {
            return valid_name(name).then(|| Self::Channel(name.to_owned()));
        }
        None
    }

    /// Channel name carried by this control frame.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Subsocket(name) | Self::Channel(name) => name,
        }
    }

    /// Encode as a text frame.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        match self {
            Self::Subsocket(name) => subsocket_frame(name),
            Self::Channel(name) => channel_frame(name),
        }
    }
}

/// Build a `_subsocket:<name>` frame.
#[must_use]
pub fn subsocket_frame(name: &str) -> Frame {
    Frame::Text(format!("{SUBSOCKET_PREFIX}{name}"))
}

/// Build a `_channel:<name>` frame.
#[must_use]
pub fn channel_frame(name: &str) -> Frame {
    Frame::Text(format!("{CHANNEL_PREFIX}{name}"))
}

/// Check that `name` survives a round trip through a control frame.
///
/// # Errors
///
/// Returns [`FrameError::InvalidName`] when the name contains `\n`, `\r`,
/// U+2028 or U+2029.
pub fn validate_name(name: &str) -> Result<(), FrameError> {
    if valid_name(name) {
        Ok(())
    } else {
        Err(FrameError::InvalidName(name.to_owned()))
    }
}

fn valid_name(name: &str) -> bool {
    !name.chars().any(|c| matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}'))
}

// =============================================================================
// TAG STATE
// =============================================================================

/// Result of running one inbound frame through [`TagState::demux`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A `_subsocket:` frame updated the read tag and was consumed.
    Retagged,
    /// Anything else. Attribute it to the current read tag.
    Data(Frame),
}

/// Per-physical-connection `(write, read)` tag pair.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagState {
    write: String,
    read: String,
}

impl TagState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag last announced on the write side.
    #[must_use]
    pub fn write(&self) -> &str {
        &self.write
    }

    /// Tag last declared by the peer.
    #[must_use]
    pub fn read(&self) -> &str {
        &self.read
    }

    /// Switch the write tag to `tag`, returning the control frame that must
    /// precede the next data frame, or `None` when `tag` is already current.
    pub fn announce(&mut self, tag: &str) -> Option<Frame> {
        if self.write == tag {
            return None;
        }
        tag.clone_into(&mut self.write);
        Some(subsocket_frame(tag))
    }

    /// Consume `_subsocket:` frames into the read tag; pass everything else on.
    pub fn demux(&mut self, frame: Frame) -> Inbound {
        match Control::parse(&frame) {
            Some(Control::Subsocket(name)) => {
                self.read = name;
                Inbound::Retagged
            }
            _ => Inbound::Data(frame),
        }
    }

    /// Forget both tags. Called whenever a physical connection goes away.
    pub fn reset(&mut self) {
        self.write.clear();
        self.read.clear();
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
