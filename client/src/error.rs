/// Error returned by [`crate::AutoWs`] and [`crate::Subsocket`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The manager has been destroyed and its event loop has exited.
    #[error("connection manager destroyed")]
    Destroyed,
    /// The channel name cannot be carried by a control frame.
    #[error(transparent)]
    InvalidName(#[from] frames::FrameError),
}

/// Non-fatal failure reported by a transport through its error event.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The websocket connection or handshake failed.
    #[error("websocket connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    /// The websocket failed while reading or writing.
    #[error("websocket i/o failed: {0}")]
    Socket(Box<tokio_tungstenite::tungstenite::Error>),
}
