//! Error types shared across the crate.
//!
//! None of these are fatal to a session: transport failures degrade into
//! queued changes, malformed frames are dropped, and store failures only
//! lose the remembered participant id.

use thiserror::Error;

/// Failure to hand a message to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("channel is not connected")]
    NotConnected,
    #[error("channel closed")]
    Closed,
    #[error("send rejected: {0}")]
    Rejected(String),
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Wire protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Client-local participant store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store file format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Reference relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
