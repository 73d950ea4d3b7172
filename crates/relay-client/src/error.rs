//! Client transport errors.

use relay_core::protocol::FrameError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// A transport call failed. Never fatal: the session falls back or reports it.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("handshake timed out")]
    Timeout,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("relay answered {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid frame: {0}")]
    Decode(#[from] FrameError),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("connection closed")]
    Closed,
}
