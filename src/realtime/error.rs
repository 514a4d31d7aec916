//! Real-time channel error types.

use thiserror::Error;

/// Errors raised by the real-time channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Hub protocol error: {0}")]
    Protocol(String),

    #[error("Channel closed: {0}")]
    Closed(String),
}
