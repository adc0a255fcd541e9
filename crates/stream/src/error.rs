//! Error types for the stream core

use thiserror::Error;

/// Transport-level failures. These never escape to callers of the
/// supervisor — they degrade into connection state plus a last-error string.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Failures talking to the gateway's REST surface.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway rejected resolution: {0}")]
    Rejected(String),

    #[error("resolution already in flight for {0}")]
    Busy(String),

    #[error("request {0} already resolved locally")]
    AlreadyResolved(String),

    #[error("coordinator unavailable")]
    Closed,
}
