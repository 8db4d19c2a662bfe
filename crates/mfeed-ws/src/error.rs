//! WebSocket error types.
//!
//! These never reach the connector's caller; they end a session and select
//! the backoff policy for the next attempt.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Short reason label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "connect_failed",
            Self::ConnectionClosed { .. } => "closed",
            Self::HeartbeatTimeout => "ping_timeout",
            Self::Tungstenite(_) => "transport",
            Self::Json(_) => "encode",
        }
    }
}

pub type WsResult<T> = Result<T, WsError>;
