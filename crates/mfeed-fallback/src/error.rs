//! Error types for the fallback path.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid snapshot payload: {0}")]
    Decode(String),
}

pub type FallbackResult<T> = Result<T, FallbackError>;
