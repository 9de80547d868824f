// crates/engram-server/src/error.rs
// Standardized error types for Engram

use thiserror::Error;

/// Main error type for the Engram library
#[derive(Error, Debug)]
pub enum EngramError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("write lock timed out")]
    LockTimeout,

    #[error("vector backend unavailable: {0}")]
    VectorUnavailable(String),

    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    #[error("integrity failure: {0}")]
    Integrity(String),

    #[error("plugin failure: {0}")]
    Plugin(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("task cancelled")]
    Cancelled,

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using EngramError
pub type Result<T> = std::result::Result<T, EngramError>;

impl EngramError {
    /// Convert to user-facing string for MCP tool boundaries.
    ///
    /// Absolute paths are replaced with `[path]` and the message is truncated
    /// to 200 chars; no stack traces cross the wire.
    pub fn to_user_string(&self) -> String {
        crate::utils::sanitize_error_text(&self.to_string())
    }
}

impl From<String> for EngramError {
    fn from(s: String) -> Self {
        EngramError::Other(s)
    }
}

impl From<tokio::task::JoinError> for EngramError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            EngramError::Cancelled
        } else {
            EngramError::Other(err.to_string())
        }
    }
}

impl From<EngramError> for String {
    fn from(err: EngramError) -> Self {
        err.to_user_string()
    }
}
