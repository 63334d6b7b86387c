//! Error taxonomy shared by every crate in the workspace.
//!
//! Backends and the manager return [`ConvoError`]; the split between
//! retryable and structural kinds drives the manager's retry loop.

use thiserror::Error;

/// Errors raised by conversation persistence operations.
#[derive(Error, Debug)]
pub enum ConvoError {
    /// Malformed input. Never retried; the caller must correct the request.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced conversation or user does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Sequence or uniqueness violation caused by a concurrent writer.
    /// Re-read and retry the single operation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient backend failure (I/O, pool exhaustion, timeout). Safe to
    /// retry with backoff; state is unchanged.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A stored document could not be decoded. Distinct from [`Unavailable`]
    /// so operators can tell data corruption from outages.
    ///
    /// [`Unavailable`]: ConvoError::Unavailable
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ConvoError {
    /// True for error kinds that a caller may retry without changing the
    /// request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConvoError::Unavailable(_) | ConvoError::Conflict(_))
    }
}

impl From<std::io::Error> for ConvoError {
    fn from(err: std::io::Error) -> Self {
        ConvoError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for ConvoError {
    fn from(err: serde_json::Error) -> Self {
        ConvoError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConvoError>;
