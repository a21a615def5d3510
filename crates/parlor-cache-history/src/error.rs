//! Error types for the history engine.

use thiserror::Error;

/// Errors from chunk reference and engine operations.
///
/// Reads and observations never error; these cover caller misuse and invalid
/// payloads. The offending operation is always a no-op on shared state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("chunk reference has been revoked")]
    Revoked,

    #[error("unknown chunk reference")]
    UnknownReference,

    #[error("invalid chunk payload: {0}")]
    InvalidChunk(&'static str),
}

/// Result alias for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
