//! Error types for the cache facade.

use thiserror::Error;

/// Errors surfaced by cache operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    History(#[from] parlor_cache_history::HistoryError),

    #[error("history page for {peer} contains a message for another peer")]
    ForeignMessage { peer: String },
}

/// Result alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
