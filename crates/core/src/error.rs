// Central Error Type for the batch engine

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    /// Operation invoked outside of the context it requires (e.g. enqueue with no batch scope)
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Key-value store unavailable or rejected the operation
    #[error("Store error: {0}")]
    Store(String),

    /// Job transport unavailable or rejected the submission
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Job or callback handler reported a failure
    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Store and transport failures are transient: the caller's own retry policy applies
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Store(_) | AppError::Transport(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error and redis::RedisError conversions live in the adapter crates
// (orphan rule) and map to AppError::Store(String)
