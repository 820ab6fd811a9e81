// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid batch id: {0:?}")]
    InvalidBatchId(String),

    #[error("Unknown batch event: {0}")]
    UnknownEvent(String),

    #[error("Corrupt counter {field}: {value:?}")]
    CorruptCounter { field: String, value: String },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
