// Domain Layer - Pure batch and job entities

pub mod batch;
pub mod callback;
pub mod error;
pub mod job;

// Re-exports
pub use batch::{field, BatchEvent, BatchId, BatchStatus, CallbackDescriptor};
pub use callback::{CallbackInvocation, CALLBACK_JOB_TYPE};
pub use error::DomainError;
pub use job::{Job, JobId, JobPayload, JobState, JobType, QueueId};
