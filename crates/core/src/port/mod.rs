// Port Layer - Interfaces for external dependencies

pub mod batch_store;
pub mod id_provider; // For deterministic testing
pub mod job_transport;
pub mod time_provider;

// Re-exports
pub use batch_store::BatchStore;
pub use id_provider::{BatchIdProvider, IdProvider};
pub use job_transport::{JobQueue, JobTransport};
pub use time_provider::TimeProvider;
