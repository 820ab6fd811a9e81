// Application Layer - Use Cases and Business Logic

pub mod batch;
pub mod callback;
pub mod handler;
pub mod retry;
pub mod worker;

// Re-exports
pub use batch::{
    Batch, BatchConfig, BatchContext, BatchService, DispatchOutcome, EnqueueRequest,
    ReportOutcome,
};
pub use callback::{BatchCallback, CallbackContext, CallbackRegistry, CallbackRunner};
pub use handler::{HandlerRegistry, JobContext, JobHandler};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker};
