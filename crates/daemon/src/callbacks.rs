// Built-in batch callbacks

use async_trait::async_trait;
use tally_core::application::{BatchCallback, CallbackContext, CallbackRegistry};
use tally_core::Result;
use tracing::info;

pub const LOG_CALLBACK: &str = "tally::log";

/// Logs the event with its options
pub struct LogCallback;

#[async_trait]
impl BatchCallback for LogCallback {
    async fn on_complete(&self, ctx: &CallbackContext) -> Result<()> {
        log_event(ctx);
        Ok(())
    }

    async fn on_success(&self, ctx: &CallbackContext) -> Result<()> {
        log_event(ctx);
        Ok(())
    }
}

fn log_event(ctx: &CallbackContext) {
    info!(
        bid = %ctx.bid,
        event = %ctx.event,
        parent_bid = ?ctx.parent_bid.as_ref().map(|p| p.as_str()),
        options = %ctx.options,
        "Batch event"
    );
}

pub fn builtin_callbacks() -> CallbackRegistry {
    let mut registry = CallbackRegistry::new();
    registry.register(LOG_CALLBACK, || LogCallback);
    registry
}
