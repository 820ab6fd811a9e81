// Batch callbacks: resolved by stable name at invocation time
//
// The process that fires an event and the process running the callback job
// are usually different, so callbacks travel as a name plus options and are
// looked up in this registry on the worker side.

use super::handler::{JobContext, JobHandler};
use crate::domain::{BatchEvent, BatchId, CallbackInvocation};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Arguments handed to a callback
#[derive(Debug, Clone)]
pub struct CallbackContext {
    pub event: BatchEvent,
    pub bid: BatchId,
    /// Enclosing batch, for callbacks that want to signal it
    pub parent_bid: Option<BatchId>,
    pub options: serde_json::Value,
}

/// User code run when a batch event fires
#[async_trait]
pub trait BatchCallback: Send + Sync {
    async fn on_complete(&self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    async fn on_success(&self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }
}

type CallbackFactory = Arc<dyn Fn() -> Box<dyn BatchCallback> + Send + Sync>;

/// Callback name -> factory
#[derive(Default, Clone)]
pub struct CallbackRegistry {
    factories: HashMap<String, CallbackFactory>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; a fresh callback instance is built per invocation
    pub fn register<F, C>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> C + Send + Sync + 'static,
        C: BatchCallback + 'static,
    {
        let factory: CallbackFactory =
            Arc::new(move || Box::new(factory()) as Box<dyn BatchCallback>);
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn instantiate(&self, name: &str) -> Option<Box<dyn BatchCallback>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Decode an invocation payload and run the named callback
    pub async fn invoke(&self, invocation: CallbackInvocation) -> Result<()> {
        let callback = self.instantiate(&invocation.callback_type).ok_or_else(|| {
            warn!(callback_type = %invocation.callback_type, bid = %invocation.bid, "Unknown callback type");
            AppError::NotFound(format!("callback type {}", invocation.callback_type))
        })?;

        let ctx = CallbackContext {
            event: invocation.event,
            bid: invocation.bid,
            parent_bid: invocation.parent_bid,
            options: invocation.options,
        };
        match ctx.event {
            BatchEvent::Complete => callback.on_complete(&ctx).await?,
            BatchEvent::Success => callback.on_success(&ctx).await?,
        }

        info!(
            callback_type = %invocation.callback_type,
            bid = %ctx.bid,
            event = %ctx.event,
            "Batch callback ran"
        );
        Ok(())
    }
}

/// Handler for callback-invocation jobs
pub struct CallbackRunner {
    callbacks: CallbackRegistry,
}

impl CallbackRunner {
    pub fn new(callbacks: CallbackRegistry) -> Self {
        Self { callbacks }
    }
}

#[async_trait]
impl JobHandler for CallbackRunner {
    async fn perform(&self, ctx: &JobContext) -> Result<()> {
        let invocation: CallbackInvocation = serde_json::from_value(ctx.payload().clone())?;
        self.callbacks.invoke(invocation).await
    }
}
