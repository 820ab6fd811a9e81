// Job handlers: the worker-side contract for executing jobs

use super::batch::{Batch, BatchContext, BatchService};
use super::callback::{CallbackRegistry, CallbackRunner};
use crate::domain::{Job, CALLBACK_JOB_TYPE};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Executes one job type
///
/// Return `Err` to fail the attempt; the worker's retry policy decides
/// whether the failure is terminal.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn perform(&self, ctx: &JobContext) -> Result<()>;
}

/// What a handler sees while running a job
pub struct JobContext {
    job: Job,
    service: BatchService,
}

impl JobContext {
    pub fn new(job: Job, service: BatchService) -> Self {
        Self { job, service }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn payload(&self) -> &serde_json::Value {
        self.job.payload.as_value()
    }

    pub fn service(&self) -> &BatchService {
        &self.service
    }

    /// Handle on the job's own batch, if it belongs to one
    pub fn batch(&self) -> Option<Batch> {
        self.job
            .bid
            .as_ref()
            .map(|bid| self.service.create(Some(bid.clone())))
    }

    /// Context rooted at the job's batch
    ///
    /// Enqueueing through it grows the same batch; `with_jobs` on it opens
    /// a child batch whose parent is the job's batch.
    pub fn batch_context(&self) -> BatchContext {
        match &self.job.bid {
            Some(bid) => self.service.context_for(bid),
            None => self.service.root_context(),
        }
    }

    /// False if the job's batch or any ancestor was invalidated
    pub async fn valid_within_batch(&self) -> Result<bool> {
        self.batch_context().valid_within_batch().await
    }
}

/// Job type -> handler
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose callback job type runs the given callbacks
    pub fn with_callbacks(callbacks: CallbackRegistry) -> Self {
        let mut registry = Self::new();
        registry.register(CALLBACK_JOB_TYPE, CallbackRunner::new(callbacks));
        registry
    }

    /// Register (or replace) the handler for `job_type`
    pub fn register(
        &mut self,
        job_type: impl Into<String>,
        handler: impl JobHandler + 'static,
    ) -> &mut Self {
        self.handlers.insert(job_type.into(), Arc::new(handler));
        self
    }

    pub fn resolve(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}
