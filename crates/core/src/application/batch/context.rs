// Execution context: explicit stack of active batch frames
//
// A context value is passed down the call chain instead of living in
// thread-local state. Pushing a frame yields a new context; the caller's
// context is untouched, so leaving a scope (by return, error or drop)
// restores the previous frame.

use super::{Batch, BatchService, EnqueueRequest};
use crate::domain::{field, BatchId, JobId};
use crate::error::{AppError, Result};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

struct Frame {
    batch: Batch,
    previous: Option<Arc<Frame>>,
}

/// Stack of active batches for one logical task
#[derive(Clone)]
pub struct BatchContext {
    service: BatchService,
    frame: Option<Arc<Frame>>,
}

impl BatchContext {
    pub(crate) fn root(service: BatchService) -> Self {
        Self {
            service,
            frame: None,
        }
    }

    /// New context with `batch` as the innermost frame (no store writes)
    pub(crate) fn push(&self, batch: Batch) -> Self {
        Self {
            service: self.service.clone(),
            frame: Some(Arc::new(Frame {
                batch,
                previous: self.frame.clone(),
            })),
        }
    }

    /// Innermost active batch
    pub fn current_batch(&self) -> Option<&Batch> {
        self.frame.as_deref().map(|f| &f.batch)
    }

    /// Number of active frames
    pub fn depth(&self) -> usize {
        self.frames().count()
    }

    fn frames(&self) -> impl Iterator<Item = &Frame> {
        std::iter::successors(self.frame.as_deref(), |f| f.previous.as_deref())
    }

    /// Run `body` with `batch` as the active batch
    ///
    /// The first push of a batch stamps `created_at` on its record; only that
    /// push records the enclosing batch (if any) as `parent_bid`, so the
    /// parent pointer is written at most once.
    pub async fn with_jobs<F, Fut, T>(&self, batch: &Batch, body: F) -> Result<T>
    where
        F: FnOnce(BatchContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.register_frame(batch).await?;

        let scoped = self.push(batch.clone());
        debug!(bid = %batch.bid(), depth = scoped.depth(), "Entering batch scope");
        let result = body(scoped).await;
        debug!(bid = %batch.bid(), ok = result.is_ok(), "Leaving batch scope");
        result
    }

    async fn register_frame(&self, batch: &Batch) -> Result<()> {
        let key = batch.bid().record_key();
        let now = self.service.now_millis().to_string();
        let first_push = self
            .service
            .store
            .hash_set_nx(&key, field::CREATED_AT, &now)
            .await?;
        if !first_push {
            return Ok(());
        }
        self.service.touch(&key).await?;

        if let Some(parent) = self.current_batch() {
            if parent.bid() != batch.bid() {
                self.service
                    .store
                    .hash_set_nx(&key, field::PARENT_BID, parent.bid().as_str())
                    .await?;
                debug!(bid = %batch.bid(), parent_bid = %parent.bid(), "Batch nested");
            }
        }
        Ok(())
    }

    /// Enqueue a job into the innermost batch
    ///
    /// Counts the job before submitting it so a fast completion report can
    /// never drive `pending` to zero early. Fails with `Usage` outside a scope.
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<JobId> {
        let batch = self.current_batch().ok_or_else(|| {
            AppError::Usage("enqueue requires an active batch scope".to_string())
        })?;

        let job = self.service.build_job(req)?.with_batch(batch.bid().clone());
        self.service.increment_counts(batch.bid()).await?;
        self.service.transport.submit(&job).await?;

        debug!(bid = %batch.bid(), job_id = %job.id, queue = %job.queue, "Batch job enqueued");
        Ok(job.id)
    }

    /// Batches from the innermost frame up to the root
    ///
    /// Active frames come first; past the outermost frame the walk follows
    /// stored `parent_bid` pointers. Bounded by `max_chain_depth` and cycle-safe.
    pub async fn current_chain(&self) -> Result<Vec<BatchId>> {
        let max_depth = self.service.config.max_chain_depth;
        let mut chain: Vec<BatchId> = Vec::new();
        let mut seen: HashSet<BatchId> = HashSet::new();

        for frame in self.frames() {
            let bid = frame.batch.bid();
            if seen.insert(bid.clone()) {
                chain.push(bid.clone());
            }
        }

        let mut next = match chain.last() {
            Some(outermost) => self.service.parent_of(outermost).await?,
            None => None,
        };
        while let Some(bid) = next {
            if chain.len() >= max_depth {
                warn!(bid = %bid, max_depth, "Batch ancestor chain truncated");
                break;
            }
            if !seen.insert(bid.clone()) {
                warn!(bid = %bid, "Cycle in batch parent pointers");
                break;
            }
            next = self.service.parent_of(&bid).await?;
            chain.push(bid);
        }

        Ok(chain)
    }

    /// False if any batch in the chain is invalidated; true outside any batch
    pub async fn valid_within_batch(&self) -> Result<bool> {
        for bid in self.current_chain().await? {
            if self.service.is_invalid(&bid).await? {
                debug!(bid = %bid, "Job belongs to an invalidated batch");
                return Ok(false);
            }
        }
        Ok(true)
    }
}
