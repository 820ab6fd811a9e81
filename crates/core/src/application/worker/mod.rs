// Worker - Job execution loop

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::batch::{BatchService, JobOutcome};
use crate::application::handler::{HandlerRegistry, JobContext};
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::Job;
use crate::error::Result;
use crate::port::{JobQueue, TimeProvider};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Pulls jobs from one queue and runs their handlers
///
/// A job's batch hears about it only once, when its outcome is terminal:
/// success, or failure after the retry policy gives up.
pub struct Worker {
    queue: String,
    job_queue: Arc<dyn JobQueue>,
    handlers: Arc<HandlerRegistry>,
    service: BatchService,
    retry_policy: Arc<RetryPolicy>,
    time_provider: Arc<dyn TimeProvider>,
}

impl Worker {
    pub fn new(
        queue: impl Into<String>,
        job_queue: Arc<dyn JobQueue>,
        handlers: Arc<HandlerRegistry>,
        service: BatchService,
        retry_policy: Arc<RetryPolicy>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            queue: queue.into(),
            job_queue,
            handlers,
            service,
            retry_policy,
            time_provider,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(queue = %self.queue, "Worker started");
        loop {
            if shutdown.is_shutdown() {
                info!(queue = %self.queue, "Worker shutting down");
                break;
            }
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = sleep(IDLE_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!(queue = %self.queue, "Worker interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "Worker error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!(queue = %self.queue, "Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }
        info!(queue = %self.queue, "Worker stopped");
        Ok(())
    }

    /// Process next job from queue (returns true if a job was processed)
    pub async fn process_next_job(&self) -> Result<bool> {
        // Already RUNNING with the attempt counted
        let mut job = match self.job_queue.pop_next(&self.queue).await? {
            Some(j) => j,
            None => return Ok(false),
        };

        let handler = match self.handlers.resolve(job.job_type.as_str()) {
            Some(h) => h,
            None => {
                error!(
                    job_id = %job.id,
                    job_type = %job.job_type.as_str(),
                    "No handler registered for job type"
                );
                self.finish(&mut job, JobOutcome::Failure).await?;
                return Ok(true);
            }
        };

        debug!(job_id = %job.id, job_type = %job.job_type.as_str(), attempt = job.attempts, "Processing job");

        // Spawned so a panicking handler cannot take the worker down
        let ctx = JobContext::new(job.clone(), self.service.clone());
        let execution = tokio::task::spawn(async move { handler.perform(&ctx).await }).await;

        match execution {
            Ok(Ok(())) => {
                self.finish(&mut job, JobOutcome::Success).await?;
            }
            Ok(Err(e)) => match self.retry_policy.should_retry(&job) {
                RetryDecision::Retry(delay_ms) => {
                    warn!(
                        job_id = %job.id,
                        attempt = job.attempts,
                        delay_ms,
                        error = %e,
                        "Job failed, retrying"
                    );
                    self.retry_policy.prepare_for_retry(&mut job, delay_ms);
                    self.job_queue.requeue(&job).await?;
                }
                RetryDecision::Failed => {
                    error!(job_id = %job.id, error = %e, "Job failed after max attempts");
                    self.finish(&mut job, JobOutcome::Failure).await?;
                }
            },
            Err(join_err) => {
                // Panics are not retried
                if join_err.is_panic() {
                    error!(job_id = %job.id, "Job panicked");
                } else {
                    error!(job_id = %job.id, "Job cancelled");
                }
                self.finish(&mut job, JobOutcome::Failure).await?;
            }
        }
        Ok(true)
    }

    /// Report a terminal outcome to the job's batch, then persist it
    ///
    /// If the report cannot be delivered the job is requeued instead, so its
    /// outcome is counted when it runs again.
    async fn finish(&self, job: &mut Job, outcome: JobOutcome) -> Result<()> {
        if let Some(bid) = job.bid.clone() {
            if let Err(e) = self.service.report_outcome(&bid, &job.id, outcome).await {
                error!(job_id = %job.id, bid = %bid, error = %e, "Batch report failed, requeueing job");
                self.retry_policy
                    .prepare_for_retry(job, REPORT_FAILURE_REQUEUE_DELAY_MS);
                self.job_queue.requeue(job).await?;
                return Err(e);
            }
        }

        let now = self.time_provider.now_millis();
        match outcome {
            JobOutcome::Success => {
                job.complete(now)?;
                self.job_queue.mark_done(job).await?;
                info!(job_id = %job.id, "Job completed");
            }
            JobOutcome::Failure => {
                job.fail(now);
                self.job_queue.mark_failed(job).await?;
                info!(job_id = %job.id, attempts = job.attempts, "Job failed");
            }
        }
        Ok(())
    }
}
