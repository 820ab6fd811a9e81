// Job Transport Port (Interface)
// Producer side (submit) and consumer side (pop/ack) of the external job queue

use crate::domain::Job;
use crate::error::Result;
use async_trait::async_trait;

/// Producer side: at-least-once delivery, no ordering across distinct jobs
#[async_trait]
pub trait JobTransport: Send + Sync {
    /// Enqueue a single job on `job.queue`
    async fn submit(&self, job: &Job) -> Result<()>;

    /// Enqueue several jobs on `queue` as one submission
    async fn submit_bulk(&self, jobs: &[Job], queue: &str) -> Result<()>;
}

/// Consumer side used by the worker loop
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Atomically claim the next available job (state -> RUNNING, attempts + 1)
    async fn pop_next(&self, queue: &str) -> Result<Option<Job>>;

    /// Persist a terminal success
    async fn mark_done(&self, job: &Job) -> Result<()>;

    /// Persist a terminal failure
    async fn mark_failed(&self, job: &Job) -> Result<()>;

    /// Put a job back (state QUEUED, `available_at` already scheduled)
    async fn requeue(&self, job: &Job) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::JobState;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// One call made against the transport
    #[derive(Debug, Clone)]
    pub enum Submission {
        Single(Job),
        Bulk { queue: String, jobs: Vec<Job> },
    }

    /// In-memory transport + queue that records every submission
    #[derive(Default)]
    pub struct InMemoryTransport {
        submissions: Mutex<Vec<Submission>>,
        jobs: Mutex<Vec<Job>>,
        unavailable: AtomicBool,
    }

    impl InMemoryTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent submission fail
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub fn submissions(&self) -> Vec<Submission> {
            self.submissions.lock().unwrap().clone()
        }

        /// Only the bulk submissions, as (queue, jobs)
        pub fn bulk_submissions(&self) -> Vec<(String, Vec<Job>)> {
            self.submissions
                .lock()
                .unwrap()
                .iter()
                .filter_map(|s| match s {
                    Submission::Bulk { queue, jobs } => Some((queue.clone(), jobs.clone())),
                    Submission::Single(_) => None,
                })
                .collect()
        }

        /// Current state of every job known to the queue
        pub fn jobs(&self) -> Vec<Job> {
            self.jobs.lock().unwrap().clone()
        }

        pub fn count_by_state(&self, state: JobState) -> usize {
            self.jobs
                .lock()
                .unwrap()
                .iter()
                .filter(|j| j.state == state)
                .count()
        }

        fn check(&self) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::Transport(
                    "in-memory transport unavailable".to_string(),
                ));
            }
            Ok(())
        }

        fn store_job(&self, job: &Job) {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.iter_mut().find(|j| j.id == job.id) {
                Some(existing) => *existing = job.clone(),
                None => jobs.push(job.clone()),
            }
        }
    }

    #[async_trait]
    impl JobTransport for InMemoryTransport {
        async fn submit(&self, job: &Job) -> Result<()> {
            self.check()?;
            self.submissions
                .lock()
                .unwrap()
                .push(Submission::Single(job.clone()));
            self.store_job(job);
            Ok(())
        }

        async fn submit_bulk(&self, jobs: &[Job], queue: &str) -> Result<()> {
            self.check()?;
            let jobs: Vec<Job> = jobs
                .iter()
                .cloned()
                .map(|mut j| {
                    j.queue = queue.to_string();
                    j
                })
                .collect();
            for job in &jobs {
                self.store_job(job);
            }
            self.submissions.lock().unwrap().push(Submission::Bulk {
                queue: queue.to_string(),
                jobs,
            });
            Ok(())
        }
    }

    #[async_trait]
    impl JobQueue for InMemoryTransport {
        async fn pop_next(&self, queue: &str) -> Result<Option<Job>> {
            let now = chrono::Utc::now().timestamp_millis();
            let mut jobs = self.jobs.lock().unwrap();
            let next = jobs
                .iter_mut()
                .filter(|j| j.queue == queue && j.is_available(now))
                .min_by_key(|j| j.created_at);
            match next {
                Some(job) => {
                    job.start(now)?;
                    Ok(Some(job.clone()))
                }
                None => Ok(None),
            }
        }

        async fn mark_done(&self, job: &Job) -> Result<()> {
            self.store_job(job);
            Ok(())
        }

        async fn mark_failed(&self, job: &Job) -> Result<()> {
            self.store_job(job);
            Ok(())
        }

        async fn requeue(&self, job: &Job) -> Result<()> {
            self.store_job(job);
            Ok(())
        }
    }
}
