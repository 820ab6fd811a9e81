// Retry policy for failed job attempts
use crate::domain::{Job, JobState};
use crate::port::TimeProvider;
use std::sync::Arc;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the job (with backoff delay in ms)
    Retry(i64),
    /// Do not retry, job has failed permanently
    Failed,
}

/// Exponential backoff bounded by `max_attempts`
///
/// Only the terminal outcome of a job is reported to its batch, so an attempt
/// that will be retried leaves the batch counters untouched.
pub struct RetryPolicy {
    time_provider: Arc<dyn TimeProvider>,
    base_delay_ms: i64,
}

impl RetryPolicy {
    pub fn new(time_provider: Arc<dyn TimeProvider>, base_delay_ms: i64) -> Self {
        Self {
            time_provider,
            base_delay_ms,
        }
    }

    /// Decide what happens after a failed attempt
    ///
    /// `job.attempts` already counts the attempt that just failed.
    /// delay = base_delay * backoff_factor ^ (attempts - 1), with ±10% jitter
    pub fn should_retry(&self, job: &Job) -> RetryDecision {
        if job.attempts >= job.max_attempts {
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::Failed;
        }

        let exponent = (job.attempts - 1).max(0);
        let base_delay_ms = self.base_delay_ms as f64 * job.backoff_factor.powi(exponent);

        // Seeded by the job id so the same job always gets the same jitter
        let jitter_seed = job.id.chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0);

        let delay_ms = (base_delay_ms * jitter_factor) as i64;

        info!(
            job_id = %job.id,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            delay_ms,
            "Scheduling retry"
        );

        RetryDecision::Retry(delay_ms)
    }

    /// Put the job back in the queue, available after `delay_ms`
    pub fn prepare_for_retry(&self, job: &mut Job, delay_ms: i64) {
        job.state = JobState::Queued;
        job.started_at = None;
        job.available_at = self.time_provider.now_millis() + delay_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobPayload, JobType};

    struct FixedTime(i64);

    impl TimeProvider for FixedTime {
        fn now_millis(&self) -> i64 {
            self.0
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Arc::new(FixedTime(10_000)), 1000)
    }

    fn job_after_attempts(attempts: i32) -> Job {
        let mut job = Job::new(
            "job-a",
            0,
            "default",
            JobType::new("TestWorker"),
            JobPayload::new(serde_json::json!({})),
        );
        job.attempts = attempts;
        job.state = JobState::Running;
        job
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let RetryDecision::Retry(first) = policy().should_retry(&job_after_attempts(1)) else {
            panic!("expected retry");
        };
        let RetryDecision::Retry(second) = policy().should_retry(&job_after_attempts(2)) else {
            panic!("expected retry");
        };

        assert!((900..=1100).contains(&first));
        assert!((second - first * 2).abs() <= 1);
    }

    #[test]
    fn test_max_attempts_is_terminal() {
        assert_eq!(policy().should_retry(&job_after_attempts(3)), RetryDecision::Failed);
    }

    #[test]
    fn test_prepare_for_retry_schedules_job() {
        let mut job = job_after_attempts(1);
        job.started_at = Some(5);
        policy().prepare_for_retry(&mut job, 1500);

        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.started_at, None);
        assert_eq!(job.available_at, 11_500);
        assert_eq!(job.attempts, 1);
    }
}
