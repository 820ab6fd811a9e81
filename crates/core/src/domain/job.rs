// Job Domain Model (transport envelope)

use super::batch::BatchId;
use serde::{Deserialize, Serialize};

/// Job ID (UUID v4)
pub type JobId = String;

/// Queue identifier
pub type QueueId = String;

/// Job State
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "QUEUED"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Done => write!(f, "DONE"),
            JobState::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = super::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(JobState::Queued),
            "RUNNING" => Ok(JobState::Running),
            "DONE" => Ok(JobState::Done),
            "FAILED" => Ok(JobState::Failed),
            other => Err(super::DomainError::ValidationError(format!(
                "unknown job state {}",
                other
            ))),
        }
    }
}

/// Job Type (handler lookup key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobType(String);

impl JobType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Job Payload (JSON serializable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Job Entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueId,
    pub job_type: JobType,
    pub payload: JobPayload,

    /// Owning batch; the completion report is routed back with it
    pub bid: Option<BatchId>,

    pub state: JobState,

    // Retry bookkeeping (attempts counts executions started)
    pub attempts: i32,
    pub max_attempts: i32,
    pub backoff_factor: f64,

    pub created_at: i64, // epoch ms
    pub available_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl Job {
    /// Create a test job with deterministic ID and timestamp.
    ///
    /// Uses a simple counter for deterministic test IDs (test-1, test-2, ...).
    ///
    /// **Note**: This method should only be used in tests. For production code,
    /// always inject ID and time via providers.
    pub fn new_test(queue: impl Into<String>, job_type: JobType, payload: JobPayload) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self::new(
            format!("test-{}", counter),
            (counter * 1000) as i64,
            queue,
            job_type,
            payload,
        )
    }

    /// Create a new Job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `queue` - Queue name
    /// * `job_type` - Handler key
    /// * `payload` - Job arguments
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        queue: impl Into<String>,
        job_type: JobType,
        payload: JobPayload,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            job_type,
            payload,
            bid: None,
            state: JobState::Queued,
            attempts: 0,
            max_attempts: 3,
            backoff_factor: 2.0,
            created_at,
            available_at: created_at,
            started_at: None,
            finished_at: None,
        }
    }

    /// Attach the job to a batch
    pub fn with_batch(mut self, bid: BatchId) -> Self {
        self.bid = Some(bid);
        self
    }

    /// Transition to Running state with explicit timestamp (counts one attempt)
    pub fn start(&mut self, now_millis: i64) -> crate::domain::error::Result<()> {
        if self.state != JobState::Queued {
            return Err(crate::domain::error::DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "RUNNING".to_string(),
            });
        }
        self.state = JobState::Running;
        self.attempts += 1;
        self.started_at = Some(now_millis);
        Ok(())
    }

    /// Transition to Done state with explicit timestamp
    pub fn complete(&mut self, now_millis: i64) -> crate::domain::error::Result<()> {
        if self.state != JobState::Running {
            return Err(crate::domain::error::DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "DONE".to_string(),
            });
        }
        self.state = JobState::Done;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Mark as Failed with explicit timestamp
    pub fn fail(&mut self, now_millis: i64) {
        self.state = JobState::Failed;
        self.finished_at = Some(now_millis);
    }

    /// Is the job eligible for popping at `now_millis`
    pub fn is_available(&self, now_millis: i64) -> bool {
        self.state == JobState::Queued && self.available_at <= now_millis
    }
}
