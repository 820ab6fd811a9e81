// Enqueue request and job construction

use super::config::DEFAULT_MAX_ATTEMPTS;
use crate::domain::{Job, JobPayload, JobType};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, TimeProvider};
use serde::{Deserialize, Serialize};

/// Maximum queue name length
pub const MAX_QUEUE_NAME_LEN: usize = 64;

/// Maximum nesting depth accepted in job payloads
pub const MAX_PAYLOAD_DEPTH: usize = 32;

/// Request to schedule one job on the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub job_type: String,
    pub queue: String,
    pub payload: serde_json::Value,

    #[serde(default)]
    pub max_attempts: Option<i32>,
}

impl EnqueueRequest {
    pub fn new(
        job_type: impl Into<String>,
        queue: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            job_type: job_type.into(),
            queue: queue.into(),
            payload,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Queue names: non-empty, bounded, `[A-Za-z0-9_:.-]`
pub fn validate_queue_name(queue: &str) -> Result<()> {
    if queue.is_empty() {
        return Err(AppError::Validation("Queue name cannot be empty".to_string()));
    }
    if queue.len() > MAX_QUEUE_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Queue name too long ({} > {})",
            queue.len(),
            MAX_QUEUE_NAME_LEN
        )));
    }
    if !queue
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))
    {
        return Err(AppError::Validation(format!(
            "Queue name must be alphanumeric (plus _ - : .): {}",
            queue
        )));
    }
    Ok(())
}

/// Validate an enqueue request before any store or transport call
pub fn validate_request(req: &EnqueueRequest) -> Result<()> {
    validate_queue_name(&req.queue)?;

    if req.job_type.trim().is_empty() {
        return Err(AppError::Validation("Job type cannot be empty".to_string()));
    }

    if let Some(max_attempts) = req.max_attempts {
        if max_attempts < 1 {
            return Err(AppError::Validation(format!(
                "max_attempts out of range: {}",
                max_attempts
            )));
        }
    }

    if json_depth(&req.payload) > MAX_PAYLOAD_DEPTH {
        return Err(AppError::Validation(format!(
            "Payload too deeply nested (max depth {})",
            MAX_PAYLOAD_DEPTH
        )));
    }

    Ok(())
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Build a job with injected id and timestamp
///
/// # Arguments
///
/// * `id_provider` - ID generator (injected for determinism)
/// * `time_provider` - Time provider (injected for determinism)
/// * `req` - Enqueue request
pub fn build_job(
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    req: EnqueueRequest,
) -> Result<Job> {
    validate_request(&req)?;

    let mut job = Job::new(
        id_provider.generate_id(),
        time_provider.now_millis(),
        req.queue,
        JobType::new(req.job_type),
        JobPayload::new(req.payload),
    );
    job.max_attempts = req.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);

    Ok(job)
}
