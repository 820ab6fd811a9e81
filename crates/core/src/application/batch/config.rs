// Batch engine configuration (No magic values)

use crate::error::{AppError, Result};
use std::time::Duration;

/// Queue callback-invocation jobs go to when a batch sets none
pub const DEFAULT_CALLBACK_QUEUE: &str = "default";

/// Upper bound on ancestor walks (guards against corrupt parent cycles)
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 64;

/// Executions allowed per job before it fails terminally
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Batch engine settings
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub default_callback_queue: String,

    /// Applied to batch keys on every write that grows them; None keeps records forever
    pub record_ttl: Option<Duration>,

    pub max_chain_depth: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_callback_queue: DEFAULT_CALLBACK_QUEUE.to_string(),
            record_ttl: None,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        super::enqueue::validate_queue_name(&self.default_callback_queue)
            .map_err(|e| AppError::Config(format!("default_callback_queue: {}", e)))?;

        if self.max_chain_depth == 0 {
            return Err(AppError::Config(
                "max_chain_depth must be at least 1".to_string(),
            ));
        }

        if matches!(self.record_ttl, Some(ttl) if ttl.is_zero()) {
            return Err(AppError::Config("record_ttl must be positive".to_string()));
        }

        Ok(())
    }
}
