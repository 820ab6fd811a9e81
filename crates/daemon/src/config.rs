// Worker configuration from environment variables

use std::time::Duration;
use tally_core::application::worker::constants::DEFAULT_RETRY_BASE_DELAY_MS;
use tally_core::application::BatchConfig;
use tally_core::{AppError, Result};

pub const DEFAULT_DB_PATH: &str = "~/.tally/batches.db";
pub const DEFAULT_QUEUE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// SQLite file holding the job queue (and the batch store unless Redis is used)
    pub db_path: String,
    /// Batch store on Redis when set
    pub redis_url: Option<String>,
    pub queues: Vec<String>,
    pub retry_base_delay_ms: i64,
    pub log_format: LogFormat,
    pub batch: BatchConfig,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source (tests pass a map)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = lookup("TALLY_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let db_path = shellexpand::tilde(&db_path).into_owned();

        let redis_url = lookup("TALLY_REDIS_URL").filter(|url| !url.trim().is_empty());

        let queues: Vec<String> = lookup("TALLY_QUEUES")
            .unwrap_or_else(|| DEFAULT_QUEUE.to_string())
            .split(',')
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if queues.is_empty() {
            return Err(AppError::Config("TALLY_QUEUES names no queue".to_string()));
        }

        let record_ttl = match lookup("TALLY_RECORD_TTL_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_number(
                "TALLY_RECORD_TTL_SECS",
                &raw,
            )?)),
            None => None,
        };

        let retry_base_delay_ms = match lookup("TALLY_RETRY_BASE_DELAY_MS") {
            Some(raw) => parse_number("TALLY_RETRY_BASE_DELAY_MS", &raw)? as i64,
            None => DEFAULT_RETRY_BASE_DELAY_MS,
        };

        let log_format = match lookup("TALLY_LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "TALLY_LOG_FORMAT must be json or pretty, got {}",
                    other
                )))
            }
        };

        let batch = BatchConfig {
            record_ttl,
            ..BatchConfig::default()
        };
        batch.validate()?;

        Ok(Self {
            db_path,
            redis_url,
            queues,
            retry_base_delay_ms,
            log_format,
            batch,
        })
    }

    pub fn database_url(&self) -> String {
        if self.db_path.starts_with("sqlite:") {
            self.db_path.clone()
        } else {
            format!("sqlite://{}", self.db_path)
        }
    }
}

fn parse_number(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| AppError::Config(format!("{} must be a non-negative integer, got {}", name, raw)))
}
