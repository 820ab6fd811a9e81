// Batch Domain Model

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Prefix of every key owned by a batch record
pub const RECORD_KEY_PREFIX: &str = "BID-";

/// Field names of the `BID-<bid>` hash
pub mod field {
    pub const DESCRIPTION: &str = "description";
    pub const CALLBACK_QUEUE: &str = "callback_queue";
    pub const PENDING: &str = "pending";
    pub const TOTAL: &str = "total";
    pub const INVALID: &str = "invalid";
    pub const PARENT_BID: &str = "parent_bid";
    pub const CREATED_AT: &str = "created_at";
}

/// Batch identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BatchId(String);

impl BatchId {
    /// Wrap a caller-supplied id (non-empty, no whitespace)
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidBatchId(id));
        }
        Ok(Self(id))
    }

    /// Generated tokens are valid by construction
    pub(crate) fn from_token(token: String) -> Self {
        debug_assert!(!token.is_empty() && !token.chars().any(char::is_whitespace));
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hash holding counters, flags and metadata
    pub fn record_key(&self) -> String {
        format!("{}{}", RECORD_KEY_PREFIX, self.0)
    }

    /// Set of failed job ids
    pub fn failed_key(&self) -> String {
        format!("{}{}-failed", RECORD_KEY_PREFIX, self.0)
    }

    /// List of serialized callback descriptors for one event (newest first)
    pub fn callbacks_key(&self, event: BatchEvent) -> String {
        format!("{}{}-callbacks-{}", RECORD_KEY_PREFIX, self.0, event)
    }

    /// Every key owned by this batch (used for terminal cleanup)
    pub fn all_keys(&self) -> Vec<String> {
        let mut keys = vec![self.record_key(), self.failed_key()];
        keys.extend(BatchEvent::ALL.iter().map(|e| self.callbacks_key(*e)));
        keys
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BatchId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<BatchId> for String {
    fn from(bid: BatchId) -> Self {
        bid.0
    }
}

impl FromStr for BatchId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Lifecycle events a batch can fire (each at most once)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchEvent {
    /// Every job reported an outcome
    Complete,
    /// Every job reported success; terminal, triggers record cleanup
    Success,
}

impl BatchEvent {
    pub const ALL: [BatchEvent; 2] = [BatchEvent::Complete, BatchEvent::Success];

    /// Also the name of the fired-flag field in the record hash
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchEvent::Complete => "complete",
            BatchEvent::Success => "success",
        }
    }
}

impl fmt::Display for BatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchEvent {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "complete" => Ok(BatchEvent::Complete),
            "success" => Ok(BatchEvent::Success),
            other => Err(DomainError::UnknownEvent(other.to_string())),
        }
    }
}

/// Registered callback: a stable type name plus free-form options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackDescriptor {
    pub callback_type: String,
    #[serde(default = "empty_options")]
    pub options: serde_json::Value,
}

fn empty_options() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl CallbackDescriptor {
    pub fn new(callback_type: impl Into<String>, options: serde_json::Value) -> Self {
        let options = if options.is_null() {
            empty_options()
        } else {
            options
        };
        Self {
            callback_type: callback_type.into(),
            options,
        }
    }
}

/// Point-in-time view of a batch record
///
/// Fields are read from independent store operations, so `pending` and `total`
/// may be momentarily inconsistent with each other under concurrent updates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStatus {
    pub bid: BatchId,
    pub description: Option<String>,
    pub callback_queue: Option<String>,
    pub total: i64,
    /// Raw counter; negative after duplicate/late reports
    pub pending: i64,
    pub failures: usize,
    pub failed_job_ids: Vec<String>,
    pub parent_bid: Option<BatchId>,
    pub created_at: Option<i64>,
    pub invalid: bool,
    pub complete_fired: bool,
    pub success_fired: bool,
}

impl BatchStatus {
    /// Build a status from the raw record hash and failed-id set
    pub fn from_fields(
        bid: BatchId,
        fields: &HashMap<String, String>,
        failed_job_ids: Vec<String>,
    ) -> Result<Self> {
        let parent_bid = fields
            .get(field::PARENT_BID)
            .map(|p| BatchId::new(p.as_str()))
            .transpose()?;

        Ok(Self {
            bid,
            description: fields.get(field::DESCRIPTION).cloned(),
            callback_queue: fields.get(field::CALLBACK_QUEUE).cloned(),
            total: parse_counter(fields, field::TOTAL)?,
            pending: parse_counter(fields, field::PENDING)?,
            failures: failed_job_ids.len(),
            failed_job_ids,
            parent_bid,
            created_at: fields
                .get(field::CREATED_AT)
                .and_then(|v| v.parse::<i64>().ok()),
            invalid: parse_flag(fields, field::INVALID),
            complete_fired: parse_flag(fields, BatchEvent::Complete.as_str()),
            success_fired: parse_flag(fields, BatchEvent::Success.as_str()),
        })
    }

    /// Pending clamped at zero, for display and dispatch decisions
    pub fn pending_clamped(&self) -> i64 {
        self.pending.max(0)
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.pending <= 0
    }
}

/// Missing counter fields read as zero (lazy record)
pub fn parse_counter(fields: &HashMap<String, String>, name: &str) -> Result<i64> {
    match fields.get(name) {
        None => Ok(0),
        Some(raw) => raw.parse::<i64>().map_err(|_| DomainError::CorruptCounter {
            field: name.to_string(),
            value: raw.clone(),
        }),
    }
}

/// Flags are stored as "true"/"1"; anything else reads as unset
pub fn parse_flag(fields: &HashMap<String, String>, name: &str) -> bool {
    matches!(fields.get(name).map(String::as_str), Some("true") | Some("1"))
}
