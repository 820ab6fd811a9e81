// Callback invocation payload

use super::batch::{BatchEvent, BatchId};
use serde::{Deserialize, Serialize};

/// Job type reserved for callback invocation jobs
pub const CALLBACK_JOB_TYPE: &str = "tally::batch_callback";

/// Payload of one callback-invocation job, built when an event fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackInvocation {
    pub callback_type: String,
    pub event: BatchEvent,
    pub options: serde_json::Value,
    pub bid: BatchId,
    /// Carried for callbacks that want to signal the enclosing batch
    pub parent_bid: Option<BatchId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invocation_wire_shape() {
        let invocation = CallbackInvocation {
            callback_type: "SampleCallback".to_string(),
            event: BatchEvent::Complete,
            options: json!({"a": "b"}),
            bid: BatchId::new("bid1").unwrap(),
            parent_bid: None,
        };

        let value = serde_json::to_value(&invocation).unwrap();
        assert_eq!(
            value,
            json!({
                "callback_type": "SampleCallback",
                "event": "complete",
                "options": {"a": "b"},
                "bid": "bid1",
                "parent_bid": null
            })
        );
    }

    #[test]
    fn test_invocation_rejects_empty_bid() {
        let raw = json!({
            "callback_type": "X",
            "event": "success",
            "options": {},
            "bid": "",
            "parent_bid": null
        });
        assert!(serde_json::from_value::<CallbackInvocation>(raw).is_err());
    }
}
