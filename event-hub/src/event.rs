//! The event value delivered to subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::topic::Topic;

/// An immutable `{topic, payload}` pair.
///
/// Every matching subscriber receives its own clone, so payloads should stay
/// small.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Event {
    pub fn new(topic: Topic) -> Self {
        Self {
            topic,
            payload: None,
        }
    }

    pub fn with_payload(topic: Topic, payload: impl Into<Value>) -> Self {
        Self {
            topic,
            payload: Some(payload.into()),
        }
    }

    /// The payload as an unsigned integer, if it is one.
    pub fn payload_u64(&self) -> Option<u64> {
        self.payload.as_ref().and_then(Value::as_u64)
    }
}

impl From<Topic> for Event {
    fn from(topic: Topic) -> Self {
        Event::new(topic)
    }
}
