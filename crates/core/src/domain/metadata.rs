// Message & Job Metadata Domain Model

use super::QueueName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reserved message attribute carrying [`JobMetadata`] as JSON
pub const METADATA_ATTRIBUTE: &str = "_jobqueue-metadata";

/// Backend system attribute names (SQS spelling)
pub const SENT_TIMESTAMP: &str = "SentTimestamp";
pub const APPROXIMATE_RECEIVE_COUNT: &str = "ApproximateReceiveCount";
pub const APPROXIMATE_FIRST_RECEIVE_TIMESTAMP: &str = "ApproximateFirstReceiveTimestamp";

/// A message exactly as the backend delivered it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub message_id: String,
    pub body: String,
    /// Opaque credential for this delivery only
    pub receipt_handle: String,
    /// Backend-populated attributes (timestamps, receive count)
    pub system_attributes: HashMap<String, String>,
    /// Producer-populated attributes, including the reserved metadata one
    pub message_attributes: HashMap<String, String>,
}

impl RawMessage {
    /// Epoch millis at which the backend accepted the message
    pub fn sent_timestamp(&self) -> Option<i64> {
        self.system_attributes.get(SENT_TIMESTAMP)?.parse().ok()
    }

    /// How many times the message has been handed out, this delivery included
    pub fn receive_count(&self) -> Option<u32> {
        self.system_attributes
            .get(APPROXIMATE_RECEIVE_COUNT)?
            .parse()
            .ok()
    }
}

/// Job metadata written by producers inside this system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_queue: Option<QueueName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotence_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_trace_id: Option<String>,
}

impl JobMetadata {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
