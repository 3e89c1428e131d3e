// Dead-Letter Queue Naming Policy

use super::QueueName;
use serde::{Deserialize, Serialize};

/// Naming strategy for dead-letter queues
///
/// A global override configured on the resolver takes precedence over
/// either variant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeadLetterQueuePolicy {
    /// `name` minus any `_retryq`, plus `_dlq`
    #[default]
    Default,
    /// One shared dead-letter queue for every input
    Static { queue: QueueName },
}

impl DeadLetterQueuePolicy {
    pub fn dead_letter_queue_for(&self, queue: &QueueName) -> QueueName {
        match self {
            DeadLetterQueuePolicy::Default => queue.dead_letter_queue(),
            DeadLetterQueuePolicy::Static { queue: dlq } => dlq.clone(),
        }
    }
}
