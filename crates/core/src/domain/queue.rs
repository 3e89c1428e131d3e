// Queue Name Domain Model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix of the sibling queue that holds delayed retries
pub const RETRY_SUFFIX: &str = "_retryq";

/// Suffix of the dead-letter queue derived for a queue
pub const DEAD_LETTER_SUFFIX: &str = "_dlq";

/// Maximum queue name length accepted by SQS
const MAX_QUEUE_NAME_LEN: usize = 80;

/// Logical queue identifier
///
/// Opaque to the consumer; physical location is decided by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Build a queue name, rejecting names SQS would refuse
    pub fn parse(s: impl Into<String>) -> super::error::Result<Self> {
        let s = s.into();
        let valid_chars = s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if s.is_empty() || s.len() > MAX_QUEUE_NAME_LEN || !valid_chars {
            return Err(super::DomainError::InvalidQueueName(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_retry_queue(&self) -> bool {
        self.0.ends_with(RETRY_SUFFIX)
    }

    pub fn is_dead_letter_queue(&self) -> bool {
        self.0.ends_with(DEAD_LETTER_SUFFIX)
    }

    /// The queue this one serves: strips a retry or dead-letter suffix
    pub fn parent_queue(&self) -> QueueName {
        let base = self
            .0
            .strip_suffix(RETRY_SUFFIX)
            .or_else(|| self.0.strip_suffix(DEAD_LETTER_SUFFIX))
            .unwrap_or(&self.0);
        QueueName::new(base)
    }

    /// Sibling retry queue (`name_retryq`), idempotent
    pub fn retry_queue(&self) -> QueueName {
        if self.is_retry_queue() {
            return self.clone();
        }
        QueueName::new(format!("{}{}", self.parent_queue().0, RETRY_SUFFIX))
    }

    /// Dead-letter queue under the default naming (`name_dlq`), idempotent
    pub fn dead_letter_queue(&self) -> QueueName {
        if self.is_dead_letter_queue() {
            return self.clone();
        }
        let base = self.0.strip_suffix(RETRY_SUFFIX).unwrap_or(&self.0);
        QueueName::new(format!("{}{}", base, DEAD_LETTER_SUFFIX))
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for QueueName {
    fn from(s: String) -> Self {
        Self(s)
    }
}
