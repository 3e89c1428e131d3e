// Queue Backend Port
// SQS semantics: long poll, batch receive, visibility timeout, receipt handles

use crate::domain::{QueueName, RawMessage};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Parameters of a single receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest {
    /// Upper bound on messages returned (1..=10)
    pub max_messages: usize,
    /// 0 = short poll, > 0 = long poll, None = queue default
    pub wait_time_seconds: Option<u32>,
    /// Overrides the queue's visibility timeout for this delivery
    pub visibility_timeout_seconds: Option<u32>,
}

impl ReceiveRequest {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages,
            wait_time_seconds: None,
            visibility_timeout_seconds: None,
        }
    }
}

/// Queue backend client
///
/// Errors are expected to be `AppError::BackendUnavailable` for transport
/// problems and `AppError::InvalidState` for stale receipt handles.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Look up the physical URL of a queue owned by `account_id`
    ///
    /// Returns None if the backend does not know the queue.
    async fn queue_url(&self, queue: &QueueName, account_id: &str) -> Result<Option<String>>;

    /// Receive up to `request.max_messages`; empty after the poll wait elapses
    async fn receive_batch(&self, queue_url: &str, request: ReceiveRequest) -> Result<Vec<RawMessage>>;

    /// Delete a delivered message, stopping redelivery
    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<()>;

    /// Send a message, returning the backend message id
    async fn send(
        &self,
        queue_url: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String>;

    /// Reset the remaining invisibility of a delivered message
    async fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout_seconds: u32,
    ) -> Result<()>;
}
