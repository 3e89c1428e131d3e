// Job Queue Configuration
// Deserialized by the composition root; every field has a default

use crate::application::constants::MAX_RECEIVE_WAIT_SECS;
use crate::domain::{AllocationPolicy, DeadLetterQueuePolicy, DomainError, QueueName, MAX_BATCH_SIZE};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A queue owned by another account and/or region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalQueueConfig {
    pub account_id: String,
    /// Defaults to the service's own region
    #[serde(default)]
    pub region: Option<String>,
    /// Pre-bound physical URL; skips the backend lookup when set
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobQueueConfig {
    pub region: String,
    pub account_id: String,
    pub external_queues: HashMap<QueueName, ExternalQueueConfig>,

    pub dead_letter_policy: DeadLetterQueuePolicy,
    /// Overrides the policy for every queue when set
    pub global_dead_letter_queue: Option<QueueName>,

    pub receiver_policy: AllocationPolicy,

    /// Messages per receive call (1..=10)
    pub batch_size: usize,
    /// Concurrent handler executions per receiver
    pub worker_pool_size: usize,
    /// Jobs that may wait for a free worker per receiver
    pub worker_queue_capacity: usize,
    /// Long-poll wait for the lowest-priority queue of a receiver
    pub receive_wait_time_secs: u32,
    /// Gathering window of batch subscriptions; 0 hands off after one round of receives
    pub batch_wait_time_secs: u32,
    /// Per-receive visibility override; None keeps the queue's own setting
    pub visibility_timeout_secs: Option<u32>,
    /// Base visibility used when a job asks to retry with backoff
    pub default_visibility_timeout_secs: u32,
    /// Also poll `<queue>_retryq` behind each subscribed queue
    pub install_retry_queue: bool,

    pub flag_cache_ttl_ms: u64,
    pub poll_interval_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            region: "us-west-2".to_string(),
            account_id: "000000000000".to_string(),
            external_queues: HashMap::new(),
            dead_letter_policy: DeadLetterQueuePolicy::Default,
            global_dead_letter_queue: None,
            receiver_policy: AllocationPolicy::OneFlagOnly,
            batch_size: MAX_BATCH_SIZE,
            worker_pool_size: 4,
            worker_queue_capacity: 20,
            receive_wait_time_secs: 20,
            batch_wait_time_secs: 0,
            visibility_timeout_secs: None,
            default_visibility_timeout_secs: 30,
            install_retry_queue: true,
            flag_cache_ttl_ms: 1000,
            poll_interval_ms: 100,
            max_backoff_ms: 10_000,
        }
    }
}

impl JobQueueConfig {
    /// Reject settings that would make the consumer misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(DomainError::InvalidBatchSize(self.batch_size).into());
        }
        if self.worker_pool_size == 0 {
            return Err(AppError::Config("worker_pool_size must be > 0".to_string()));
        }
        if self.worker_queue_capacity < self.batch_size {
            return Err(AppError::Config(format!(
                "worker_queue_capacity ({}) must hold at least one batch ({})",
                self.worker_queue_capacity, self.batch_size
            )));
        }
        if self.receive_wait_time_secs > MAX_RECEIVE_WAIT_SECS {
            return Err(AppError::Config(format!(
                "receive_wait_time_secs must be <= {}",
                MAX_RECEIVE_WAIT_SECS
            )));
        }
        if self.region.is_empty() || self.account_id.is_empty() {
            return Err(AppError::Config("region and account_id are required".to_string()));
        }
        if self.max_backoff_ms < self.poll_interval_ms {
            return Err(AppError::Config(
                "max_backoff_ms must be >= poll_interval_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn flag_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.flag_cache_ttl_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}
