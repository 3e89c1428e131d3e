// In-memory queue backend with SQS delivery semantics
//
// - FIFO within a queue; a received message is invisible until its
//   visibility timeout elapses on the injected clock
// - every delivery gets a fresh receipt handle; only the latest is valid
// - long polls wake on send, otherwise return empty after the wait
use async_trait::async_trait;
use drover_core::domain::metadata::{
    APPROXIMATE_FIRST_RECEIVE_TIMESTAMP, APPROXIMATE_RECEIVE_COUNT, SENT_TIMESTAMP,
};
use drover_core::domain::{QueueName, RawMessage};
use drover_core::error::{AppError, Result};
use drover_core::port::{QueueBackend, ReceiveRequest, TimeProvider};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_ACCOUNT: &str = "000000000000";
const DEFAULT_VISIBILITY_TIMEOUT_SECS: u32 = 30;

/// Backend calls that can be made to fail on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOperation {
    Receive,
    Delete,
    Send,
    ChangeVisibility,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    attributes: HashMap<String, String>,
    sent_at_ms: i64,
    visible_at_ms: i64,
    receive_count: u32,
    first_received_at_ms: Option<i64>,
    receipt_handle: Option<String>,
}

struct QueueState {
    name: QueueName,
    visibility_timeout_secs: u32,
    messages: VecDeque<StoredMessage>,
    arrivals: Arc<Notify>,
}

pub struct InMemoryQueueBackend {
    time_provider: Arc<dyn TimeProvider>,
    queues: Mutex<HashMap<String, QueueState>>,
    failures: Mutex<HashMap<BackendOperation, usize>>,
}

impl InMemoryQueueBackend {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            time_provider,
            queues: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn url_for(account_id: &str, queue: &QueueName) -> String {
        format!("memory://{}/{}", account_id, queue)
    }

    /// Create a queue in the default account, returning its URL
    pub fn create_queue(&self, queue: &QueueName) -> String {
        self.create_queue_in(DEFAULT_ACCOUNT, queue, DEFAULT_VISIBILITY_TIMEOUT_SECS)
    }

    /// Create a queue owned by `account_id`; existing queues are kept as-is
    pub fn create_queue_in(
        &self,
        account_id: &str,
        queue: &QueueName,
        visibility_timeout_secs: u32,
    ) -> String {
        let url = Self::url_for(account_id, queue);
        self.queues
            .lock()
            .unwrap()
            .entry(url.clone())
            .or_insert_with(|| QueueState {
                name: queue.clone(),
                visibility_timeout_secs,
                messages: VecDeque::new(),
                arrivals: Arc::new(Notify::new()),
            });
        url
    }

    /// Make the next `times` calls of `operation` fail as unavailable
    pub fn push_failure(&self, operation: BackendOperation, times: usize) {
        *self.failures.lock().unwrap().entry(operation).or_insert(0) += times;
    }

    /// Messages in the default-account queue, visible or not
    pub fn message_count(&self, queue: &QueueName) -> usize {
        self.with_queue(queue, |state| state.messages.len())
    }

    /// Messages a receive would return right now
    pub fn visible_count(&self, queue: &QueueName) -> usize {
        let now = self.time_provider.now_millis();
        self.with_queue(queue, |state| {
            state
                .messages
                .iter()
                .filter(|m| m.visible_at_ms <= now)
                .count()
        })
    }

    /// Bodies in queue order
    pub fn bodies(&self, queue: &QueueName) -> Vec<String> {
        self.with_queue(queue, |state| {
            state.messages.iter().map(|m| m.body.clone()).collect()
        })
    }

    fn with_queue<T: Default>(&self, queue: &QueueName, f: impl FnOnce(&QueueState) -> T) -> T {
        self.queues
            .lock()
            .unwrap()
            .get(&Self::url_for(DEFAULT_ACCOUNT, queue))
            .map(f)
            .unwrap_or_default()
    }

    fn check_failure(&self, operation: BackendOperation) -> Result<()> {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(AppError::BackendUnavailable(format!(
                    "injected {:?} failure",
                    operation
                )))
            }
            _ => Ok(()),
        }
    }

    fn unknown_queue(url: &str) -> AppError {
        AppError::BackendUnavailable(format!("no queue at {}", url))
    }

    /// Deliver up to `max` visible messages, or return the queue's arrival signal
    fn take_visible(
        &self,
        url: &str,
        max: usize,
        visibility_override: Option<u32>,
    ) -> Result<(Vec<RawMessage>, Arc<Notify>)> {
        let now = self.time_provider.now_millis();
        let mut queues = self.queues.lock().unwrap();
        let state = queues.get_mut(url).ok_or_else(|| Self::unknown_queue(url))?;
        let timeout_ms =
            visibility_override.unwrap_or(state.visibility_timeout_secs) as i64 * 1000;

        let mut delivered = Vec::new();
        for message in state.messages.iter_mut() {
            if delivered.len() >= max {
                break;
            }
            if message.visible_at_ms > now {
                continue;
            }

            let receipt = format!("{}#{}", message.id, Uuid::new_v4());
            message.receive_count += 1;
            message.visible_at_ms = now + timeout_ms;
            message.receipt_handle = Some(receipt.clone());
            let first_received = *message.first_received_at_ms.get_or_insert(now);

            let system_attributes = HashMap::from([
                (SENT_TIMESTAMP.to_string(), message.sent_at_ms.to_string()),
                (
                    APPROXIMATE_RECEIVE_COUNT.to_string(),
                    message.receive_count.to_string(),
                ),
                (
                    APPROXIMATE_FIRST_RECEIVE_TIMESTAMP.to_string(),
                    first_received.to_string(),
                ),
            ]);
            delivered.push(RawMessage {
                message_id: message.id.clone(),
                body: message.body.clone(),
                receipt_handle: receipt,
                system_attributes,
                message_attributes: message.attributes.clone(),
            });
        }

        if !delivered.is_empty() {
            debug!(queue = %state.name, count = delivered.len(), "Delivered messages");
        }
        Ok((delivered, Arc::clone(&state.arrivals)))
    }

    /// Find the message currently delivered under `receipt_handle`
    fn with_receipt<T>(
        &self,
        url: &str,
        receipt_handle: &str,
        f: impl FnOnce(&mut VecDeque<StoredMessage>, usize) -> T,
    ) -> Result<T> {
        let mut queues = self.queues.lock().unwrap();
        let state = queues.get_mut(url).ok_or_else(|| Self::unknown_queue(url))?;
        let index = state
            .messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| {
                AppError::InvalidState(format!("stale or unknown receipt handle {}", receipt_handle))
            })?;
        Ok(f(&mut state.messages, index))
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn queue_url(&self, queue: &QueueName, account_id: &str) -> Result<Option<String>> {
        let url = Self::url_for(account_id, queue);
        Ok(self.queues.lock().unwrap().contains_key(&url).then_some(url))
    }

    async fn receive_batch(&self, queue_url: &str, request: ReceiveRequest) -> Result<Vec<RawMessage>> {
        self.check_failure(BackendOperation::Receive)?;
        let wait = Duration::from_secs(request.wait_time_seconds.unwrap_or(0) as u64);
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let (messages, arrivals) = self.take_visible(
                queue_url,
                request.max_messages,
                request.visibility_timeout_seconds,
            )?;
            let notified = arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !messages.is_empty() || tokio::time::Instant::now() >= deadline {
                return Ok(messages);
            }
            // Re-check after enabling so a send in between is not missed
            let (messages, _) = self.take_visible(
                queue_url,
                request.max_messages,
                request.visibility_timeout_seconds,
            )?;
            if !messages.is_empty() {
                return Ok(messages);
            }

            tokio::select! {
                _ = &mut notified => {},
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<()> {
        self.check_failure(BackendOperation::Delete)?;
        self.with_receipt(queue_url, receipt_handle, |messages, index| {
            messages.remove(index);
        })
    }

    async fn send(
        &self,
        queue_url: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String> {
        self.check_failure(BackendOperation::Send)?;
        let now = self.time_provider.now_millis();
        let id = Uuid::new_v4().to_string();

        let mut queues = self.queues.lock().unwrap();
        let state = queues
            .get_mut(queue_url)
            .ok_or_else(|| Self::unknown_queue(queue_url))?;
        state.messages.push_back(StoredMessage {
            id: id.clone(),
            body: body.to_string(),
            attributes: attributes.clone(),
            sent_at_ms: now,
            visible_at_ms: now,
            receive_count: 0,
            first_received_at_ms: None,
            receipt_handle: None,
        });
        state.arrivals.notify_waiters();
        Ok(id)
    }

    async fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout_seconds: u32,
    ) -> Result<()> {
        self.check_failure(BackendOperation::ChangeVisibility)?;
        let now = self.time_provider.now_millis();
        self.with_receipt(queue_url, receipt_handle, |messages, index| {
            messages[index].visible_at_ms = now + visibility_timeout_seconds as i64 * 1000;
        })
    }
}
