// Job - one delivered message and its terminal operations
use super::resolver::{QueueResolver, ResolvedQueue};
use super::visibility::VisibilityTimeoutCalculator;
use crate::domain::metadata::METADATA_ATTRIBUTE;
use crate::domain::{JobMetadata, QueueName, RawMessage};
use crate::error::{AppError, Result};
use crate::port::{Counter, Histogram, MetricsSink, TimeProvider};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PENDING: u8 = 0;
const SETTLING: u8 = 1;
/// Copied to the dead-letter queue, source delete still outstanding
const FORWARDED: u8 = 2;
const ACKNOWLEDGED: u8 = 3;
const DEAD_LETTERED: u8 = 4;

/// Collaborators every job of a receiver shares
pub struct JobContext {
    pub resolver: Arc<QueueResolver>,
    pub metrics: Arc<dyn MetricsSink>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub visibility: VisibilityTimeoutCalculator,
}

pub struct Job {
    id: String,
    body: String,
    attributes: HashMap<String, String>,
    idempotence_key: Option<String>,
    origin_queue: QueueName,
    original_trace_id: Option<String>,
    receive_count: Option<u32>,
    receipt_handle: String,
    /// Producer attributes as delivered, metadata included; forwarded on dead-letter
    forward_attributes: HashMap<String, String>,
    queue: ResolvedQueue,
    state: AtomicU8,
    ctx: Arc<JobContext>,
}

impl Job {
    /// Wrap a delivered message received from `queue`
    ///
    /// Malformed metadata is logged and treated as absent.
    pub fn from_message(message: RawMessage, queue: ResolvedQueue, ctx: Arc<JobContext>) -> Self {
        let receive_count = message.receive_count();
        let forward_attributes = message.message_attributes.clone();

        let mut user_attributes = message.message_attributes;
        let metadata = match user_attributes.remove(METADATA_ATTRIBUTE) {
            Some(raw) => JobMetadata::parse(&raw).unwrap_or_else(|e| {
                warn!(
                    job_id = %message.message_id,
                    queue = %queue.name,
                    error = %AppError::MalformedMetadata(e.to_string()),
                    "Ignoring job metadata; idempotence key unavailable"
                );
                JobMetadata::default()
            }),
            None => JobMetadata::default(),
        };

        let mut attributes = message.system_attributes;
        attributes.extend(user_attributes);

        Self {
            id: message.message_id,
            body: message.body,
            attributes,
            idempotence_key: metadata.idempotence_key,
            origin_queue: metadata.origin_queue.unwrap_or_else(|| queue.name.clone()),
            original_trace_id: metadata.original_trace_id,
            receive_count,
            receipt_handle: message.receipt_handle,
            forward_attributes,
            queue,
            state: AtomicU8::new(PENDING),
            ctx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// System and producer attributes; never contains the metadata attribute
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Absent for messages from producers outside this system; dedup is then unavailable
    pub fn idempotence_key(&self) -> Option<&str> {
        self.idempotence_key.as_deref()
    }

    /// Queue the job was first enqueued on (differs from `queue_name` on retry queues)
    pub fn origin_queue(&self) -> &QueueName {
        &self.origin_queue
    }

    pub fn original_trace_id(&self) -> Option<&str> {
        self.original_trace_id.as_deref()
    }

    /// Queue this delivery came from
    pub fn queue_name(&self) -> &QueueName {
        &self.queue.name
    }

    pub fn receive_count(&self) -> Option<u32> {
        self.receive_count
    }

    /// True once acknowledged or dead-lettered
    pub fn is_settled(&self) -> bool {
        matches!(self.state.load(Ordering::SeqCst), ACKNOWLEDGED | DEAD_LETTERED)
    }

    /// Delete the message, stopping redelivery
    pub async fn acknowledge(&self) -> Result<()> {
        self.begin_settle("acknowledge", false)?;

        match self.delete_from_source().await {
            Ok(()) => {
                self.ctx
                    .metrics
                    .increment(Counter::JobsAcknowledged, &self.queue.name, 1);
                self.state.store(ACKNOWLEDGED, Ordering::SeqCst);
                debug!(job_id = %self.id, queue = %self.queue.name, "Job acknowledged");
                Ok(())
            }
            Err(e) => {
                self.ctx
                    .metrics
                    .increment(Counter::JobsFailedToAcknowledge, &self.queue.name, 1);
                self.state.store(PENDING, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Move the message to its dead-letter queue: send a copy, then delete the original
    ///
    /// If the copy was sent but the delete failed, calling this again only
    /// retries the delete.
    pub async fn dead_letter(&self) -> Result<()> {
        let previous = self.begin_settle("dead_letter", true)?;

        if previous != FORWARDED {
            if let Err(e) = self.send_to_dead_letter_queue().await {
                self.state.store(PENDING, Ordering::SeqCst);
                return Err(e);
            }
        }

        match self.delete_from_source().await {
            Ok(()) => {
                self.ctx
                    .metrics
                    .increment(Counter::JobsDeadLettered, &self.queue.name, 1);
                self.state.store(DEAD_LETTERED, Ordering::SeqCst);
                info!(job_id = %self.id, queue = %self.queue.name, "Job dead-lettered");
                Ok(())
            }
            Err(e) => {
                warn!(
                    job_id = %self.id,
                    queue = %self.queue.name,
                    error = %e,
                    "Dead-letter copy sent but source delete failed"
                );
                self.state.store(FORWARDED, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Push the next delivery out by an exponential visibility backoff
    ///
    /// Does not settle the job; the message returns once the timeout elapses.
    pub async fn retry_with_backoff(&self) -> Result<()> {
        if self.state.load(Ordering::SeqCst) != PENDING {
            return Err(self.reuse_error("retry_with_backoff"));
        }

        let timeout = self
            .ctx
            .visibility
            .timeout_for(self.receive_count.unwrap_or(1));
        self.queue
            .backend
            .change_visibility(&self.queue.url, &self.receipt_handle, timeout)
            .await?;
        self.ctx
            .metrics
            .observe(Histogram::VisibilityTime, &self.queue.name, timeout as f64);
        debug!(job_id = %self.id, queue = %self.queue.name, timeout_secs = %timeout, "Job delayed");
        Ok(())
    }

    /// Claim the receipt; only `dead_letter` may resume a forwarded job
    fn begin_settle(&self, operation: &str, resume_forwarded: bool) -> Result<u8> {
        let current = self.state.load(Ordering::SeqCst);
        if current != PENDING && !(resume_forwarded && current == FORWARDED) {
            return Err(self.reuse_error(operation));
        }
        self.state
            .compare_exchange(current, SETTLING, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| self.reuse_error(operation))
    }

    /// Make the message visible again right away, for a job that will not be handled
    pub(crate) async fn release(&self) -> Result<()> {
        if self.state.load(Ordering::SeqCst) != PENDING {
            return Err(self.reuse_error("release"));
        }
        self.queue
            .backend
            .change_visibility(&self.queue.url, &self.receipt_handle, 0)
            .await
    }

    fn reuse_error(&self, operation: &str) -> AppError {
        AppError::InvalidState(format!(
            "{} on job {}: receipt already consumed or in use",
            operation, self.id
        ))
    }

    async fn delete_from_source(&self) -> Result<()> {
        let started = self.ctx.time_provider.now_millis();
        self.queue
            .backend
            .delete(&self.queue.url, &self.receipt_handle)
            .await?;
        self.ctx.metrics.observe(
            Histogram::DeleteTime,
            &self.queue.name,
            (self.ctx.time_provider.now_millis() - started) as f64,
        );
        Ok(())
    }

    async fn send_to_dead_letter_queue(&self) -> Result<()> {
        let dlq = self.ctx.resolver.dead_letter_for(&self.queue.name).await?;
        let started = self.ctx.time_provider.now_millis();
        dlq.backend
            .send(&dlq.url, &self.body, &self.forward_attributes)
            .await?;
        self.ctx.metrics.observe(
            Histogram::SendTime,
            &dlq.name,
            (self.ctx.time_provider.now_millis() - started) as f64,
        );
        Ok(())
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("queue", &self.queue.name)
            .field("idempotence_key", &self.idempotence_key)
            .field("receive_count", &self.receive_count)
            .finish()
    }
}
