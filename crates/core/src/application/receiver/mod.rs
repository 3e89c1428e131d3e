// Queue Receiver - priority polling and bounded dispatch

mod batch;
mod lifecycle;
mod worker_pool;

pub use batch::BatchQueueReceiver;
pub use worker_pool::WorkerPool;

use super::constants::{CONSUMERS_BATCH_SIZE, CONSUMERS_RECEIVE_WAIT_TIME, MAX_RECEIVE_WAIT_SECS};
use super::flags::FlagCache;
use super::handler::JobHandler;
use super::job::{Job, JobContext};
use super::resolver::ResolvedQueue;
use crate::config::JobQueueConfig;
use crate::domain::{QueueName, RawMessage, MAX_BATCH_SIZE};
use crate::error::{AppError, Result};
use crate::port::{Counter, Histogram, ReceiveRequest};
use lifecycle::Lifecycle;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receiver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Stopped,
    Running,
    /// No new polls; in-flight polls and jobs are finishing
    Draining,
}

/// Receive settings fixed at construction
#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    pub batch_size: usize,
    pub worker_pool_size: usize,
    pub worker_queue_capacity: usize,
    /// Used when the receive-wait flag has no value
    pub receive_wait_time_secs: u32,
    /// Used when the batch-wait flag has no value
    pub batch_wait_time_secs: u32,
    pub visibility_timeout_secs: Option<u32>,
}

impl From<&JobQueueConfig> for ReceiverSettings {
    fn from(config: &JobQueueConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            worker_pool_size: config.worker_pool_size,
            worker_queue_capacity: config.worker_queue_capacity,
            receive_wait_time_secs: config.receive_wait_time_secs,
            batch_wait_time_secs: config.batch_wait_time_secs,
            visibility_timeout_secs: config.visibility_timeout_secs,
        }
    }
}

/// Polls a priority-ordered list of queues, one batch per call
///
/// Each [`run_once`](Self::run_once) draws at most one batch from the first
/// queue that has messages, so higher-priority queues are re-checked after
/// every batch taken from a lower one. Only the last queue is long-polled;
/// the ones in front of it are short-polled so a quiet high-priority queue
/// never delays a busy low-priority one.
pub struct QueueReceiver {
    queues: Vec<ResolvedQueue>,
    settings: ReceiverSettings,
    pool: WorkerPool,
    ctx: Arc<JobContext>,
    flags: Arc<FlagCache>,
    lifecycle: Lifecycle,
}

impl QueueReceiver {
    pub fn new(
        queues: Vec<ResolvedQueue>,
        handler: Arc<dyn JobHandler>,
        ctx: Arc<JobContext>,
        flags: Arc<FlagCache>,
        settings: ReceiverSettings,
    ) -> Self {
        let pool = WorkerPool::new(
            settings.worker_pool_size,
            settings.worker_queue_capacity,
            handler,
            Arc::clone(&ctx.metrics),
            Arc::clone(&ctx.time_provider),
        );
        Self {
            queues,
            settings,
            pool,
            ctx,
            flags,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.lifecycle.state()
    }

    pub fn queue_names(&self) -> Vec<QueueName> {
        self.queues.iter().map(|q| q.name.clone()).collect()
    }

    /// One poll cycle
    ///
    /// Returns true if a batch was received and handed to the worker pool,
    /// false if no queue had messages (or the receiver is draining or its
    /// pool is full). Returns as soon as the batch is submitted, without
    /// waiting for handlers. Backend errors propagate.
    pub async fn run_once(&self) -> Result<bool> {
        let _poll = self.lifecycle.enter();
        if self.lifecycle.is_closed() {
            return Ok(false);
        }
        if self.lifecycle.start() {
            self.pool.start();
            info!(queues = ?self.queue_names(), "Receiver running");
        }

        let batch_size = self.batch_size().min(self.pool.free_capacity());
        if batch_size == 0 {
            debug!(queues = ?self.queue_names(), "Worker pool full, skipping poll");
            return Ok(false);
        }

        let last = self.queues.len().saturating_sub(1);
        for (index, queue) in self.queues.iter().enumerate() {
            let request = ReceiveRequest {
                max_messages: batch_size,
                wait_time_seconds: Some(if index == last {
                    receive_wait_secs(&self.flags, &self.queues[0].name, &self.settings)
                } else {
                    0
                }),
                visibility_timeout_seconds: self.settings.visibility_timeout_secs,
            };

            let started = self.ctx.time_provider.now_millis();
            let messages = queue.backend.receive_batch(&queue.url, request).await?;
            let now = self.ctx.time_provider.now_millis();
            self.ctx
                .metrics
                .observe(Histogram::ReceiveTime, &queue.name, (now - started) as f64);

            if messages.is_empty() {
                continue;
            }

            self.ctx
                .metrics
                .increment(Counter::JobsReceived, &queue.name, messages.len() as u64);
            debug!(queue = %queue.name, count = messages.len(), "Received batch");

            for message in messages {
                record_lag(&self.ctx, &queue.name, &message, now);
                let job = Arc::new(Job::from_message(
                    message,
                    queue.clone(),
                    Arc::clone(&self.ctx),
                ));
                if !self.pool.submit(Arc::clone(&job)).await {
                    release_undispatched(&job).await;
                }
            }
            return Ok(true);
        }

        Ok(false)
    }

    /// Stop polling; in-flight polls and queued jobs keep running
    pub fn stop(&self) {
        if self.lifecycle.close() {
            info!(queues = ?self.queue_names(), "Receiver draining");
        }
    }

    /// Stop, wait for in-flight polls and then for the worker pool, and mark the receiver stopped
    pub async fn await_drained(&self) {
        self.stop();
        self.lifecycle.wait_polls().await;
        self.pool.close();
        self.pool.join().await;
        if self.lifecycle.finish() {
            info!(queues = ?self.queue_names(), "Receiver stopped");
        }
    }

    /// Wait until every dispatched job has finished
    pub async fn wait_idle(&self) {
        self.pool.wait_idle().await;
    }

    pub fn pending_jobs(&self) -> usize {
        self.pool.pending()
    }

    /// `run_once` calls not yet returned
    pub fn polls_in_flight(&self) -> usize {
        self.lifecycle.in_flight()
    }

    fn batch_size(&self) -> usize {
        let Some(first) = self.queues.first() else {
            return 0;
        };
        let configured = self.flags.get_int(
            CONSUMERS_BATCH_SIZE,
            first.name.as_str(),
            self.settings.batch_size as i64,
        );
        configured.clamp(1, MAX_BATCH_SIZE as i64) as usize
    }
}

/// Long-poll wait for `queue`, flag first, clamped to what SQS accepts
fn receive_wait_secs(flags: &FlagCache, queue: &QueueName, settings: &ReceiverSettings) -> u32 {
    flags
        .get_int(
            CONSUMERS_RECEIVE_WAIT_TIME,
            queue.as_str(),
            settings.receive_wait_time_secs as i64,
        )
        .clamp(0, MAX_RECEIVE_WAIT_SECS as i64) as u32
}

/// Hand a received job straight back to the queue
async fn release_undispatched(job: &Job) {
    match job.release().await {
        Ok(()) => debug!(job_id = %job.id(), queue = %job.queue_name(), "Receiver closed, job released"),
        Err(e) => warn!(
            job_id = %job.id(),
            queue = %job.queue_name(),
            error = %e,
            "Receiver closed, job left invisible"
        ),
    }
}

fn record_lag(ctx: &JobContext, queue: &QueueName, message: &RawMessage, now: i64) {
    let Some(sent) = message.sent_timestamp() else {
        warn!(
            job_id = %message.message_id,
            queue = %queue,
            reason = %AppError::Validation("missing or invalid SentTimestamp".into()),
            "Cannot record processing lag"
        );
        return;
    };
    let lag = (now - sent) as f64;
    ctx.metrics.observe(Histogram::ProcessingLag, queue, lag);
    if message.receive_count().is_some_and(|count| count <= 1) {
        ctx.metrics.observe(Histogram::FirstProcessingLag, queue, lag);
    }
}
