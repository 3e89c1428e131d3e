// Batch Queue Receiver - gathers messages across concurrent receives for one handler call
use super::lifecycle::Lifecycle;
use super::{receive_wait_secs, record_lag, ReceiverSettings, ReceiverState};
use crate::application::constants::{CONSUMERS_BATCH_SIZE, CONSUMERS_BATCH_WAIT_TIME};
use crate::application::flags::FlagCache;
use crate::application::handler::BatchJobHandler;
use crate::application::job::{Job, JobContext};
use crate::application::panic_guard::{execute_guarded_async, PanicGuardResult};
use crate::application::resolver::ResolvedQueue;
use crate::domain::{QueueName, RawMessage, MAX_BATCH_SIZE};
use crate::error::{AppError, Result};
use crate::port::{Counter, Histogram, ReceiveRequest};
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Receives from one queue and hands whole batches to a [`BatchJobHandler`]
///
/// The batch target comes from the fetch-batch-size flag and may exceed a
/// single receive's limit: enough fetchers run side by side to cover it,
/// each asking for at most ten messages at a time. Fetchers keep going
/// until the target is met or the batch-wait window closes. The handler
/// runs inline, so a poll lasts until the handler returns.
pub struct BatchQueueReceiver {
    queue: ResolvedQueue,
    settings: ReceiverSettings,
    handler: Arc<dyn BatchJobHandler>,
    ctx: Arc<JobContext>,
    flags: Arc<FlagCache>,
    lifecycle: Lifecycle,
    /// Jobs inside the handler right now
    handling: AtomicUsize,
    idle: Notify,
}

impl BatchQueueReceiver {
    pub fn new(
        queue: ResolvedQueue,
        handler: Arc<dyn BatchJobHandler>,
        ctx: Arc<JobContext>,
        flags: Arc<FlagCache>,
        settings: ReceiverSettings,
    ) -> Self {
        Self {
            queue,
            settings,
            handler,
            ctx,
            flags,
            lifecycle: Lifecycle::new(),
            handling: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.lifecycle.state()
    }

    pub fn queue_name(&self) -> &QueueName {
        &self.queue.name
    }

    /// Gather one batch and run the handler on it
    ///
    /// Returns true if the handler ran, whatever its outcome. A receive
    /// error ends gathering; it propagates only when nothing was gathered.
    pub async fn run_once(&self) -> Result<bool> {
        let _poll = self.lifecycle.enter();
        if self.lifecycle.is_closed() {
            return Ok(false);
        }
        if self.lifecycle.start() {
            info!(queue = %self.queue.name, "Batch receiver running");
        }

        let target = self.batch_size();
        let deadline = Instant::now() + Duration::from_secs(self.batch_wait_secs() as u64);
        let remaining = Mutex::new(target);
        let fetchers = target.div_ceil(MAX_BATCH_SIZE);

        let gathered = join_all((0..fetchers).map(|_| self.gather(&remaining, deadline))).await;

        let mut messages = Vec::new();
        let mut failure = None;
        for (batch, error) in gathered {
            messages.extend(batch);
            if let Some(e) = error {
                failure.get_or_insert(e);
            }
        }

        if messages.is_empty() {
            return match failure {
                Some(e) => Err(e),
                None => Ok(false),
            };
        }
        if let Some(e) = failure {
            warn!(
                queue = %self.queue.name,
                count = messages.len(),
                error = %e,
                "Receive failed mid-batch, handling what was gathered"
            );
        }

        self.dispatch(messages).await;
        Ok(true)
    }

    /// Stop gathering; a batch already in the handler finishes
    pub fn stop(&self) {
        if self.lifecycle.close() {
            info!(queue = %self.queue.name, "Batch receiver draining");
        }
    }

    /// Stop, wait for the in-flight poll and its handler, then mark the receiver stopped
    pub async fn await_drained(&self) {
        self.stop();
        self.lifecycle.wait_polls().await;
        if self.lifecycle.finish() {
            info!(queue = %self.queue.name, "Batch receiver stopped");
        }
    }

    /// Wait until no batch is inside the handler
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.handling.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn pending_jobs(&self) -> usize {
        self.handling.load(Ordering::SeqCst)
    }

    /// One fetcher: receive until the shared target is used up or the window closes
    async fn gather(
        &self,
        remaining: &Mutex<usize>,
        deadline: Instant,
    ) -> (Vec<RawMessage>, Option<AppError>) {
        let mut gathered = Vec::new();
        loop {
            let take = {
                let mut remaining = remaining.lock().unwrap();
                let take = (*remaining).min(MAX_BATCH_SIZE);
                *remaining -= take;
                take
            };
            if take == 0 {
                // Target met, or other fetchers hold the rest
                break;
            }

            let window = deadline.saturating_duration_since(Instant::now()).as_secs() as u32;
            let request = ReceiveRequest {
                max_messages: take,
                wait_time_seconds: Some(
                    receive_wait_secs(&self.flags, &self.queue.name, &self.settings).min(window),
                ),
                visibility_timeout_seconds: self.settings.visibility_timeout_secs,
            };

            let started = self.ctx.time_provider.now_millis();
            let received = match self.queue.backend.receive_batch(&self.queue.url, request).await {
                Ok(received) => received,
                Err(e) => {
                    *remaining.lock().unwrap() += take;
                    return (gathered, Some(e));
                }
            };
            self.ctx.metrics.observe(
                Histogram::ReceiveTime,
                &self.queue.name,
                (self.ctx.time_provider.now_millis() - started) as f64,
            );

            *remaining.lock().unwrap() += take - received.len().min(take);
            gathered.extend(received);

            if Instant::now() >= deadline || self.lifecycle.is_closed() {
                break;
            }
        }
        (gathered, None)
    }

    async fn dispatch(&self, messages: Vec<RawMessage>) {
        let count = messages.len();
        let now = self.ctx.time_provider.now_millis();
        self.ctx
            .metrics
            .increment(Counter::JobsReceived, &self.queue.name, count as u64);
        debug!(queue = %self.queue.name, count, "Gathered batch");

        let jobs: Vec<Arc<Job>> = messages
            .into_iter()
            .map(|message| {
                record_lag(&self.ctx, &self.queue.name, &message, now);
                Arc::new(Job::from_message(
                    message,
                    self.queue.clone(),
                    Arc::clone(&self.ctx),
                ))
            })
            .collect();

        self.handling.fetch_add(count, Ordering::SeqCst);
        let handler = Arc::clone(&self.handler);
        match execute_guarded_async(async move { handler.handle_jobs(jobs).await }).await {
            PanicGuardResult::Success(Ok(())) => {
                self.ctx.metrics.observe(
                    Histogram::HandlerDispatchTime,
                    &self.queue.name,
                    (self.ctx.time_provider.now_millis() - now) as f64,
                );
            }
            PanicGuardResult::Success(Err(e)) => {
                error!(queue = %self.queue.name, count, error = %e, "Batch handler failed");
                self.ctx
                    .metrics
                    .increment(Counter::HandlerFailures, &self.queue.name, 1);
            }
            PanicGuardResult::Panicked(msg) => {
                error!(queue = %self.queue.name, count, panic_msg = %msg, "Batch handler panicked");
                self.ctx
                    .metrics
                    .increment(Counter::HandlerFailures, &self.queue.name, 1);
            }
        }
        if self.handling.fetch_sub(count, Ordering::SeqCst) == count {
            self.idle.notify_waiters();
        }
    }

    fn batch_size(&self) -> usize {
        self.flags
            .get_int(
                CONSUMERS_BATCH_SIZE,
                self.queue.name.as_str(),
                self.settings.batch_size as i64,
            )
            .max(1) as usize
    }

    fn batch_wait_secs(&self) -> u32 {
        self.flags
            .get_int(
                CONSUMERS_BATCH_WAIT_TIME,
                self.queue.name.as_str(),
                self.settings.batch_wait_time_secs as i64,
            )
            .clamp(0, u32::MAX as i64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handler::HandlerResult;
    use crate::application::resolver::QueueResolver;
    use crate::application::visibility::VisibilityTimeoutCalculator;
    use crate::config::JobQueueConfig;
    use crate::port::{FeatureFlags, NoopMetrics, QueueBackend, SystemTimeProvider};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Serves a fixed number of messages, recording every receive size and wait
    #[derive(Default)]
    struct CountingBackend {
        available: Mutex<usize>,
        requests: Mutex<Vec<(usize, Option<u32>)>>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl QueueBackend for CountingBackend {
        async fn queue_url(&self, queue: &QueueName, _: &str) -> Result<Option<String>> {
            Ok(Some(queue.to_string()))
        }
        async fn receive_batch(&self, _: &str, request: ReceiveRequest) -> Result<Vec<RawMessage>> {
            if *self.fail.lock().unwrap() {
                return Err(AppError::BackendUnavailable("receive failed".into()));
            }
            self.requests
                .lock()
                .unwrap()
                .push((request.max_messages, request.wait_time_seconds));
            let mut available = self.available.lock().unwrap();
            let take = request.max_messages.min(*available);
            *available -= take;
            Ok((0..take)
                .map(|n| RawMessage {
                    message_id: format!("m-{}-{}", *available, n),
                    body: "b".into(),
                    receipt_handle: format!("r-{}-{}", *available, n),
                    ..Default::default()
                })
                .collect())
        }
        async fn delete(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn send(&self, _: &str, _: &str, _: &HashMap<String, String>) -> Result<String> {
            Ok("id".into())
        }
        async fn change_visibility(&self, _: &str, _: &str, _: u32) -> Result<()> {
            Ok(())
        }
    }

    struct BatchFlags {
        batch_size: i64,
        receive_wait: i64,
    }

    impl FeatureFlags for BatchFlags {
        fn get_int(&self, feature: &str, _key: &str, default: i64) -> i64 {
            match feature {
                CONSUMERS_BATCH_SIZE => self.batch_size,
                crate::application::constants::CONSUMERS_RECEIVE_WAIT_TIME => self.receive_wait,
                _ => default,
            }
        }
    }

    fn build_batch_receiver(
        backend: &Arc<CountingBackend>,
        flags: BatchFlags,
        handler: Arc<dyn BatchJobHandler>,
    ) -> BatchQueueReceiver {
        let config = JobQueueConfig::default();
        let time: Arc<dyn crate::port::TimeProvider> = Arc::new(SystemTimeProvider);
        let ctx = Arc::new(JobContext {
            resolver: Arc::new(QueueResolver::new(&config, backend.clone())),
            metrics: Arc::new(NoopMetrics),
            time_provider: Arc::clone(&time),
            visibility: VisibilityTimeoutCalculator::new(30),
        });
        let flags = Arc::new(FlagCache::new(Arc::new(flags), time, Duration::ZERO));
        let queue = ResolvedQueue {
            name: QueueName::new("reports"),
            url: "reports".into(),
            region: config.region.clone(),
            account_id: config.account_id.clone(),
            backend: backend.clone(),
        };
        BatchQueueReceiver::new(queue, handler, ctx, flags, ReceiverSettings::from(&config))
    }

    fn sizing_handler() -> (Arc<Mutex<Vec<usize>>>, Arc<dyn BatchJobHandler>) {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sizes);
        let handler = move |jobs: Vec<Arc<Job>>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(jobs.len());
                HandlerResult::Ok(())
            }
        };
        (sizes, Arc::new(handler))
    }

    #[tokio::test]
    async fn test_gathers_past_single_receive_limit() {
        let backend = Arc::new(CountingBackend::default());
        *backend.available.lock().unwrap() = 30;
        let (sizes, handler) = sizing_handler();
        let receiver = build_batch_receiver(
            &backend,
            BatchFlags {
                batch_size: 25,
                receive_wait: 5,
            },
            handler,
        );

        assert!(receiver.run_once().await.unwrap());
        assert_eq!(*sizes.lock().unwrap(), vec![25]);

        let requests = backend.requests.lock().unwrap();
        let mut asked: Vec<usize> = requests.iter().map(|(n, _)| *n).collect();
        asked.sort_unstable();
        assert_eq!(asked, vec![5, 10, 10]);
        // No batch window: the wait is cut to zero
        assert!(requests.iter().all(|(_, wait)| *wait == Some(0)));
    }

    #[tokio::test]
    async fn test_empty_queue_skips_handler() {
        let backend = Arc::new(CountingBackend::default());
        let (sizes, handler) = sizing_handler();
        let receiver = build_batch_receiver(
            &backend,
            BatchFlags {
                batch_size: 10,
                receive_wait: 0,
            },
            handler,
        );

        assert!(!receiver.run_once().await.unwrap());
        assert!(sizes.lock().unwrap().is_empty());
        assert_eq!(receiver.state(), ReceiverState::Running);
    }

    #[tokio::test]
    async fn test_handler_failure_still_counts_as_work() {
        let backend = Arc::new(CountingBackend::default());
        *backend.available.lock().unwrap() = 3;
        let handler: Arc<dyn BatchJobHandler> = Arc::new(|_jobs: Vec<Arc<Job>>| async move {
            HandlerResult::Err("batch rejected".into())
        });
        let receiver = build_batch_receiver(
            &backend,
            BatchFlags {
                batch_size: 10,
                receive_wait: 0,
            },
            handler,
        );

        assert!(receiver.run_once().await.unwrap());
        assert_eq!(receiver.pending_jobs(), 0);
    }

    #[tokio::test]
    async fn test_receive_error_with_nothing_gathered_propagates() {
        let backend = Arc::new(CountingBackend::default());
        *backend.fail.lock().unwrap() = true;
        let (_, handler) = sizing_handler();
        let receiver = build_batch_receiver(
            &backend,
            BatchFlags {
                batch_size: 10,
                receive_wait: 0,
            },
            handler,
        );

        let err = receiver.run_once().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_stopped_receiver_does_not_poll() {
        let backend = Arc::new(CountingBackend::default());
        *backend.available.lock().unwrap() = 3;
        let (sizes, handler) = sizing_handler();
        let receiver = build_batch_receiver(
            &backend,
            BatchFlags {
                batch_size: 10,
                receive_wait: 0,
            },
            handler,
        );

        assert!(receiver.run_once().await.unwrap());
        receiver.await_drained().await;
        assert_eq!(receiver.state(), ReceiverState::Stopped);
        assert!(!receiver.run_once().await.unwrap());
        assert_eq!(*sizes.lock().unwrap(), vec![3]);
        assert_eq!(backend.requests.lock().unwrap().len(), 1);
    }
}
