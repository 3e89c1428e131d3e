//! Shared wiring over the in-process adapters
#![allow(dead_code)]

use drover_core::application::{
    FlagCache, HandlerError, Job, JobContext, JobHandler, JobQueue, QueueReceiver, QueueResolver,
    ReceiverSettings, VisibilityTimeoutCalculator,
};
use drover_core::config::JobQueueConfig;
use drover_core::domain::QueueName;
use drover_core::port::UuidProvider;
use drover_infra_local::{InMemoryFeatureFlags, InMemoryMetrics, InMemoryQueueBackend, ManualTimeProvider};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Queue visibility used by every queue the harness creates
pub const VISIBILITY_SECS: u32 = 30;

/// Short polls, no flag caching, quick scheduler backoff
pub fn test_config() -> JobQueueConfig {
    JobQueueConfig {
        receive_wait_time_secs: 0,
        flag_cache_ttl_ms: 0,
        poll_interval_ms: 5,
        max_backoff_ms: 20,
        ..Default::default()
    }
}

pub struct Harness {
    pub clock: Arc<ManualTimeProvider>,
    pub backend: Arc<InMemoryQueueBackend>,
    pub metrics: Arc<InMemoryMetrics>,
    pub flags: Arc<InMemoryFeatureFlags>,
    pub resolver: Arc<QueueResolver>,
    pub config: JobQueueConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: JobQueueConfig) -> Self {
        let clock = Arc::new(ManualTimeProvider::default());
        let backend = Arc::new(InMemoryQueueBackend::new(clock.clone()));
        let resolver = Arc::new(QueueResolver::new(&config, backend.clone()));
        Self {
            clock,
            backend,
            metrics: Arc::new(InMemoryMetrics::new()),
            flags: Arc::new(InMemoryFeatureFlags::new()),
            resolver,
            config,
        }
    }

    pub fn create_queue(&self, name: &str) -> QueueName {
        let queue = QueueName::new(name);
        self.backend
            .create_queue_in(&self.config.account_id, &queue, VISIBILITY_SECS);
        queue
    }

    pub fn context(&self) -> Arc<JobContext> {
        Arc::new(JobContext {
            resolver: self.resolver.clone(),
            metrics: self.metrics.clone(),
            time_provider: self.clock.clone(),
            visibility: VisibilityTimeoutCalculator::new(self.config.default_visibility_timeout_secs),
        })
    }

    pub fn flag_cache(&self) -> Arc<FlagCache> {
        Arc::new(FlagCache::new(
            self.flags.clone(),
            self.clock.clone(),
            self.config.flag_cache_ttl(),
        ))
    }

    pub fn job_queue(&self) -> JobQueue {
        JobQueue::new(
            self.resolver.clone(),
            self.metrics.clone(),
            self.clock.clone(),
            Arc::new(UuidProvider),
        )
    }

    pub async fn receiver<H>(&self, queues: &[QueueName], handler: H) -> QueueReceiver
    where
        H: JobHandler + 'static,
    {
        let mut resolved = Vec::new();
        for queue in queues {
            resolved.push(self.resolver.resolve(queue).await.unwrap());
        }
        QueueReceiver::new(
            resolved,
            Arc::new(handler),
            self.context(),
            self.flag_cache(),
            ReceiverSettings::from(&self.config),
        )
    }

    pub async fn send(&self, queue: &QueueName, body: &str) {
        self.job_queue()
            .enqueue(queue, body, HashMap::new())
            .await
            .unwrap();
    }

    /// Let the backend's visibility timeout lapse for every in-flight message
    pub fn expire_visibility(&self) {
        self.clock
            .advance(Duration::from_secs(VISIBILITY_SECS as u64 + 1));
    }
}

/// Queue and body of every job a recording handler saw, in handling order
pub type Deliveries = Arc<Mutex<Vec<(QueueName, String)>>>;

/// Records each job, then acknowledges it
pub fn recording_handler(deliveries: Deliveries) -> impl JobHandler {
    move |job: Arc<Job>| {
        let deliveries = Arc::clone(&deliveries);
        async move {
            deliveries
                .lock()
                .unwrap()
                .push((job.queue_name().clone(), job.body().to_string()));
            job.acknowledge().await?;
            Ok::<(), HandlerError>(())
        }
    }
}

/// Queue names of the recorded deliveries, collapsed into (queue, count) runs
pub fn runs(deliveries: &Deliveries) -> Vec<(String, usize)> {
    let mut runs: Vec<(String, usize)> = Vec::new();
    for (queue, _) in deliveries.lock().unwrap().iter() {
        match runs.last_mut() {
            Some((last, count)) if last == queue.as_str() => *count += 1,
            _ => runs.push((queue.to_string(), 1)),
        }
    }
    runs
}
