// Job Consumer - subscriptions, allocation and receiver scheduling
use super::allocator::ConsumerAllocator;
use super::constants::{CONSUMER_SWITCH_KEY, DRAIN_TIMEOUT};
use super::flags::FlagCache;
use super::handler::{BatchJobHandler, JobHandler};
use super::job::JobContext;
use super::receiver::{BatchQueueReceiver, QueueReceiver, ReceiverSettings, ReceiverState};
use super::resolver::{QueueResolver, ResolvedQueue};
use super::visibility::VisibilityTimeoutCalculator;
use crate::config::JobQueueConfig;
use crate::domain::{AllocationPolicy, QueueName};
use crate::error::{AppError, Result};
use crate::port::{
    AsyncSwitch, FeatureFlags, LeaseManager, MetricsSink, PeriodicScheduler, RepeatedTask,
    TaskStatus, TimeProvider,
};
use futures::future::join_all;
use futures::FutureExt;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

/// Collaborators a consumer is wired with
pub struct ConsumerDependencies {
    pub resolver: Arc<QueueResolver>,
    pub leases: Arc<dyn LeaseManager>,
    pub flags: Arc<dyn FeatureFlags>,
    pub scheduler: Arc<dyn PeriodicScheduler>,
    pub metrics: Arc<dyn MetricsSink>,
    pub time_provider: Arc<dyn TimeProvider>,
    /// Pauses every subscription while off; use `AlwaysEnabled` when nothing gates the consumer
    pub switch: Arc<dyn AsyncSwitch>,
}

#[derive(Clone)]
enum SubscriptionHandler {
    Individual(Arc<dyn JobHandler>),
    Batch(Arc<dyn BatchJobHandler>),
}

enum Receiver {
    Individual(QueueReceiver),
    Batch(BatchQueueReceiver),
}

impl Receiver {
    async fn run_once(&self) -> Result<bool> {
        match self {
            Receiver::Individual(receiver) => receiver.run_once().await,
            Receiver::Batch(receiver) => receiver.run_once().await,
        }
    }

    fn stop(&self) {
        match self {
            Receiver::Individual(receiver) => receiver.stop(),
            Receiver::Batch(receiver) => receiver.stop(),
        }
    }

    async fn await_drained(&self) {
        match self {
            Receiver::Individual(receiver) => receiver.await_drained().await,
            Receiver::Batch(receiver) => receiver.await_drained().await,
        }
    }

    async fn wait_idle(&self) {
        match self {
            Receiver::Individual(receiver) => receiver.wait_idle().await,
            Receiver::Batch(receiver) => receiver.wait_idle().await,
        }
    }

    fn pending_jobs(&self) -> usize {
        match self {
            Receiver::Individual(receiver) => receiver.pending_jobs(),
            Receiver::Batch(receiver) => receiver.pending_jobs(),
        }
    }

    fn state(&self) -> ReceiverState {
        match self {
            Receiver::Individual(receiver) => receiver.state(),
            Receiver::Batch(receiver) => receiver.state(),
        }
    }
}

struct Subscription {
    /// Highest-priority queue; keys allocation, leases and the subscription itself
    primary: QueueName,
    queues: Vec<ResolvedQueue>,
    handler: SubscriptionHandler,
    receivers: AsyncMutex<Vec<Arc<Receiver>>>,
    held_slots: AsyncMutex<BTreeSet<usize>>,
    allocated: AtomicUsize,
    active: AtomicBool,
}

/// State shared with the scheduled tasks
struct ConsumerCore {
    allocator: ConsumerAllocator,
    flags: Arc<FlagCache>,
    ctx: Arc<JobContext>,
    policy: AllocationPolicy,
    settings: ReceiverSettings,
    switch: Arc<dyn AsyncSwitch>,
    /// Set while the switch is off; shared by every subscription
    paused: AtomicBool,
}

/// Runs receivers for each subscribed queue
///
/// Every subscription is one scheduled task. On each tick the task decides
/// this pod's allocation, claims the matching lease slots, and runs one poll
/// cycle on that many receivers concurrently. Receivers beyond the current
/// allocation are stopped and drained in the background.
pub struct JobConsumer {
    core: Arc<ConsumerCore>,
    resolver: Arc<QueueResolver>,
    scheduler: Arc<dyn PeriodicScheduler>,
    subscriptions: Mutex<HashMap<QueueName, Arc<Subscription>>>,
    config: JobQueueConfig,
}

impl JobConsumer {
    pub fn new(config: JobQueueConfig, deps: ConsumerDependencies) -> Self {
        let flags = Arc::new(FlagCache::new(
            deps.flags,
            Arc::clone(&deps.time_provider),
            config.flag_cache_ttl(),
        ));
        let ctx = Arc::new(JobContext {
            resolver: Arc::clone(&deps.resolver),
            metrics: deps.metrics,
            time_provider: deps.time_provider,
            visibility: VisibilityTimeoutCalculator::new(config.default_visibility_timeout_secs),
        });
        let core = Arc::new(ConsumerCore {
            allocator: ConsumerAllocator::new(Arc::clone(&flags), deps.leases),
            flags,
            ctx,
            policy: config.receiver_policy,
            settings: ReceiverSettings::from(&config),
            switch: deps.switch,
            paused: AtomicBool::new(false),
        });

        Self {
            core,
            resolver: deps.resolver,
            scheduler: deps.scheduler,
            subscriptions: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Subscribe `handler` to `queue` (and its retry queue, if configured)
    pub async fn subscribe<H>(&self, queue: QueueName, handler: H) -> Result<()>
    where
        H: JobHandler + 'static,
    {
        let mut queues = vec![queue.clone()];
        if self.config.install_retry_queue
            && !queue.is_retry_queue()
            && !queue.is_dead_letter_queue()
        {
            queues.push(queue.retry_queue());
        }
        self.subscribe_prioritized(queues, handler).await
    }

    /// Subscribe one handler to several queues, highest priority first
    pub async fn subscribe_prioritized<H>(&self, queues: Vec<QueueName>, handler: H) -> Result<()>
    where
        H: JobHandler + 'static,
    {
        self.register(queues, SubscriptionHandler::Individual(Arc::new(handler)))
            .await
    }

    /// Subscribe a batch handler to `queue` alone
    ///
    /// Each receiver gathers up to the fetch-batch-size flag's worth of
    /// messages within the batch-wait window and hands them over in one call.
    /// No retry queue is attached.
    pub async fn subscribe_batch<H>(&self, queue: QueueName, handler: H) -> Result<()>
    where
        H: BatchJobHandler + 'static,
    {
        self.register(vec![queue], SubscriptionHandler::Batch(Arc::new(handler)))
            .await
    }

    /// Stop polling `queue`, drain its receivers and release its leases
    ///
    /// Waits for polls already in flight, so messages they receive are still
    /// handled. Returns false if `queue` was not subscribed.
    pub async fn unsubscribe(&self, queue: &QueueName) -> Result<bool> {
        let removed = self.subscriptions.lock().unwrap().remove(queue);
        let Some(subscription) = removed else {
            return Ok(false);
        };
        self.core.retire(&subscription).await;
        info!(queue = %queue, "Unsubscribed");
        Ok(true)
    }

    /// Stop the scheduler, then drain every subscription
    pub async fn shutdown(&self) {
        info!("Job consumer shutting down");
        self.scheduler.stop();
        self.scheduler.await_terminated().await;

        let subscriptions: Vec<_> = self
            .subscriptions
            .lock()
            .unwrap()
            .drain()
            .map(|(_, sub)| sub)
            .collect();
        for subscription in subscriptions {
            self.core.retire(&subscription).await;
        }
        info!("Job consumer stopped");
    }

    pub fn is_subscribed(&self, queue: &QueueName) -> bool {
        self.subscriptions.lock().unwrap().contains_key(queue)
    }

    pub fn subscribed_queues(&self) -> Vec<QueueName> {
        self.subscriptions.lock().unwrap().keys().cloned().collect()
    }

    /// Receivers the last tick ran for `queue`
    pub fn active_receivers(&self, queue: &QueueName) -> usize {
        self.subscriptions
            .lock()
            .unwrap()
            .get(queue)
            .map(|sub| sub.allocated.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// True while the switch holds every subscription idle
    pub fn is_paused(&self) -> bool {
        self.core.paused.load(Ordering::SeqCst)
    }

    /// Wait until no dispatched job is queued or running for `queue`
    pub async fn wait_idle(&self, queue: &QueueName) {
        let subscription = self.subscriptions.lock().unwrap().get(queue).cloned();
        if let Some(subscription) = subscription {
            let receivers = subscription.receivers.lock().await.clone();
            for receiver in receivers {
                receiver.wait_idle().await;
            }
        }
    }

    async fn register(&self, queues: Vec<QueueName>, handler: SubscriptionHandler) -> Result<()> {
        let Some(primary) = queues.first().cloned() else {
            return Err(AppError::Validation("subscription needs at least one queue".into()));
        };
        self.ensure_not_subscribed(&primary)?;

        let mut resolved = Vec::with_capacity(queues.len());
        for queue in &queues {
            resolved.push(self.resolver.resolve(queue).await?);
        }

        let batch = matches!(handler, SubscriptionHandler::Batch(_));
        let subscription = Arc::new(Subscription {
            primary: primary.clone(),
            queues: resolved,
            handler,
            receivers: AsyncMutex::new(Vec::new()),
            held_slots: AsyncMutex::new(BTreeSet::new()),
            allocated: AtomicUsize::new(0),
            active: AtomicBool::new(true),
        });

        {
            let mut subscriptions = self.subscriptions.lock().unwrap();
            if subscriptions.contains_key(&primary) {
                return Err(already_subscribed(&primary));
            }
            subscriptions.insert(primary.clone(), Arc::clone(&subscription));
        }
        // First tick of a new subscription reads current flag values
        self.core.flags.invalidate();

        let core = Arc::clone(&self.core);
        let task: RepeatedTask = Arc::new(move || {
            let core = Arc::clone(&core);
            let subscription = Arc::clone(&subscription);
            async move { core.tick(&subscription).await }.boxed()
        });
        self.scheduler.schedule(
            &format!("jobqueue-consumer-{}", primary),
            self.config.poll_interval(),
            task,
        );

        info!(queues = ?queues, batch, policy = ?self.config.receiver_policy, "Subscribed");
        Ok(())
    }

    fn ensure_not_subscribed(&self, queue: &QueueName) -> Result<()> {
        if self.subscriptions.lock().unwrap().contains_key(queue) {
            return Err(already_subscribed(queue));
        }
        Ok(())
    }
}

fn already_subscribed(queue: &QueueName) -> AppError {
    AppError::Conflict(format!("queue {} is already subscribed", queue))
}

impl ConsumerCore {
    async fn tick(&self, sub: &Subscription) -> TaskStatus {
        if !sub.active.load(Ordering::SeqCst) {
            return TaskStatus::NoReschedule;
        }
        if !self.switch_enabled() {
            return TaskStatus::NoWork;
        }

        let count = match self.allocate(sub).await {
            Ok(count) => count,
            Err(e) => {
                warn!(queue = %sub.primary, error = %e, "Consumer allocation failed");
                return TaskStatus::Failed;
            }
        };

        let previous = sub.allocated.swap(count, Ordering::SeqCst);
        if previous != count {
            info!(queue = %sub.primary, from = previous, to = count, "Receiver allocation changed");
        }

        let receivers: Vec<Arc<Receiver>> = {
            let mut receivers = sub.receivers.lock().await;
            if !sub.active.load(Ordering::SeqCst) {
                return TaskStatus::NoReschedule;
            }
            if receivers.len() > count {
                let surplus = receivers.split_off(count);
                self.retire_surplus(&sub.primary, surplus);
            }
            while receivers.len() < count {
                receivers.push(Arc::new(self.build_receiver(sub)));
            }
            receivers.clone()
        };
        if receivers.is_empty() {
            return TaskStatus::NoWork;
        }

        let results = join_all(receivers.iter().map(|receiver| receiver.run_once())).await;

        let mut status = TaskStatus::NoWork;
        for result in results {
            match result {
                Ok(true) => status = TaskStatus::Ok,
                Ok(false) => {}
                Err(e) => {
                    error!(queue = %sub.primary, error = %e, "Receive failed");
                    if status == TaskStatus::NoWork {
                        status = TaskStatus::Failed;
                    }
                }
            }
        }
        status
    }

    /// Logs once per pause and once per resume
    fn switch_enabled(&self) -> bool {
        if !self.switch.is_enabled(CONSUMER_SWITCH_KEY) {
            if !self.paused.swap(true, Ordering::SeqCst) {
                info!("Async consumption disabled, consumer paused");
            }
            return false;
        }
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Async consumption re-enabled, consumer resuming");
        }
        true
    }

    fn build_receiver(&self, sub: &Subscription) -> Receiver {
        match &sub.handler {
            SubscriptionHandler::Individual(handler) => Receiver::Individual(QueueReceiver::new(
                sub.queues.clone(),
                Arc::clone(handler),
                Arc::clone(&self.ctx),
                Arc::clone(&self.flags),
                self.settings.clone(),
            )),
            SubscriptionHandler::Batch(handler) => Receiver::Batch(BatchQueueReceiver::new(
                sub.queues[0].clone(),
                Arc::clone(handler),
                Arc::clone(&self.ctx),
                Arc::clone(&self.flags),
                self.settings.clone(),
            )),
        }
    }

    /// Stop receivers past the allocation and drain them off the tick
    fn retire_surplus(&self, queue: &QueueName, surplus: Vec<Arc<Receiver>>) {
        info!(queue = %queue, retired = surplus.len(), "Retiring surplus receivers");
        for receiver in &surplus {
            receiver.stop();
        }
        let queue = queue.clone();
        tokio::spawn(async move {
            for receiver in surplus {
                if tokio::time::timeout(DRAIN_TIMEOUT, receiver.await_drained())
                    .await
                    .is_err()
                {
                    warn!(
                        queue = %queue,
                        pending = receiver.pending_jobs(),
                        "Surplus receiver did not drain in time"
                    );
                }
            }
        });
    }

    /// Receivers to run this tick; claims lease slots when the decision used them
    async fn allocate(&self, sub: &Subscription) -> Result<usize> {
        let decision = self.allocator.decide(&sub.primary, self.policy).await?;

        let mut held = sub.held_slots.lock().await;
        if !sub.active.load(Ordering::SeqCst) {
            return Ok(0);
        }
        match decision.lease_slots {
            Some(global_max) => {
                self.allocator
                    .acquire_slots(&sub.primary, decision.consumers, global_max, &mut held)
                    .await
            }
            None => {
                if !held.is_empty() {
                    self.allocator.release_all(&sub.primary, &mut held).await;
                }
                Ok(decision.consumers)
            }
        }
    }

    async fn retire(&self, sub: &Subscription) {
        sub.active.store(false, Ordering::SeqCst);
        sub.allocated.store(0, Ordering::SeqCst);

        let receivers = std::mem::take(&mut *sub.receivers.lock().await);
        for receiver in &receivers {
            receiver.stop();
        }
        for receiver in &receivers {
            if tokio::time::timeout(DRAIN_TIMEOUT, receiver.await_drained())
                .await
                .is_err()
            {
                warn!(
                    queue = %sub.primary,
                    pending = receiver.pending_jobs(),
                    state = ?receiver.state(),
                    "Receiver did not drain in time"
                );
            }
        }

        let mut held = sub.held_slots.lock().await;
        self.allocator.release_all(&sub.primary, &mut held).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::constants::{CONSUMERS_PER_QUEUE, POD_CONSUMERS_PER_QUEUE};
    use crate::application::handler::HandlerResult;
    use crate::application::job::Job;
    use crate::domain::RawMessage;
    use crate::port::{AlwaysEnabled, NoopMetrics, QueueBackend, ReceiveRequest, SystemTimeProvider};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicI64;
    use std::time::Duration;

    /// Knows every queue, never has messages
    struct EmptyBackend {
        unknown: &'static str,
    }

    #[async_trait]
    impl QueueBackend for EmptyBackend {
        async fn queue_url(&self, queue: &QueueName, _: &str) -> Result<Option<String>> {
            Ok((queue.as_str() != self.unknown).then(|| queue.to_string()))
        }
        async fn receive_batch(&self, _: &str, _: ReceiveRequest) -> Result<Vec<RawMessage>> {
            Ok(vec![])
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

    /// Keeps scheduled tasks so tests can tick them by hand
    #[derive(Default)]
    struct ManualScheduler {
        tasks: Mutex<Vec<(String, RepeatedTask)>>,
        stopped: AtomicBool,
    }

    impl ManualScheduler {
        fn task(&self, index: usize) -> RepeatedTask {
            Arc::clone(&self.tasks.lock().unwrap()[index].1)
        }
    }

    #[async_trait]
    impl PeriodicScheduler for ManualScheduler {
        fn schedule(&self, name: &str, _interval: Duration, task: RepeatedTask) {
            self.tasks.lock().unwrap().push((name.to_string(), task));
        }
        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
        async fn await_terminated(&self) {}
    }

    struct FixedFlags(i64, i64);

    impl FeatureFlags for FixedFlags {
        fn get_int(&self, feature: &str, _key: &str, default: i64) -> i64 {
            match feature {
                CONSUMERS_PER_QUEUE => self.0,
                POD_CONSUMERS_PER_QUEUE => self.1,
                _ => default,
            }
        }
    }

    /// Grants every lease; remembers what is held
    #[derive(Default)]
    struct GenerousLeases {
        held: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl LeaseManager for GenerousLeases {
        async fn try_acquire(&self, lease: &str) -> Result<bool> {
            self.held.lock().unwrap().insert(lease.to_string());
            Ok(true)
        }
        async fn is_held_by_other(&self, _: &str) -> Result<bool> {
            Ok(false)
        }
        async fn release(&self, lease: &str) -> Result<()> {
            self.held.lock().unwrap().remove(lease);
            Ok(())
        }
    }

    /// Pod allocation that tests can change between ticks
    struct DialFlags {
        pod: AtomicI64,
    }

    impl FeatureFlags for DialFlags {
        fn get_int(&self, feature: &str, _key: &str, default: i64) -> i64 {
            match feature {
                POD_CONSUMERS_PER_QUEUE => self.pod.load(Ordering::SeqCst),
                _ => default,
            }
        }
    }

    #[derive(Default)]
    struct ToggleSwitch {
        off: AtomicBool,
    }

    impl AsyncSwitch for ToggleSwitch {
        fn is_enabled(&self, key: &str) -> bool {
            assert_eq!(key, CONSUMER_SWITCH_KEY);
            !self.off.load(Ordering::SeqCst)
        }
    }

    fn build_consumer(
        flags: FixedFlags,
        install_retry_queue: bool,
    ) -> (Arc<ManualScheduler>, Arc<GenerousLeases>, JobConsumer) {
        build_consumer_with(Arc::new(flags), install_retry_queue, Arc::new(AlwaysEnabled))
    }

    fn build_consumer_with(
        flags: Arc<dyn FeatureFlags>,
        install_retry_queue: bool,
        switch: Arc<dyn AsyncSwitch>,
    ) -> (Arc<ManualScheduler>, Arc<GenerousLeases>, JobConsumer) {
        let config = JobQueueConfig {
            install_retry_queue,
            receive_wait_time_secs: 0,
            flag_cache_ttl_ms: 0,
            ..Default::default()
        };
        let backend = Arc::new(EmptyBackend { unknown: "nowhere" });
        let scheduler = Arc::new(ManualScheduler::default());
        let leases = Arc::new(GenerousLeases::default());
        let consumer = JobConsumer::new(
            config.clone(),
            ConsumerDependencies {
                resolver: Arc::new(QueueResolver::new(&config, backend)),
                leases: leases.clone(),
                flags,
                scheduler: scheduler.clone(),
                metrics: Arc::new(NoopMetrics),
                time_provider: Arc::new(SystemTimeProvider),
                switch,
            },
        );
        (scheduler, leases, consumer)
    }

    async fn receivers_of(consumer: &JobConsumer, queue: &str) -> Vec<Arc<Receiver>> {
        let sub = consumer.subscriptions.lock().unwrap()[&QueueName::new(queue)].clone();
        let receivers = sub.receivers.lock().await.clone();
        receivers
    }

    async fn noop(_job: Arc<Job>) -> HandlerResult {
        Ok(())
    }

    #[tokio::test]
    async fn test_subscribe_schedules_one_task_with_retry_queue() {
        let (scheduler, _, consumer) = build_consumer(FixedFlags(1, 2), true);
        consumer.subscribe(QueueName::new("orders"), noop).await.unwrap();

        let tasks = scheduler.tasks.lock().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].0, "jobqueue-consumer-orders");
        drop(tasks);

        let sub = consumer.subscriptions.lock().unwrap()[&QueueName::new("orders")].clone();
        let names: Vec<_> = sub.queues.iter().map(|q| q.name.as_str().to_string()).collect();
        assert_eq!(names, vec!["orders", "orders_retryq"]);
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_subscriptions_fail() {
        let (_, _, consumer) = build_consumer(FixedFlags(1, 1), false);
        consumer.subscribe(QueueName::new("orders"), noop).await.unwrap();

        let err = consumer
            .subscribe(QueueName::new("orders"), noop)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = consumer
            .subscribe(QueueName::new("nowhere"), noop)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ResolutionFailure(_)));
        assert!(!consumer.is_subscribed(&QueueName::new("nowhere")));
    }

    #[tokio::test]
    async fn test_tick_runs_fixed_allocation_without_leases() {
        let (scheduler, leases, consumer) = build_consumer(FixedFlags(5, 2), false);
        let q = QueueName::new("orders");
        consumer.subscribe(q.clone(), noop).await.unwrap();

        assert_eq!((scheduler.task(0))().await, TaskStatus::NoWork);
        assert_eq!(consumer.active_receivers(&q), 2);
        assert!(leases.held.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tick_claims_leases_and_unsubscribe_releases_them() {
        let (scheduler, leases, consumer) = build_consumer(FixedFlags(3, -1), false);
        let q = QueueName::new("orders");
        consumer.subscribe(q.clone(), noop).await.unwrap();

        (scheduler.task(0))().await;
        assert_eq!(consumer.active_receivers(&q), 3);
        assert_eq!(leases.held.lock().unwrap().len(), 3);
        assert!(leases.held.lock().unwrap().contains("sqs-job-consumer-orders-1"));

        assert!(consumer.unsubscribe(&q).await.unwrap());
        assert!(leases.held.lock().unwrap().is_empty());
        assert_eq!((scheduler.task(0))().await, TaskStatus::NoReschedule);
        assert!(!consumer.unsubscribe(&q).await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_stops_scheduler_and_drops_subscriptions() {
        let (scheduler, leases, consumer) = build_consumer(FixedFlags(2, -1), false);
        consumer.subscribe(QueueName::new("a"), noop).await.unwrap();
        consumer.subscribe(QueueName::new("b"), noop).await.unwrap();
        (scheduler.task(0))().await;
        (scheduler.task(1))().await;

        consumer.shutdown().await;
        assert!(scheduler.stopped.load(Ordering::SeqCst));
        assert!(consumer.subscribed_queues().is_empty());
        assert!(leases.held.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shrinking_allocation_drains_surplus_receivers() {
        let flags = Arc::new(DialFlags {
            pod: AtomicI64::new(3),
        });
        let (scheduler, _, consumer) =
            build_consumer_with(flags.clone(), false, Arc::new(AlwaysEnabled));
        let q = QueueName::new("orders");
        consumer.subscribe(q.clone(), noop).await.unwrap();

        (scheduler.task(0))().await;
        let before = receivers_of(&consumer, "orders").await;
        assert_eq!(before.len(), 3);
        assert!(before.iter().all(|r| r.state() == ReceiverState::Running));

        flags.pod.store(1, Ordering::SeqCst);
        (scheduler.task(0))().await;
        assert_eq!(consumer.active_receivers(&q), 1);
        let after = receivers_of(&consumer, "orders").await;
        assert_eq!(after.len(), 1);
        assert!(Arc::ptr_eq(&after[0], &before[0]));

        tokio::time::timeout(Duration::from_secs(1), async {
            while before[1..].iter().any(|r| r.state() != ReceiverState::Stopped) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("surplus receivers never stopped");
        assert_eq!(before[0].state(), ReceiverState::Running);

        flags.pod.store(0, Ordering::SeqCst);
        assert_eq!((scheduler.task(0))().await, TaskStatus::NoWork);
        assert!(receivers_of(&consumer, "orders").await.is_empty());
    }

    #[tokio::test]
    async fn test_switch_pauses_and_resumes_every_subscription() {
        let switch = Arc::new(ToggleSwitch::default());
        let (scheduler, leases, consumer) =
            build_consumer_with(Arc::new(FixedFlags(2, -1)), false, switch.clone());
        let q = QueueName::new("orders");
        consumer.subscribe(q.clone(), noop).await.unwrap();

        switch.off.store(true, Ordering::SeqCst);
        assert_eq!((scheduler.task(0))().await, TaskStatus::NoWork);
        assert_eq!((scheduler.task(0))().await, TaskStatus::NoWork);
        assert!(consumer.is_paused());
        assert_eq!(consumer.active_receivers(&q), 0);
        assert!(leases.held.lock().unwrap().is_empty());

        switch.off.store(false, Ordering::SeqCst);
        (scheduler.task(0))().await;
        assert!(!consumer.is_paused());
        assert_eq!(consumer.active_receivers(&q), 2);
        assert_eq!(leases.held.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_subscription_polls_only_its_queue() {
        let (scheduler, _, consumer) = build_consumer(FixedFlags(1, 1), true);
        let q = QueueName::new("reports");
        consumer
            .subscribe_batch(q.clone(), |_jobs: Vec<Arc<Job>>| async move {
                HandlerResult::Ok(())
            })
            .await
            .unwrap();

        let sub = consumer.subscriptions.lock().unwrap()[&q].clone();
        assert_eq!(sub.queues.len(), 1);
        assert!(matches!(sub.handler, SubscriptionHandler::Batch(_)));

        assert_eq!((scheduler.task(0))().await, TaskStatus::NoWork);
        let receivers = receivers_of(&consumer, "reports").await;
        assert!(matches!(receivers[0].as_ref(), Receiver::Batch(_)));

        let err = consumer.subscribe(q, noop).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_subscribe_drops_cached_flag_values() {
        let flags = Arc::new(DialFlags {
            pod: AtomicI64::new(1),
        });
        let config = JobQueueConfig {
            flag_cache_ttl_ms: 60_000,
            install_retry_queue: false,
            receive_wait_time_secs: 0,
            ..Default::default()
        };
        let consumer = JobConsumer::new(
            config.clone(),
            ConsumerDependencies {
                resolver: Arc::new(QueueResolver::new(
                    &config,
                    Arc::new(EmptyBackend { unknown: "nowhere" }),
                )),
                leases: Arc::new(GenerousLeases::default()),
                flags: flags.clone(),
                scheduler: Arc::new(ManualScheduler::default()),
                metrics: Arc::new(NoopMetrics),
                time_provider: Arc::new(SystemTimeProvider),
                switch: Arc::new(AlwaysEnabled),
            },
        );
        assert_eq!(consumer.core.flags.get_int(POD_CONSUMERS_PER_QUEUE, "a", -1), 1);

        flags.pod.store(4, Ordering::SeqCst);
        assert_eq!(consumer.core.flags.get_int(POD_CONSUMERS_PER_QUEUE, "a", -1), 1);
        consumer.subscribe(QueueName::new("a"), noop).await.unwrap();
        assert_eq!(consumer.core.flags.get_int(POD_CONSUMERS_PER_QUEUE, "a", -1), 4);
    }
}

