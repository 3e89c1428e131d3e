//! Drover - Main Entry Point
//!
//! Wires the job-queue consumer against the in-process adapters and runs
//! until Ctrl+C.

mod logging;
mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use drover_core::application::{
    ConsumerDependencies, EnqueueRequest, HandlerResult, Job, JobConsumer, JobQueue, QueueResolver,
};
use drover_core::domain::QueueName;
use drover_core::port::{AlwaysEnabled, IdProvider, SystemTimeProvider, UuidProvider};
use drover_infra_local::{
    InMemoryFeatureFlags, InMemoryLeaseManager, InMemoryMetrics, InMemoryQueueBackend, LeaseTable,
    TokioRepeatedTaskQueue,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SEED_BATCH: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "drover", version, about = "Job-queue consumer daemon")]
struct Args {
    /// TOML settings file
    #[arg(short, long, env = "DROVER_CONFIG")]
    config: Option<String>,

    /// Queue to consume (repeatable); overrides `queues` from settings
    #[arg(short, long = "queue", value_name = "QUEUE")]
    queues: Vec<String>,

    /// Enqueue this many demo jobs per queue at startup
    #[arg(long, default_value_t = 0)]
    seed: usize,
}

async fn log_and_acknowledge(job: Arc<Job>) -> HandlerResult {
    info!(
        job_id = %job.id(),
        queue = %job.queue_name(),
        idempotence_key = ?job.idempotence_key(),
        receive_count = ?job.receive_count(),
        body = %job.body(),
        "Job received"
    );
    job.acknowledge().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let settings = settings::load(args.config.as_deref())?;

    // 2. Initialize logging
    let _log_guard = logging::init_logging(settings.log_dir.as_deref())?;
    info!("Drover v{} starting...", VERSION);

    let queues = if args.queues.is_empty() {
        settings.queues.clone()
    } else {
        args.queues.iter().cloned().map(QueueName::new).collect()
    };
    let queues = queues
        .into_iter()
        .map(|q| QueueName::parse(q.as_str().to_string()))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid queue name")?;
    if queues.is_empty() {
        anyhow::bail!("no queues to consume; pass --queue or set `queues`");
    }

    // 3. Setup dependencies (DI wiring)
    let config = settings.jobqueue.clone();
    let time_provider = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);

    let backend = Arc::new(InMemoryQueueBackend::new(time_provider.clone()));
    let resolver = Arc::new(QueueResolver::new(&config, backend.clone()));
    let visibility = config.default_visibility_timeout_secs;
    for queue in &queues {
        backend.create_queue_in(&config.account_id, queue, visibility);
        backend.create_queue_in(&config.account_id, &queue.retry_queue(), visibility);
        backend.create_queue_in(
            &config.account_id,
            &resolver.dead_letter_queue_name(queue),
            visibility,
        );
    }

    let pod_id = settings
        .pod_id
        .clone()
        .unwrap_or_else(|| id_provider.generate_id());
    let lease_table = Arc::new(LeaseTable::new(time_provider.clone(), settings.lease_ttl()));
    let leases = Arc::new(InMemoryLeaseManager::new(lease_table, pod_id.clone()));

    let flags = Arc::new(InMemoryFeatureFlags::new());
    for (feature, value) in &settings.flags {
        flags.set(feature, *value);
    }

    let metrics = Arc::new(InMemoryMetrics::new());
    let scheduler = Arc::new(TokioRepeatedTaskQueue::new(config.max_backoff()));

    let consumer = JobConsumer::new(
        config,
        ConsumerDependencies {
            resolver: resolver.clone(),
            leases,
            flags,
            scheduler,
            metrics: metrics.clone(),
            time_provider: time_provider.clone(),
            switch: Arc::new(AlwaysEnabled),
        },
    );

    // 4. Seed demo jobs
    if args.seed > 0 {
        let producer = JobQueue::new(resolver, metrics.clone(), time_provider, id_provider);
        for queue in &queues {
            let mut remaining = args.seed;
            while remaining > 0 {
                let count = remaining.min(SEED_BATCH);
                let jobs = (0..count)
                    .map(|i| EnqueueRequest::new(format!("demo job {}", args.seed - remaining + i)))
                    .collect();
                producer.batch_enqueue(queue, jobs).await?;
                remaining -= count;
            }
            info!(queue = %queue, count = args.seed, "Seeded demo jobs");
        }
    }

    // 5. Subscribe
    for queue in &queues {
        consumer
            .subscribe(queue.clone(), log_and_acknowledge)
            .await
            .with_context(|| format!("subscribe to {} failed", queue))?;
    }

    info!(pod_id = %pod_id, queues = ?queues, "System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    // 6. Wait for shutdown signal
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutdown signal received. Exiting gracefully...");

    // 7. Graceful shutdown
    consumer.shutdown().await;

    for (name, queue, value) in metrics.counter_snapshot() {
        info!(metric = name, queue = %queue, value, "Final counter");
    }
    info!("Shutdown complete.");

    Ok(())
}
