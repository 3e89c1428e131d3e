// Job Queue - producer side
use super::resolver::QueueResolver;
use crate::domain::metadata::METADATA_ATTRIBUTE;
use crate::domain::{DomainError, JobMetadata, QueueName, MAX_BATCH_SIZE};
use crate::error::Result;
use crate::port::{Counter, Histogram, IdProvider, MetricsSink, TimeProvider};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Optional per-job producer settings
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Generated when absent
    pub idempotence_key: Option<String>,
    pub original_trace_id: Option<String>,
    pub attributes: HashMap<String, String>,
}

/// One entry of a batch enqueue
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub body: String,
    pub options: EnqueueOptions,
}

impl EnqueueRequest {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            options: EnqueueOptions::default(),
        }
    }
}

pub struct JobQueue {
    resolver: Arc<QueueResolver>,
    metrics: Arc<dyn MetricsSink>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
}

impl JobQueue {
    pub fn new(
        resolver: Arc<QueueResolver>,
        metrics: Arc<dyn MetricsSink>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            resolver,
            metrics,
            time_provider,
            id_provider,
        }
    }

    /// Enqueue a job, returning the backend message id
    pub async fn enqueue(
        &self,
        queue: &QueueName,
        body: &str,
        attributes: HashMap<String, String>,
    ) -> Result<String> {
        self.enqueue_with(
            queue,
            body,
            EnqueueOptions {
                attributes,
                ..Default::default()
            },
        )
        .await
    }

    pub async fn enqueue_with(
        &self,
        queue: &QueueName,
        body: &str,
        options: EnqueueOptions,
    ) -> Result<String> {
        let resolved = self.resolver.resolve(queue).await?;
        let (attributes, idempotence_key) = self.attributes_for(queue, options)?;

        let started = self.time_provider.now_millis();
        let message_id = resolved
            .backend
            .send(&resolved.url, body, &attributes)
            .await?;
        self.metrics.observe(
            Histogram::SendTime,
            queue,
            (self.time_provider.now_millis() - started) as f64,
        );
        self.metrics.increment(Counter::JobsEnqueued, queue, 1);

        debug!(
            queue = %queue,
            message_id = %message_id,
            idempotence_key = %idempotence_key,
            "Job enqueued"
        );
        Ok(message_id)
    }

    /// Enqueue up to ten jobs; validated as a whole before anything is sent
    ///
    /// Sends are issued in order; on failure the jobs before it stay enqueued.
    pub async fn batch_enqueue(
        &self,
        queue: &QueueName,
        jobs: Vec<EnqueueRequest>,
    ) -> Result<Vec<String>> {
        if jobs.is_empty() || jobs.len() > MAX_BATCH_SIZE {
            return Err(DomainError::InvalidBatchSize(jobs.len()).into());
        }
        for job in &jobs {
            reject_reserved(&job.options.attributes)?;
        }

        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            ids.push(self.enqueue_with(queue, &job.body, job.options).await?);
        }
        Ok(ids)
    }

    fn attributes_for(
        &self,
        queue: &QueueName,
        options: EnqueueOptions,
    ) -> Result<(HashMap<String, String>, String)> {
        reject_reserved(&options.attributes)?;

        let idempotence_key = options
            .idempotence_key
            .unwrap_or_else(|| self.id_provider.generate_id());
        let metadata = JobMetadata {
            origin_queue: Some(queue.clone()),
            idempotence_key: Some(idempotence_key.clone()),
            original_trace_id: options.original_trace_id,
        };

        let mut attributes = options.attributes;
        attributes.insert(METADATA_ATTRIBUTE.to_string(), metadata.encode()?);
        Ok((attributes, idempotence_key))
    }
}

fn reject_reserved(attributes: &HashMap<String, String>) -> Result<()> {
    if attributes.contains_key(METADATA_ATTRIBUTE) {
        return Err(DomainError::ReservedAttribute(METADATA_ATTRIBUTE.to_string()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobQueueConfig;
    use crate::domain::RawMessage;
    use crate::error::AppError;
    use crate::port::{NoopMetrics, QueueBackend, ReceiveRequest, SystemTimeProvider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingBackend {
        sent: Mutex<Vec<(String, String, HashMap<String, String>)>>,
    }

    #[async_trait]
    impl QueueBackend for CapturingBackend {
        async fn queue_url(&self, queue: &QueueName, _: &str) -> Result<Option<String>> {
            Ok((queue.as_str() != "missing").then(|| format!("url/{}", queue)))
        }
        async fn receive_batch(&self, _: &str, _: ReceiveRequest) -> Result<Vec<RawMessage>> {
            Ok(vec![])
        }
        async fn delete(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn send(&self, url: &str, body: &str, attrs: &HashMap<String, String>) -> Result<String> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((url.into(), body.into(), attrs.clone()));
            Ok(format!("m-{}", sent.len()))
        }
        async fn change_visibility(&self, _: &str, _: &str, _: u32) -> Result<()> {
            Ok(())
        }
    }

    struct SequentialIds(AtomicUsize);

    impl IdProvider for SequentialIds {
        fn generate_id(&self) -> String {
            format!("ik-{}", self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn job_queue() -> (Arc<CapturingBackend>, JobQueue) {
        let backend = Arc::new(CapturingBackend::default());
        let resolver = Arc::new(QueueResolver::new(&JobQueueConfig::default(), backend.clone()));
        let queue = JobQueue::new(
            resolver,
            Arc::new(NoopMetrics),
            Arc::new(SystemTimeProvider),
            Arc::new(SequentialIds(AtomicUsize::new(0))),
        );
        (backend, queue)
    }

    fn metadata_of(attrs: &HashMap<String, String>) -> JobMetadata {
        JobMetadata::parse(&attrs[METADATA_ATTRIBUTE]).unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_attaches_metadata() {
        let (backend, queue) = job_queue();
        let attrs = HashMap::from([("color".to_string(), "blue".to_string())]);

        let id = queue
            .enqueue(&QueueName::new("orders"), "payload", attrs)
            .await
            .unwrap();
        assert_eq!(id, "m-1");

        let sent = backend.sent.lock().unwrap();
        assert_eq!(sent[0].0, "url/orders");
        assert_eq!(sent[0].2["color"], "blue");
        let meta = metadata_of(&sent[0].2);
        assert_eq!(meta.origin_queue, Some(QueueName::new("orders")));
        assert_eq!(meta.idempotence_key.as_deref(), Some("ik-0"));
    }

    #[tokio::test]
    async fn test_enqueue_with_keeps_caller_key() {
        let (backend, queue) = job_queue();
        queue
            .enqueue_with(
                &QueueName::new("orders"),
                "payload",
                EnqueueOptions {
                    idempotence_key: Some("mine".into()),
                    original_trace_id: Some("trace".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let meta = metadata_of(&backend.sent.lock().unwrap()[0].2);
        assert_eq!(meta.idempotence_key.as_deref(), Some("mine"));
        assert_eq!(meta.original_trace_id.as_deref(), Some("trace"));
    }

    #[tokio::test]
    async fn test_reserved_attribute_rejected() {
        let (backend, queue) = job_queue();
        let attrs = HashMap::from([(METADATA_ATTRIBUTE.to_string(), "{}".to_string())]);

        let err = queue
            .enqueue(&QueueName::new("orders"), "payload", attrs)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::ReservedAttribute(_))));
        assert!(backend.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_queue_surfaces_resolution_failure() {
        let (_, queue) = job_queue();
        let err = queue
            .enqueue(&QueueName::new("missing"), "payload", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ResolutionFailure(_)));
    }

    #[tokio::test]
    async fn test_batch_enqueue_limits() {
        let (backend, queue) = job_queue();
        let q = QueueName::new("orders");

        let ids = queue
            .batch_enqueue(&q, (0..3).map(|i| EnqueueRequest::new(format!("b{}", i))).collect())
            .await
            .unwrap();
        assert_eq!(ids, vec!["m-1", "m-2", "m-3"]);

        let too_many = (0..11).map(|i| EnqueueRequest::new(format!("x{}", i))).collect();
        tokio_test::assert_err!(queue.batch_enqueue(&q, too_many).await);
        tokio_test::assert_err!(queue.batch_enqueue(&q, vec![]).await);
        assert_eq!(backend.sent.lock().unwrap().len(), 3);
    }
}
