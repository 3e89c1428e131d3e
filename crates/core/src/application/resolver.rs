//! Queue Resolver - logical queue names to physical queue handles
//!
//! Resolution precedence:
//! 1. Static external-queue entries (other account and/or region)
//! 2. Same account/region lookup through the default backend
//!
//! Dead-letter precedence:
//! 1. Configured global dead-letter queue, used for every queue
//! 2. The per-queue [`DeadLetterQueuePolicy`]

use crate::config::{ExternalQueueConfig, JobQueueConfig};
use crate::domain::{DeadLetterQueuePolicy, QueueName};
use crate::error::{AppError, Result};
use crate::port::QueueBackend;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Physical queue handle, immutable once resolved
#[derive(Clone)]
pub struct ResolvedQueue {
    pub name: QueueName,
    pub url: String,
    pub region: String,
    pub account_id: String,
    pub backend: Arc<dyn QueueBackend>,
}

impl fmt::Debug for ResolvedQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedQueue")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("region", &self.region)
            .field("account_id", &self.account_id)
            .finish()
    }
}

pub struct QueueResolver {
    region: String,
    account_id: String,
    default_backend: Arc<dyn QueueBackend>,
    regional_backends: HashMap<String, Arc<dyn QueueBackend>>,
    external_queues: HashMap<QueueName, ExternalQueueConfig>,
    dead_letter_policy: DeadLetterQueuePolicy,
    global_dead_letter_queue: Option<QueueName>,
    cache: RwLock<HashMap<QueueName, ResolvedQueue>>,
}

impl QueueResolver {
    pub fn new(config: &JobQueueConfig, default_backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            region: config.region.clone(),
            account_id: config.account_id.clone(),
            default_backend,
            regional_backends: HashMap::new(),
            external_queues: config.external_queues.clone(),
            dead_letter_policy: config.dead_letter_policy.clone(),
            global_dead_letter_queue: config.global_dead_letter_queue.clone(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register the client used for queues living in another region
    pub fn with_regional_backend(
        mut self,
        region: impl Into<String>,
        backend: Arc<dyn QueueBackend>,
    ) -> Self {
        self.regional_backends.insert(region.into(), backend);
        self
    }

    /// Resolve a queue, caching the handle for the process lifetime
    pub async fn resolve(&self, queue: &QueueName) -> Result<ResolvedQueue> {
        if let Some(resolved) = self.cache.read().unwrap().get(queue) {
            return Ok(resolved.clone());
        }

        let resolved = match self.external_queues.get(queue) {
            Some(external) => self.resolve_external(queue, external).await?,
            None => {
                let url = self.lookup_url(&self.default_backend, queue, &self.account_id).await?;
                ResolvedQueue {
                    name: queue.clone(),
                    url,
                    region: self.region.clone(),
                    account_id: self.account_id.clone(),
                    backend: Arc::clone(&self.default_backend),
                }
            }
        };

        debug!(queue = %queue, url = %resolved.url, region = %resolved.region, "Resolved queue");
        Ok(self
            .cache
            .write()
            .unwrap()
            .entry(queue.clone())
            .or_insert(resolved)
            .clone())
    }

    /// Name of the dead-letter queue for `queue`
    pub fn dead_letter_queue_name(&self, queue: &QueueName) -> QueueName {
        match &self.global_dead_letter_queue {
            Some(global) => global.clone(),
            None => self.dead_letter_policy.dead_letter_queue_for(queue),
        }
    }

    /// Resolve the dead-letter queue for `queue`
    pub async fn dead_letter_for(&self, queue: &QueueName) -> Result<ResolvedQueue> {
        let dlq = self.dead_letter_queue_name(queue);
        self.resolve(&dlq).await
    }

    async fn resolve_external(
        &self,
        queue: &QueueName,
        external: &ExternalQueueConfig,
    ) -> Result<ResolvedQueue> {
        let region = external.region.clone().unwrap_or_else(|| self.region.clone());
        let backend = if region == self.region {
            Arc::clone(&self.default_backend)
        } else {
            self.regional_backends
                .get(&region)
                .cloned()
                .ok_or_else(|| {
                    AppError::ResolutionFailure(format!(
                        "no backend configured for region {} (queue {})",
                        region, queue
                    ))
                })?
        };

        let url = match &external.url {
            Some(url) => url.clone(),
            None => self.lookup_url(&backend, queue, &external.account_id).await?,
        };

        Ok(ResolvedQueue {
            name: queue.clone(),
            url,
            region,
            account_id: external.account_id.clone(),
            backend,
        })
    }

    async fn lookup_url(
        &self,
        backend: &Arc<dyn QueueBackend>,
        queue: &QueueName,
        account_id: &str,
    ) -> Result<String> {
        backend.queue_url(queue, account_id).await?.ok_or_else(|| {
            AppError::ResolutionFailure(format!(
                "queue {} not found in account {}",
                queue, account_id
            ))
        })
    }
}
