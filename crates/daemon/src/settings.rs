//! Daemon settings
//!
//! Layered with the `config` crate: an optional TOML file, then
//! `DROVER__*` environment variables (`__` separates nested keys, e.g.
//! `DROVER__JOBQUEUE__BATCH_SIZE=5`).

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use drover_core::config::JobQueueConfig;
use drover_core::domain::QueueName;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Directory for the rolling log file; console only when unset
    pub log_dir: Option<String>,
    /// Queues to subscribe when none are given on the command line
    pub queues: Vec<QueueName>,
    /// Identity used when claiming consumer leases; random when unset
    pub pod_id: Option<String>,
    pub lease_ttl_secs: u64,
    /// Initial feature-flag values, keyed by flag name
    pub flags: HashMap<String, i64>,
    pub jobqueue: JobQueueConfig,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_dir: None,
            queues: Vec::new(),
            pod_id: None,
            lease_ttl_secs: 30,
            flags: HashMap::new(),
            jobqueue: JobQueueConfig::default(),
        }
    }
}

impl DaemonSettings {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

/// Load settings from `path` (tilde-expanded) and the environment
pub fn load(path: Option<&str>) -> Result<DaemonSettings> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        let expanded = shellexpand::tilde(path).into_owned();
        builder = builder.add_source(File::new(&expanded, FileFormat::Toml).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix("DROVER")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("queues")
            .try_parsing(true),
    );

    let settings: DaemonSettings = builder
        .build()
        .context("failed to read configuration")?
        .try_deserialize()
        .context("invalid configuration")?;
    settings.jobqueue.validate()?;
    Ok(settings)
}
