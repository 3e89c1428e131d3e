// Port Layer - Interfaces for external collaborators

pub mod feature_flags;
pub mod id_provider; // For deterministic testing
pub mod lease_manager;
pub mod metrics;
pub mod periodic_scheduler;
pub mod queue_backend;
pub mod switch;
pub mod time_provider;

// Re-exports
pub use feature_flags::FeatureFlags;
pub use id_provider::{IdProvider, UuidProvider};
pub use lease_manager::LeaseManager;
pub use metrics::{Counter, Histogram, MetricsSink, NoopMetrics};
pub use periodic_scheduler::{PeriodicScheduler, RepeatedTask, TaskStatus};
pub use queue_backend::{QueueBackend, ReceiveRequest};
pub use switch::{AlwaysEnabled, AsyncSwitch};
pub use time_provider::{SystemTimeProvider, TimeProvider};
