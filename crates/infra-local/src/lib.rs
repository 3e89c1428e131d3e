// Drover Infrastructure - In-Process Adapters
// Implements: QueueBackend, LeaseManager, FeatureFlags, MetricsSink,
// PeriodicScheduler, TimeProvider, AsyncSwitch

pub mod clock;
pub mod feature_flags;
pub mod lease_manager;
pub mod metrics;
pub mod queue_backend;
pub mod scheduler;
pub mod switch;

pub use clock::ManualTimeProvider;
pub use feature_flags::InMemoryFeatureFlags;
pub use lease_manager::{InMemoryLeaseManager, LeaseTable};
pub use metrics::InMemoryMetrics;
pub use queue_backend::{BackendOperation, InMemoryQueueBackend};
pub use scheduler::TokioRepeatedTaskQueue;
pub use switch::InMemorySwitch;
