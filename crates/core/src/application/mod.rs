// Application Layer - Consumer and producer services

pub mod allocator;
pub mod constants;
pub mod consumer;
pub mod enqueue;
pub mod flags;
pub mod handler;
pub mod job;
pub mod panic_guard;
pub mod receiver;
pub mod resolver;
pub mod shutdown;
pub mod visibility;

// Re-exports
pub use allocator::ConsumerAllocator;
pub use consumer::{ConsumerDependencies, JobConsumer};
pub use enqueue::{EnqueueOptions, EnqueueRequest, JobQueue};
pub use flags::FlagCache;
pub use handler::{BatchJobHandler, HandlerError, HandlerResult, JobHandler};
pub use job::{Job, JobContext};
pub use receiver::{BatchQueueReceiver, QueueReceiver, ReceiverSettings, ReceiverState};
pub use resolver::{QueueResolver, ResolvedQueue};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use visibility::VisibilityTimeoutCalculator;
