//! Notification jobs: priority queue, delivery workers, retry and dead letters.
//!
//! ## Design
//!
//! - Four priority lists drained urgent to low, FIFO within a list
//! - Deferred jobs wait in a sorted set until a maintenance thread promotes them
//! - Failed attempts retry with exponential backoff (2s, 4s, 8s, ...)
//! - Jobs out of retries are dead-lettered and can be re-queued by id
//! - Claims are indexed so attempts lost with a crashed worker are settled
//!
//! ## Components
//!
//! - `Job`: wire-format job with template reference and data
//! - `JobQueue`: enqueue, poll, settle, inspect
//! - `WorkerPool`: threads that render and send claimed jobs
//! - `TemplateRenderer` / `MessageTransport`: delivery seams

pub mod delivery;
pub mod executor;
pub mod outcome;
pub mod queue;
pub mod types;

pub use delivery::{
    DeliveryError, FileTemplateRenderer, LogTransport, MemoryTemplateRenderer, MessageTransport,
    OutboundMessage, TemplateRenderer,
};
pub use executor::{PoolStats, WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
pub use outcome::{DEAD_LETTER_QUEUE, DEFAULT_DEAD_LETTER_LIMIT, RESULT_TTL};
pub use queue::{ClaimedJob, JobQueue, PROCESSING_TTL, QueueError, QueueStats};
pub use types::{
    DeadLetterEntry, DeliveryStatus, EventNotification, Job, JobKind, JobResult,
    OrganizationInvitation, Priority, Settlement, TemplateData, TicketConfirmation, WelcomeEmail,
};
