//! Task scheduling: the work queue, worker pool, connection limits, and the
//! engine that drives a job from probe to finalized file.

mod engine;
mod limiter;
mod pool;
mod queue;
mod task;
mod worker;

pub use engine::{DownloadReport, Engine};
pub use limiter::{host_key, ConnectionGrant, ConnectionLimiter};
pub use queue::{Lease, QueueOutcome, QueueStats, Reclaim, Settle, WorkQueue};
pub use task::{CancelReason, TaskHandle, TaskId, TaskProgress, WriteOutcome};
