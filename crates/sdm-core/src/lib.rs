//! Segmented multi-connection download engine.
//!
//! A job is probed, planned into byte-range chunks, and fetched by a pool of
//! worker threads writing straight into a preallocated part file. A monitor
//! reclaims stalled tasks and splits slow ones; an aggregator publishes
//! smoothed progress snapshots. See [`Engine::run`].

pub mod config;
pub mod control;
pub mod job;
pub mod logging;
pub mod monitor;
pub mod planner;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod transport;

pub use config::RuntimeConfig;
pub use control::{JobControl, StopReason};
pub use job::{DownloadJob, JobRequest, ResumePoint};
pub use progress::{progress_channel, JobStatus, ProgressReceiver, ProgressSender, ProgressSnapshot};
pub use scheduler::{DownloadReport, Engine};
