//! Live progress: shared counters, throughput smoothing, and snapshot publishing.
//!
//! Workers add flushed bytes to [`ProgressState`]; the aggregator samples it on
//! a fixed interval, smooths the rate with an EMA, and broadcasts
//! [`ProgressSnapshot`]s to observers.

mod aggregator;
mod snapshot;
mod speed;
mod state;

pub use aggregator::{progress_channel, spawn_aggregator, Aggregator, ProgressReceiver, ProgressSender};
pub use snapshot::ProgressSnapshot;
pub use speed::{Ema, SpeedMeter};
pub use state::{ConnectionGuard, JobStatus, ProgressState};
