//! Periodic sampler that smooths throughput and publishes snapshots.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::snapshot::ProgressSnapshot;
use super::speed::SpeedMeter;
use super::state::ProgressState;
use crate::config::defaults::PROGRESS_CHANNEL_BUFFER;

/// Publishing half of a progress channel. A lagging receiver loses the oldest
/// snapshots; the sender never blocks and the newest snapshot is always kept.
pub type ProgressSender = broadcast::Sender<ProgressSnapshot>;
pub type ProgressReceiver = broadcast::Receiver<ProgressSnapshot>;

/// Bounded progress channel of `PROGRESS_CHANNEL_BUFFER` snapshots.
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    broadcast::channel(PROGRESS_CHANNEL_BUFFER)
}

/// Handle to a running aggregator task.
pub struct Aggregator {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Aggregator {
    /// Stop sampling and publish one last snapshot reflecting the settled
    /// state. Set the terminal status before calling this.
    pub async fn finish(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "progress aggregator task failed");
        }
    }
}

/// Spawn the sampling loop on the current tokio runtime.
pub fn spawn_aggregator(
    id: String,
    filename: String,
    state: Arc<ProgressState>,
    sink: Option<ProgressSender>,
    alpha: f64,
    interval: Duration,
) -> Aggregator {
    let (stop, mut stop_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let mut meter = SpeedMeter::new(alpha, state.downloaded(), Instant::now().into_std());
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let publish = |state: &ProgressState| {
            if let Some(tx) = &sink {
                // Err only means nobody is listening right now.
                let _ = tx.send(ProgressSnapshot::capture(&id, &filename, state));
            }
        };

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let speed = meter.sample(state.downloaded(), Instant::now().into_std());
                    state.record_speed(speed);
                    publish(&state);
                }
                _ = &mut stop_rx => {
                    let speed = meter.sample(state.downloaded(), Instant::now().into_std());
                    state.record_speed(speed);
                    publish(&state);
                    break;
                }
            }
        }
    });
    Aggregator { stop, task }
}
