//! Stall and slow-worker detection.
//!
//! On every tick the monitor looks at the job's active tasks. A task with no
//! flushed bytes for longer than the stall timeout is reclaimed: cancelled,
//! pinned to what is on disk, and its remainder re-queued. A task running
//! below `threshold × mean task speed` for the whole grace period has its
//! remaining range split so an idle or new worker takes the upper half.
//! Both checks need at least two active tasks.


use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::ResolvedConfig;
use crate::planner::Chunk;
use crate::scheduler::{Reclaim, TaskId, WorkQueue};

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub reclaimed: Vec<(TaskId, Reclaim)>,
    pub split: Vec<(TaskId, Chunk)>,
}

impl MonitorReport {
    pub fn is_empty(&self) -> bool {
        self.reclaimed.is_empty() && self.split.is_empty()
    }
}

/// Detection thresholds for one job.
#[derive(Debug, Clone)]
pub struct Monitor {
    queue: Arc<WorkQueue>,
    stall_timeout: Duration,
    slow_threshold: f64,
    slow_grace: Duration,
    min_split: u64,
    align: u64,
}

impl Monitor {
    pub fn new(queue: Arc<WorkQueue>, cfg: &ResolvedConfig, align: u64) -> Self {
        Self {
            queue,
            stall_timeout: cfg.stall_timeout,
            slow_threshold: cfg.slow_worker_threshold,
            slow_grace: cfg.slow_worker_grace,
            min_split: cfg.chunk.min,
            align,
        }
    }

    /// One detection pass at `now`.
    pub fn tick(&self, now: Instant) -> MonitorReport {
        let mut report = MonitorReport::default();
        let tasks = self.queue.active_tasks();
        if tasks.len() < 2 {
            return report;
        }

        let speeds: Vec<f64> = tasks.iter().map(|t| t.lock().speed()).collect();
        let moving: Vec<f64> = speeds.iter().copied().filter(|s| *s > 0.0).collect();
        let mean = if moving.is_empty() {
            0.0
        } else {
            moving.iter().sum::<f64>() / moving.len() as f64
        };

        for (task, speed) in tasks.iter().zip(speeds) {
            let (idle, slow_for) = {
                let mut p = task.lock();
                if p.cancelled.is_some() {
                    continue;
                }
                let idle = p.idle_for(now);
                let slow = mean > 0.0 && speed < self.slow_threshold * mean;
                let slow_for = if slow {
                    let since = *p.slow_since.get_or_insert(now);
                    Some(now.saturating_duration_since(since))
                } else {
                    p.slow_since = None;
                    None
                };
                (idle, slow_for)
            };

            if idle > self.stall_timeout {
                let outcome = self.queue.reclaim(task);
                if outcome != Reclaim::Skipped {
                    tracing::warn!(task = task.id, chunk = %task.chunk, ?idle, ?outcome, "stalled task reclaimed");
                    report.reclaimed.push((task.id, outcome));
                }
                continue;
            }

            if matches!(slow_for, Some(d) if d >= self.slow_grace) {
                if let Some(upper) = self.queue.split(task, self.min_split, self.align) {
                    tracing::info!(task = task.id, speed, mean, moved = %upper, "slow task split");
                    report.split.push((task.id, upper));
                }
            }
        }
        report
    }
}

/// Handle to the monitor loop.
pub struct MonitorTask {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl MonitorTask {
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "monitor task failed");
        }
    }
}

/// Run `monitor.tick` every `interval` until stopped.
pub fn spawn_monitor(monitor: Monitor, interval: Duration) -> MonitorTask {
    let (stop, mut stop_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    monitor.tick(Instant::now());
                }
                _ = &mut stop_rx => break,
            }
        }
    });
    MonitorTask { stop, task }
}
