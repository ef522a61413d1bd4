//! Shared, lock-light job progress.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::defaults::SPEED_HISTORY_LEN;

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Probing,
    Downloading,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    /// The job will not make further progress in this run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Paused | JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Probing => "probing",
            JobStatus::Downloading => "downloading",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct Meta {
    status: JobStatus,
    error: Option<String>,
    started: Option<Instant>,
    finished: Option<Instant>,
    speed: f64,
    history: VecDeque<f64>,
}

/// Single source of truth for one job's progress.
///
/// Byte and connection counters are atomics updated by workers; status, error
/// and the smoothed speed (written only by the aggregator) sit behind a mutex.
#[derive(Debug)]
pub struct ProgressState {
    downloaded: AtomicU64,
    total: AtomicU64,
    total_known: AtomicBool,
    active_connections: AtomicUsize,
    meta: Mutex<Meta>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressState {
    pub fn new() -> Self {
        Self {
            downloaded: AtomicU64::new(0),
            total: AtomicU64::new(0),
            total_known: AtomicBool::new(false),
            active_connections: AtomicUsize::new(0),
            meta: Mutex::new(Meta {
                status: JobStatus::Queued,
                error: None,
                started: None,
                finished: None,
                speed: 0.0,
                history: VecDeque::with_capacity(SPEED_HISTORY_LEN),
            }),
        }
    }

    fn meta(&self) -> MutexGuard<'_, Meta> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_total(&self, total: Option<u64>) {
        match total {
            Some(t) => {
                self.total.store(t, Ordering::Release);
                self.total_known.store(true, Ordering::Release);
            }
            None => self.total_known.store(false, Ordering::Release),
        }
    }

    pub fn total(&self) -> Option<u64> {
        self.total_known
            .load(Ordering::Acquire)
            .then(|| self.total.load(Ordering::Acquire))
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    /// Count `n` freshly flushed bytes. Never exceeds a known total.
    pub fn add_downloaded(&self, n: u64) {
        let cap = self.total().unwrap_or(u64::MAX);
        let _ = self
            .downloaded
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.saturating_add(n).min(cap))
            });
    }

    /// Un-count `n` bytes of a non-resumable chunk that will be fetched again.
    pub fn discard(&self, n: u64) {
        let _ = self
            .downloaded
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.saturating_sub(n))
            });
    }

    /// Seed the counter (resume from a part file).
    pub fn set_downloaded(&self, n: u64) {
        let n = self.total().map_or(n, |t| n.min(t));
        self.downloaded.store(n, Ordering::Release);
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Mark one connection in use until the guard drops.
    pub fn connection(self: &Arc<Self>) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard(Arc::clone(self))
    }

    pub fn status(&self) -> JobStatus {
        self.meta().status
    }

    pub fn set_status(&self, status: JobStatus) {
        let mut m = self.meta();
        if status == JobStatus::Downloading && m.started.is_none() {
            m.started = Some(Instant::now());
        }
        if status.is_terminal() && m.finished.is_none() {
            m.finished = Some(Instant::now());
        }
        m.status = status;
    }

    /// Terminal failure with its reason.
    pub fn fail(&self, error: impl Into<String>) {
        self.meta().error = Some(error.into());
        self.set_status(JobStatus::Failed);
    }

    pub fn error(&self) -> Option<String> {
        self.meta().error.clone()
    }

    /// Time spent downloading so far (frozen once the job settles).
    pub fn elapsed(&self) -> Duration {
        let m = self.meta();
        match (m.started, m.finished) {
            (Some(s), Some(f)) => f.saturating_duration_since(s),
            (Some(s), None) => s.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Store a smoothed speed sample; the history keeps the newest
    /// `SPEED_HISTORY_LEN` values.
    pub fn record_speed(&self, speed: f64) {
        let mut m = self.meta();
        m.speed = speed;
        if m.history.len() == SPEED_HISTORY_LEN {
            m.history.pop_front();
        }
        m.history.push_back(speed);
    }

    pub fn speed(&self) -> f64 {
        self.meta().speed
    }

    pub fn speed_history(&self) -> Vec<f64> {
        self.meta().history.iter().copied().collect()
    }
}

/// Decrements `active_connections` on drop.
#[derive(Debug)]
pub struct ConnectionGuard(Arc<ProgressState>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}
