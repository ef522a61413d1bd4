//! In-flight attempts at a chunk.
//!
//! A task's progress sits behind its own lock, shared by the owning worker
//! (which writes and counts bytes) and the monitor (which may pin or shrink
//! `stop_at`). Bytes are written to the part file while the lock is held, so
//! whatever the monitor observes as `written` is already on disk.

use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::defaults::TASK_SPEED_WINDOW;
use crate::planner::Chunk;
use crate::progress::Ema;
use crate::storage::PartFile;

pub type TaskId = u64;

/// Why a task was cancelled from outside its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Reclaimed by the monitor; the remainder is already queued again.
    Stalled,
    /// The job is stopping (pause, cancel, or a fatal error elsewhere).
    Stopped,
}

/// Result of handing a received block to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// All bytes written.
    Written(usize),
    /// Only the first `n` bytes fit before `stop_at`; the transfer should end.
    Boundary(usize),
    /// Nothing written; the task was cancelled.
    Cancelled,
}

/// Mutable state of one task. Lock order: queue lock, then this.
#[derive(Debug)]
pub struct TaskProgress {
    /// Bytes flushed from `chunk.start`.
    pub written: u64,
    /// Exclusive end this task may write up to. Only ever shrinks.
    pub stop_at: u64,
    pub cancelled: Option<CancelReason>,
    pub started: Instant,
    pub last_progress: Instant,
    /// Set by the monitor while the task runs below the slow threshold.
    pub slow_since: Option<Instant>,
    speed: Ema,
    window_start: Instant,
    window_bytes: u64,
}

impl TaskProgress {
    /// Account `n` flushed bytes at `now`; samples speed over windows of at
    /// least `TASK_SPEED_WINDOW`.
    pub fn observe(&mut self, n: u64, now: Instant) {
        self.written += n;
        self.window_bytes += n;
        self.last_progress = now;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= TASK_SPEED_WINDOW {
            self.speed
                .update(self.window_bytes as f64 / elapsed.as_secs_f64());
            self.window_start = now;
            self.window_bytes = 0;
        }
    }

    /// Smoothed bytes per second.
    pub fn speed(&self) -> f64 {
        self.speed.value()
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_progress)
    }
}

/// One attempt at `chunk`, owned by a single worker.
#[derive(Debug)]
pub struct TaskHandle {
    pub id: TaskId,
    pub chunk: Chunk,
    progress: Mutex<TaskProgress>,
}

impl TaskHandle {
    pub fn new(id: TaskId, chunk: Chunk, alpha: f64, now: Instant) -> Self {
        Self {
            id,
            chunk,
            progress: Mutex::new(TaskProgress {
                written: 0,
                stop_at: chunk.end,
                cancelled: None,
                started: now,
                last_progress: now,
                slow_since: None,
                speed: Ema::new(alpha),
                window_start: now,
                window_bytes: 0,
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, TaskProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.lock().cancelled
    }

    /// The range still to fetch: `[start + written, stop_at)`.
    pub fn pending_range(&self) -> Chunk {
        let p = self.lock();
        self.range_of(&p)
    }

    pub(crate) fn range_of(&self, p: &TaskProgress) -> Chunk {
        Chunk {
            start: self.chunk.start + p.written,
            end: p.stop_at,
            attempt: self.chunk.attempt,
        }
    }

    /// Write a received block at the task's current offset, clamped to
    /// `stop_at`, then count it. The write and the count happen under the
    /// task lock.
    pub fn write(&self, data: &[u8], part: &PartFile, now: Instant) -> io::Result<WriteOutcome> {
        let mut p = self.lock();
        if p.cancelled.is_some() {
            return Ok(WriteOutcome::Cancelled);
        }
        let offset = self.chunk.start + p.written;
        let room = p.stop_at.saturating_sub(offset);
        let n = (data.len() as u64).min(room) as usize;
        if n > 0 {
            part.write_at(offset, &data[..n])?;
            p.observe(n as u64, now);
        }
        Ok(if n < data.len() {
            WriteOutcome::Boundary(n)
        } else {
            WriteOutcome::Written(n)
        })
    }
}
