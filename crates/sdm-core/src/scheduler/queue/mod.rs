//! Work queue: the single authority over which task owns which byte range.
//!
//! Pending chunks wait here (optionally until a backoff instant); handing one
//! to a worker turns it into an active task. Settling a task, reclaiming a
//! stalled one, and splitting a slow one all happen under the queue lock, so a
//! range is never owned twice.


use anyhow::anyhow;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::task::{CancelReason, TaskHandle, TaskId};
use crate::control::StopReason;
use crate::planner::{align_down, Chunk};

/// Longest a worker sleeps before re-checking the queue.
const IDLE_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
struct Queued {
    chunk: Chunk,
    not_before: Option<Instant>,
}

impl Queued {
    fn ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |t| t <= now)
    }
}

/// Counters for the job report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub retries: u32,
    pub throttled: u32,
    pub reclaimed: u32,
    pub splits: u32,
}

/// How a worker hands a task back.
#[derive(Debug)]
pub enum Settle {
    /// Every byte up to `stop_at` is written.
    Done,
    /// Transient failure: queue the remainder with the attempt bumped.
    Retry { not_before: Instant, throttled: bool },
    /// Put the remainder back as-is (job stopping).
    Abandon,
    /// Fatal: fail the job.
    Fail(anyhow::Error),
}

/// What the monitor did to a stalled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    /// Remainder re-queued. Stalls do not spend the chunk's retry budget.
    Requeued(Chunk),
    /// Nothing was left to fetch.
    Empty,
    /// Task already settled or cancelled.
    Skipped,
}

/// Final state once no worker holds a task.
#[derive(Debug)]
pub enum QueueOutcome {
    Completed,
    Stopped(StopReason),
    Failed(anyhow::Error),
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<Queued>,
    active: BTreeMap<TaskId, Arc<TaskHandle>>,
    next_id: TaskId,
    waiting: usize,
    stopping: Option<StopReason>,
    failure: Option<anyhow::Error>,
    stats: QueueStats,
}

impl QueueState {
    fn halted(&self) -> bool {
        self.stopping.is_some() || self.failure.is_some()
    }

    fn settled(&self) -> bool {
        self.active.is_empty() && (self.pending.is_empty() || self.halted())
    }

    fn cancel_active(&mut self) {
        for task in self.active.values() {
            let mut p = task.lock();
            p.cancelled.get_or_insert(CancelReason::Stopped);
        }
    }

    fn fail(&mut self, err: anyhow::Error) {
        if self.failure.is_none() {
            tracing::warn!(error = %format!("{err:#}"), "job failing");
            self.failure = Some(err);
        }
        self.cancel_active();
    }
}

/// Shared queue of chunks and active tasks for one job.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
    alpha: f64,
}

impl WorkQueue {
    /// `alpha` smooths task speeds.
    pub fn new(chunks: impl IntoIterator<Item = Chunk>, alpha: f64) -> Self {
        let pending = chunks
            .into_iter()
            .filter(|c| !c.is_empty())
            .map(|chunk| Queued {
                chunk,
                not_before: None,
            })
            .collect();
        Self {
            state: Mutex::new(QueueState {
                pending,
                active: BTreeMap::new(),
                next_id: 1,
                waiting: 0,
                stopping: None,
                failure: None,
                stats: QueueStats::default(),
            }),
            cond: Condvar::new(),
            alpha,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a chunk is ready and return it as a leased task. `None`
    /// once the job is stopping, failed, or has nothing pending or active.
    pub fn next_task(&self) -> Option<Lease<'_>> {
        let mut st = self.lock();
        loop {
            if st.halted() {
                return None;
            }
            let now = Instant::now();
            if let Some(pos) = st.pending.iter().position(|q| q.ready(now)) {
                let queued = st.pending.remove(pos)?;
                let id = st.next_id;
                st.next_id += 1;
                let task = Arc::new(TaskHandle::new(id, queued.chunk, self.alpha, now));
                st.active.insert(id, Arc::clone(&task));
                return Some(Lease {
                    queue: self,
                    task,
                    settled: false,
                });
            }
            if st.pending.is_empty() && st.active.is_empty() {
                return None;
            }
            let wait = st
                .pending
                .iter()
                .filter_map(|q| q.not_before)
                .min()
                .map_or(IDLE_WAIT, |t| t.saturating_duration_since(now).min(IDLE_WAIT));
            st.waiting += 1;
            st = self
                .cond
                .wait_timeout(st, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            st.waiting -= 1;
        }
    }

    /// Hand a task back. Returns the bytes the caller must un-count from
    /// progress (non-zero only for unranged tasks that must start over).
    fn settle(&self, task: &TaskHandle, settle: Settle, ranged: bool) -> u64 {
        let mut st = self.lock();
        st.active.remove(&task.id);
        let (remainder, written, cancelled) = {
            let p = task.lock();
            (task.range_of(&p), p.written, p.cancelled)
        };
        let mut discard = 0;

        if cancelled == Some(CancelReason::Stalled) {
            // The monitor re-queued the remainder when it reclaimed the task.
        } else {
            let settle = match settle {
                Settle::Done => Settle::Done,
                Settle::Fail(e) => Settle::Fail(e),
                _ if st.halted() => Settle::Abandon,
                other => other,
            };
            let requeue = if ranged {
                remainder
            } else {
                discard = written;
                Chunk {
                    start: task.chunk.start,
                    ..remainder
                }
            };
            match settle {
                Settle::Done => discard = 0,
                Settle::Retry {
                    not_before,
                    throttled,
                } => {
                    st.stats.retries += 1;
                    if throttled {
                        st.stats.throttled += 1;
                    }
                    if !requeue.is_empty() {
                        st.pending.push_back(Queued {
                            chunk: requeue.next_attempt(),
                            not_before: Some(not_before),
                        });
                    }
                }
                Settle::Abandon => {
                    if !requeue.is_empty() {
                        st.pending.push_back(Queued {
                            chunk: requeue,
                            not_before: None,
                        });
                    }
                }
                Settle::Fail(e) => {
                    discard = 0;
                    st.fail(e);
                }
            }
        }
        drop(st);
        self.cond.notify_all();
        discard
    }

    /// Fail the job: no new tasks are handed out and active ones are cancelled.
    pub fn fail(&self, err: anyhow::Error) {
        self.lock().fail(err);
        self.cond.notify_all();
    }

    /// Stop handing out work and cancel active tasks. Their remainders return
    /// to the pending list as workers settle them.
    pub fn stop(&self, reason: StopReason) {
        let mut st = self.lock();
        if st.halted() {
            return;
        }
        st.stopping = Some(reason);
        st.cancel_active();
        drop(st);
        self.cond.notify_all();
    }

    /// Cancel a stalled task and re-queue its unwritten remainder, exactly once.
    pub fn reclaim(&self, task: &TaskHandle) -> Reclaim {
        let mut st = self.lock();
        if st.halted() || !st.active.contains_key(&task.id) {
            return Reclaim::Skipped;
        }
        let remainder = {
            let mut p = task.lock();
            if p.cancelled.is_some() {
                return Reclaim::Skipped;
            }
            p.cancelled = Some(CancelReason::Stalled);
            let remainder = task.range_of(&p);
            // Pin the task to what is already on disk.
            p.stop_at = remainder.start;
            remainder
        };
        st.stats.reclaimed += 1;
        let outcome = if remainder.is_empty() {
            Reclaim::Empty
        } else {
            st.pending.push_back(Queued {
                chunk: remainder,
                not_before: None,
            });
            Reclaim::Requeued(remainder)
        };
        drop(st);
        self.cond.notify_all();
        outcome
    }

    /// Split a slow task's remaining range at an aligned midpoint: the task
    /// keeps the lower half and the upper half is queued at the front.
    /// Needs at least `max(min_len, 2 * align)` bytes left.
    pub fn split(&self, task: &TaskHandle, min_len: u64, align: u64) -> Option<Chunk> {
        let mut st = self.lock();
        if st.halted() || !st.active.contains_key(&task.id) {
            return None;
        }
        let upper = {
            let mut p = task.lock();
            if p.cancelled.is_some() {
                return None;
            }
            let range = task.range_of(&p);
            if range.is_open_ended() || range.len() < min_len.max(2 * align.max(1)) {
                return None;
            }
            let mid = align_down(range.start + range.len() / 2, align);
            let (_, upper) = range.split_at(mid)?;
            p.stop_at = mid;
            p.slow_since = None;
            upper
        };
        st.stats.splits += 1;
        st.pending.push_front(Queued {
            chunk: upper,
            not_before: None,
        });
        drop(st);
        self.cond.notify_all();
        Some(upper)
    }

    pub fn active_tasks(&self) -> Vec<Arc<TaskHandle>> {
        self.lock().active.values().cloned().collect()
    }

    pub fn active_len(&self) -> usize {
        self.lock().active.len()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Pending chunks in offset order.
    pub fn pending_chunks(&self) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = self.lock().pending.iter().map(|q| q.chunk).collect();
        chunks.sort_by_key(|c| c.start);
        chunks
    }

    /// Pending chunks no idle worker is waiting to pick up.
    pub fn demand(&self) -> usize {
        let st = self.lock();
        if st.halted() {
            return 0;
        }
        st.pending.len().saturating_sub(st.waiting)
    }

    pub fn stats(&self) -> QueueStats {
        self.lock().stats
    }

    /// Wait up to `timeout` for the queue to settle (nothing active, and
    /// nothing pending unless the job is halted). Returns true when settled.
    pub fn wait_settled(&self, timeout: Duration) -> bool {
        let st = self.lock();
        let (st, _) = self
            .cond
            .wait_timeout_while(st, timeout, |st| !st.settled())
            .unwrap_or_else(PoisonError::into_inner);
        st.settled()
    }

    /// Outcome once settled. Takes the failure, so call once.
    pub fn outcome(&self) -> QueueOutcome {
        let mut st = self.lock();
        if let Some(err) = st.failure.take() {
            return QueueOutcome::Failed(err);
        }
        if st.pending.is_empty() && st.active.is_empty() {
            return QueueOutcome::Completed;
        }
        match st.stopping {
            Some(reason) => QueueOutcome::Stopped(reason),
            None => QueueOutcome::Failed(anyhow!("workers exited with {} chunks pending", st.pending.len())),
        }
    }
}

/// A task handed to a worker. Settle it exactly once; dropping an unsettled
/// lease (worker panic) fails the job.
#[derive(Debug)]
pub struct Lease<'q> {
    queue: &'q WorkQueue,
    task: Arc<TaskHandle>,
    settled: bool,
}

impl Lease<'_> {
    pub fn task(&self) -> &TaskHandle {
        &self.task
    }

    /// Returns the bytes to un-count from progress.
    pub fn settle(mut self, settle: Settle, ranged: bool) -> u64 {
        self.settled = true;
        self.queue.settle(&self.task, settle, ranged)
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.queue.settle(
                &self.task,
                Settle::Fail(anyhow!("worker exited while holding chunk {}", self.task.chunk)),
                true,
            );
        }
    }
}
