//! Job control for pause/cancel: shared stop tokens keyed by job id.
//!
//! Each running job registers a [`StopToken`]. A controller (UI, signal
//! handler) calls [`JobControl::pause`] or [`JobControl::cancel`]; the job's
//! scheduler observes the token, stops its workers, and settles with the
//! matching status.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

const STOP_NONE: u8 = 0;
const STOP_PAUSED: u8 = 1;
const STOP_CANCELLED: u8 = 2;

/// Why a job was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Keep the part file and report the remaining chunks for resume.
    Paused,
    /// Abandon the job; the part file is left behind.
    Cancelled,
}

/// One job's stop flag. The first request wins.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicU8>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if a stop was already requested.
    pub fn request(&self, reason: StopReason) -> bool {
        let v = match reason {
            StopReason::Paused => STOP_PAUSED,
            StopReason::Cancelled => STOP_CANCELLED,
        };
        self.0
            .compare_exchange(STOP_NONE, v, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn reason(&self) -> Option<StopReason> {
        match self.0.load(Ordering::Acquire) {
            STOP_PAUSED => Some(StopReason::Paused),
            STOP_CANCELLED => Some(StopReason::Cancelled),
            _ => None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.reason().is_some()
    }
}

/// Registry of job id -> stop token.
#[derive(Debug, Default)]
pub struct JobControl {
    jobs: RwLock<HashMap<String, StopToken>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running job and return its token. Re-registering an id
    /// replaces the previous token.
    pub fn register(&self, job_id: &str) -> StopToken {
        let token = StopToken::new();
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string(), token.clone());
        token
    }

    /// Call when the job settles, whatever the outcome.
    pub fn unregister(&self, job_id: &str) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_id)
    }

    /// Ask a running job to pause. Returns false for unknown or already-stopping jobs.
    pub fn pause(&self, job_id: &str) -> bool {
        self.request(job_id, StopReason::Paused)
    }

    /// Ask a running job to cancel. Returns false for unknown or already-stopping jobs.
    pub fn cancel(&self, job_id: &str) -> bool {
        self.request(job_id, StopReason::Cancelled)
    }

    fn request(&self, job_id: &str, reason: StopReason) -> bool {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        match jobs.get(job_id) {
            Some(token) => {
                tracing::info!(job = job_id, ?reason, "stop requested");
                token.request(reason)
            }
            None => false,
        }
    }
}
