//! Point-in-time view of a job for observers.

use serde::Serialize;
use std::time::Duration;

use super::state::{JobStatus, ProgressState};

/// What observers receive on every aggregator tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub id: String,
    pub filename: String,
    pub downloaded: u64,
    /// `None` while the size is unknown.
    pub total: Option<u64>,
    /// Smoothed bytes per second.
    pub speed: f64,
    pub active_connections: usize,
    pub elapsed: Duration,
    pub status: JobStatus,
    pub error: Option<String>,
    /// Oldest first.
    pub speed_history: Vec<f64>,
}

impl ProgressSnapshot {
    pub fn capture(id: &str, filename: &str, state: &ProgressState) -> Self {
        Self {
            id: id.to_string(),
            filename: filename.to_string(),
            downloaded: state.downloaded(),
            total: state.total(),
            speed: state.speed(),
            active_connections: state.active_connections(),
            elapsed: state.elapsed(),
            status: state.status(),
            error: state.error(),
            speed_history: state.speed_history(),
        }
    }

    /// Fraction complete in [0.0, 1.0]; `None` when the size is unknown.
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total?;
        if total == 0 {
            return Some(1.0);
        }
        Some((self.downloaded as f64 / total as f64).min(1.0))
    }

    /// Estimated time remaining at the current smoothed speed.
    pub fn eta(&self) -> Option<Duration> {
        let remaining = self.total?.saturating_sub(self.downloaded);
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        if self.speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / self.speed))
    }
}
