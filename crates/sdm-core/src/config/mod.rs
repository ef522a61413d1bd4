//! Runtime tunables and their resolution to effective values.
//!
//! `RuntimeConfig` is what callers (or `config.toml`) provide; every field is
//! optional in spirit: zero, negative, NaN or out-of-range values mean "use the
//! built-in default". `ResolvedConfig` is the immutable, fully-defaulted view a
//! job captures at creation time.

pub mod defaults;
mod file;


use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use file::{config_path, from_toml_str, load_or_init};

use defaults::*;

/// Caller-supplied tunables. Zero values (the `Default`) resolve to built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum concurrent connections to one host for a job.
    pub max_connections_per_host: i64,
    /// Maximum concurrent connections overall.
    pub max_global_connections: i64,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
    pub min_chunk_size: i64,
    pub max_chunk_size: i64,
    pub target_chunk_size: i64,
    /// curl receive buffer per worker, in bytes.
    pub worker_buffer_size: i64,
    /// Failed attempts allowed per chunk before the job fails.
    pub max_task_retries: i64,
    /// A task slower than this fraction of the mean task speed is considered slow.
    pub slow_worker_threshold: f64,
    /// How long a task must stay slow before its range is split, in milliseconds.
    pub slow_worker_grace_ms: i64,
    /// Zero-progress time after which a task is declared stalled, in milliseconds.
    pub stall_timeout_ms: i64,
    /// Smoothing factor for speed EMAs, in (0, 1].
    pub speed_ema_alpha: f64,
}

fn positive(v: i64) -> Option<u64> {
    (v > 0).then_some(v as u64)
}

fn fraction(v: f64) -> Option<f64> {
    (v > 0.0 && v <= 1.0).then_some(v)
}

fn millis(v: i64) -> Option<Duration> {
    positive(v).map(Duration::from_millis)
}

impl RuntimeConfig {
    pub fn max_connections_per_host(&self) -> usize {
        positive(self.max_connections_per_host).map_or(PER_HOST_MAX, |v| v as usize)
    }

    pub fn max_global_connections(&self) -> usize {
        positive(self.max_global_connections).map_or(MAX_GLOBAL_CONNECTIONS, |v| v as usize)
    }

    pub fn user_agent(&self) -> &str {
        let ua = self.user_agent.trim();
        if ua.is_empty() {
            DEFAULT_USER_AGENT
        } else {
            ua
        }
    }

    pub fn min_chunk_size(&self) -> u64 {
        positive(self.min_chunk_size).unwrap_or(MIN_CHUNK)
    }

    pub fn max_chunk_size(&self) -> u64 {
        positive(self.max_chunk_size).unwrap_or(MAX_CHUNK)
    }

    pub fn target_chunk_size(&self) -> u64 {
        positive(self.target_chunk_size).unwrap_or(TARGET_CHUNK)
    }

    pub fn worker_buffer_size(&self) -> usize {
        positive(self.worker_buffer_size).map_or(WORKER_BUFFER, |v| v as usize)
    }

    pub fn max_task_retries(&self) -> u32 {
        positive(self.max_task_retries).map_or(MAX_TASK_RETRIES, |v| v.min(u32::MAX as u64) as u32)
    }

    pub fn slow_worker_threshold(&self) -> f64 {
        fraction(self.slow_worker_threshold).unwrap_or(SLOW_WORKER_THRESHOLD)
    }

    pub fn slow_worker_grace_period(&self) -> Duration {
        millis(self.slow_worker_grace_ms).unwrap_or(SLOW_WORKER_GRACE)
    }

    pub fn stall_timeout(&self) -> Duration {
        millis(self.stall_timeout_ms).unwrap_or(STALL_TIMEOUT)
    }

    pub fn speed_ema_alpha(&self) -> f64 {
        fraction(self.speed_ema_alpha).unwrap_or(SPEED_EMA_ALPHA)
    }

    /// Resolves an optional config; `None` behaves like an all-default config.
    pub fn resolve(cfg: Option<&RuntimeConfig>) -> ResolvedConfig {
        match cfg {
            Some(c) => ResolvedConfig::from(c),
            None => ResolvedConfig::from(&RuntimeConfig::default()),
        }
    }
}

/// Chunk size bounds after defaulting and normalisation (`min <= target <= max`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    pub min: u64,
    pub max: u64,
    pub target: u64,
}

/// Effective tunables for one job. Immutable once the job is created.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub max_connections_per_host: usize,
    pub max_global_connections: usize,
    pub user_agent: String,
    pub chunk: ChunkBounds,
    pub worker_buffer_size: usize,
    pub max_task_retries: u32,
    pub slow_worker_threshold: f64,
    pub slow_worker_grace: Duration,
    pub stall_timeout: Duration,
    pub speed_ema_alpha: f64,
}

impl ResolvedConfig {
    /// Upper bound on simultaneous connections for a single job.
    pub fn connection_cap(&self) -> usize {
        self.max_connections_per_host
            .min(self.max_global_connections)
            .max(1)
    }
}

impl From<&RuntimeConfig> for ResolvedConfig {
    fn from(c: &RuntimeConfig) -> Self {
        let min = c.min_chunk_size();
        let max = c.max_chunk_size().max(min);
        let target = c.target_chunk_size().clamp(min, max);
        Self {
            max_connections_per_host: c.max_connections_per_host(),
            max_global_connections: c.max_global_connections(),
            user_agent: c.user_agent().to_string(),
            chunk: ChunkBounds { min, max, target },
            worker_buffer_size: c.worker_buffer_size(),
            max_task_retries: c.max_task_retries(),
            slow_worker_threshold: c.slow_worker_threshold(),
            slow_worker_grace: c.slow_worker_grace_period(),
            stall_timeout: c.stall_timeout(),
            speed_ema_alpha: c.speed_ema_alpha(),
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        RuntimeConfig::resolve(None)
    }
}
