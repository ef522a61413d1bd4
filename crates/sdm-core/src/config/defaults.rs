//! Built-in defaults for every tunable. Accessors on `RuntimeConfig` fall back
//! to these whenever a field is unset, zero, negative or out of range.

use std::time::Duration;

pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * KB;
pub const GB: u64 = 1024 * MB;

/// Smallest chunk the planner produces (the final chunk may be shorter).
pub const MIN_CHUNK: u64 = 2 * MB;
/// Largest chunk the planner produces.
pub const MAX_CHUNK: u64 = 16 * MB;
/// Preferred chunk size; chunk count is `total / TARGET_CHUNK`.
pub const TARGET_CHUNK: u64 = 8 * MB;
/// Chunk boundaries are multiples of this. Must be a power of two.
pub const ALIGN_SIZE: u64 = 4 * KB;
/// curl receive buffer per worker.
pub const WORKER_BUFFER: usize = 512 * KB as usize;

pub const PER_HOST_MAX: usize = 32;
pub const MAX_GLOBAL_CONNECTIONS: usize = 64;

pub const DEFAULT_USER_AGENT: &str = concat!("sdm/", env!("CARGO_PKG_VERSION"));

pub const MAX_TASK_RETRIES: u32 = 3;
pub const SLOW_WORKER_THRESHOLD: f64 = 0.3;
pub const SLOW_WORKER_GRACE: Duration = Duration::from_secs(5);
pub const STALL_TIMEOUT: Duration = Duration::from_secs(5);
pub const SPEED_EMA_ALPHA: f64 = 0.3;

// Transport. curl folds the TLS handshake into its connect timeout, so the
// effective connect budget is DIAL_TIMEOUT + TLS_HANDSHAKE_TIMEOUT.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(15);
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
/// Idle connections cached by each worker's curl handle.
pub const MAX_IDLE_CONNS_PER_WORKER: u32 = 1;
pub const MAX_REDIRECTS: u32 = 10;

// Progress and monitoring cadence.
pub const PROGRESS_CHANNEL_BUFFER: usize = 100;
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);
pub const MONITOR_INTERVAL: Duration = Duration::from_millis(250);
pub const SPEED_HISTORY_LEN: usize = 60;
/// Minimum window over which a task's instantaneous speed is sampled.
pub const TASK_SPEED_WINDOW: Duration = Duration::from_millis(500);

// Retry backoff.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_constants() {
        assert_eq!(KB, 1024);
        assert_eq!(MB, 1024 * 1024);
        assert_eq!(GB, 1024 * 1024 * 1024);
    }

    #[test]
    fn chunk_defaults_are_consistent() {
        assert!(MIN_CHUNK > 0);
        assert!(MAX_CHUNK > MIN_CHUNK);
        assert!((MIN_CHUNK..=MAX_CHUNK).contains(&TARGET_CHUNK));
        assert!(ALIGN_SIZE.is_power_of_two());
        assert_eq!(MIN_CHUNK % ALIGN_SIZE, 0);
        assert_eq!(MAX_CHUNK % ALIGN_SIZE, 0);
        assert!(WORKER_BUFFER > 0);
    }

    #[test]
    fn connection_limits_are_sane() {
        assert!(PER_HOST_MAX > 0 && PER_HOST_MAX <= 256);
        assert!(MAX_GLOBAL_CONNECTIONS >= PER_HOST_MAX);
        assert!(MAX_IDLE_CONNS_PER_WORKER > 0);
    }

    #[test]
    fn timeouts_are_positive() {
        for d in [
            DIAL_TIMEOUT,
            TLS_HANDSHAKE_TIMEOUT,
            RESPONSE_HEADER_TIMEOUT,
            KEEP_ALIVE,
            PROBE_TIMEOUT,
            PROGRESS_INTERVAL,
            MONITOR_INTERVAL,
        ] {
            assert!(!d.is_zero());
        }
        assert!(PROGRESS_CHANNEL_BUFFER > 0);
    }
}
