//! Chunk download error type for retry classification.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Error from one attempt at a chunk. Classified with [`super::classify`]
/// before the job decides between retrying and failing.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// curl reported an error (timeout, connection, etc.).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// Response had a status other than the one the request expects.
    #[error("HTTP {0}")]
    Http(u32),
    /// A ranged request was answered with the full body (or the validator
    /// no longer matches, which servers signal the same way).
    #[error("server ignored range request (HTTP {0})")]
    RangeIgnored(u32),
    /// `Content-Range` missing or not matching the requested range.
    #[error("content-range mismatch: requested {requested}, got {got}")]
    ContentRangeMismatch { requested: String, got: String },
    /// No response headers within the header watchdog.
    #[error("no response headers within {0:?}")]
    HeaderTimeout(Duration),
    /// Transfer ended before the chunk was complete (server closed early).
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    /// Disk write failed (disk full, permission denied). Not retried.
    #[error("storage: {0}")]
    Storage(#[source] io::Error),
    /// The task was cancelled by the monitor or the job's control token.
    #[error("cancelled")]
    Cancelled,
}
