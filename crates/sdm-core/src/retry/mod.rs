//! Retry and backoff policy.
//!
//! Error classification (timeouts, throttling, connection failures, fatal
//! responses) and exponential backoff decisions, shared by workers and the
//! stall monitor so a chunk's retry budget is spent the same way everywhere.

mod classify;
mod error;
mod policy;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use error::ChunkError;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
