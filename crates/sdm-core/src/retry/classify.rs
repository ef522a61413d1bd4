//! Classify HTTP status and curl errors into retry policy error kinds.

use super::error::ChunkError;
use super::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        408 => ErrorKind::Timeout,
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Fatal,
    }
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
        || e.is_ssl_connect_error()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Fatal
}

/// Classify a chunk error into an ErrorKind.
pub fn classify(e: &ChunkError) -> ErrorKind {
    match e {
        ChunkError::Curl(ce) => classify_curl_error(ce),
        ChunkError::Http(code) => classify_http_status(*code),
        ChunkError::HeaderTimeout(_) => ErrorKind::Timeout,
        ChunkError::PartialTransfer { .. } => ErrorKind::Connection,
        ChunkError::RangeIgnored(_)
        | ChunkError::ContentRangeMismatch { .. }
        | ChunkError::Storage(_)
        | ChunkError::Cancelled => ErrorKind::Fatal,
    }
}
