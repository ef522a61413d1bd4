//! HTTP transport: configured curl handles and the capability probe.
//!
//! Every handle carries the same layered timeouts: a connect budget covering
//! dial and TLS, a response-header watchdog enforced by the caller through
//! [`Transport::header_deadline`], and curl's low-speed abort as a safety net
//! behind the stall monitor.

mod parse;
mod probe;

use curl::easy::Easy;
use std::time::{Duration, Instant};

use crate::config::defaults::{
    DIAL_TIMEOUT, KEEP_ALIVE, MAX_IDLE_CONNS_PER_WORKER, MAX_REDIRECTS,
    RESPONSE_HEADER_TIMEOUT, TLS_HANDSHAKE_TIMEOUT,
};
use crate::config::ResolvedConfig;

pub use parse::{parse_content_range, parse_http_status, ContentRange, HeadInfo, ResponseHead};
pub use probe::ProbeResult;

/// Builds curl handles with the job's user agent, buffer size and timeouts.
#[derive(Debug, Clone)]
pub struct Transport {
    user_agent: String,
    buffer_size: usize,
    stall_timeout: Duration,
}

impl Transport {
    pub fn new(cfg: &ResolvedConfig) -> Self {
        Self {
            user_agent: cfg.user_agent.clone(),
            buffer_size: cfg.worker_buffer_size,
            stall_timeout: cfg.stall_timeout,
        }
    }

    /// Combined dial + TLS handshake budget (curl applies one connect timeout).
    pub fn connect_timeout(&self) -> Duration {
        DIAL_TIMEOUT + TLS_HANDSHAKE_TIMEOUT
    }

    /// Instant by which a request started at `started` must have received
    /// its response headers.
    pub fn header_deadline(&self, started: Instant) -> Instant {
        started + self.connect_timeout() + RESPONSE_HEADER_TIMEOUT
    }

    /// A new handle with all shared options applied.
    pub fn handle(&self) -> Result<Easy, curl::Error> {
        let mut easy = Easy::new();
        self.configure(&mut easy)?;
        Ok(easy)
    }

    /// Resets `easy` and applies the shared options. The handle keeps its
    /// cached connection, so a worker can reuse it across chunks.
    pub fn reset(&self, easy: &mut Easy) -> Result<(), curl::Error> {
        easy.reset();
        self.configure(easy)
    }

    fn configure(&self, easy: &mut Easy) -> Result<(), curl::Error> {
        easy.signal(false)?;
        easy.follow_location(true)?;
        easy.max_redirections(MAX_REDIRECTS)?;
        easy.useragent(&self.user_agent)?;
        easy.connect_timeout(self.connect_timeout())?;
        easy.tcp_keepalive(true)?;
        easy.tcp_keepidle(KEEP_ALIVE)?;
        easy.tcp_keepintvl(KEEP_ALIVE)?;
        easy.max_connects(MAX_IDLE_CONNS_PER_WORKER)?;
        easy.buffer_size(self.buffer_size)?;
        // Last-resort abort for a dead connection the monitor failed to reclaim.
        easy.low_speed_limit(1)?;
        easy.low_speed_time(self.stall_timeout * 2)?;
        easy.progress(true)?;
        Ok(())
    }
}
