//! Engine-wide connection limits shared across jobs.
//!
//! Each job reserves connection slots before starting workers so the total
//! across jobs stays under the global limit and no host gets more than its
//! per-host limit. Slots return to the pool when the [`ConnectionGrant`] drops.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Normalises a URL to the `scheme:host:port` key limits are counted under,
/// so different paths on one origin share the per-host budget.
pub fn host_key(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("URL missing host: {url}"))?;
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| anyhow::anyhow!("URL missing port and unknown default: {url}"))?;
    Ok(format!("{}:{}:{}", parsed.scheme(), host, port))
}

#[derive(Debug, Default)]
struct Usage {
    total: usize,
    per_host: HashMap<String, usize>,
}

/// Shared global + per-host connection budget.
#[derive(Debug)]
pub struct ConnectionLimiter {
    max_total: usize,
    usage: Mutex<Usage>,
}

impl ConnectionLimiter {
    pub fn new(max_total: usize) -> Self {
        Self {
            max_total: max_total.max(1),
            usage: Mutex::new(Usage::default()),
        }
    }

    fn usage(&self) -> MutexGuard<'_, Usage> {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    /// Connections currently reserved across all hosts.
    pub fn in_use(&self) -> usize {
        self.usage().total
    }

    pub fn in_use_for(&self, host: &str) -> usize {
        self.usage().per_host.get(host).copied().unwrap_or(0)
    }

    /// Reserve up to `requested` slots for `host`, at most `per_host_max` for
    /// that host overall. `None` when not even one slot is free.
    pub fn try_reserve(
        self: &Arc<Self>,
        host: &str,
        requested: usize,
        per_host_max: usize,
    ) -> Option<ConnectionGrant> {
        let mut usage = self.usage();
        let host_used = usage.per_host.get(host).copied().unwrap_or(0);
        let take = requested
            .min(self.max_total.saturating_sub(usage.total))
            .min(per_host_max.saturating_sub(host_used));
        if take == 0 {
            return None;
        }
        usage.total += take;
        *usage.per_host.entry(host.to_string()).or_insert(0) += take;
        Some(ConnectionGrant {
            limiter: Arc::clone(self),
            host: host.to_string(),
            slots: take,
        })
    }

    fn release(&self, host: &str, n: usize) {
        let mut usage = self.usage();
        usage.total = usage.total.saturating_sub(n);
        if let Some(used) = usage.per_host.get_mut(host) {
            *used = used.saturating_sub(n);
            if *used == 0 {
                usage.per_host.remove(host);
            }
        }
    }
}

/// Reserved slots; released when dropped.
#[derive(Debug)]
pub struct ConnectionGrant {
    limiter: Arc<ConnectionLimiter>,
    host: String,
    slots: usize,
}

impl ConnectionGrant {
    pub fn slots(&self) -> usize {
        self.slots
    }
}

impl Drop for ConnectionGrant {
    fn drop(&mut self) {
        self.limiter.release(&self.host, self.slots);
    }
}
