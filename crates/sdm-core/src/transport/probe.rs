//! Capability probe: total size, range support, effective URL and validators.

use anyhow::{bail, Context, Result};
use curl::easy::Easy;

use super::parse::{HeadInfo, ResponseHead};
use super::Transport;
use crate::config::defaults::PROBE_TIMEOUT;

/// What the server told us about the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Total size, if known.
    pub total: Option<u64>,
    /// Byte-range requests are honoured.
    pub accept_ranges: bool,
    /// URL after redirects; chunk requests go here.
    pub effective_url: String,
    /// Sent as `If-Range` with chunk requests when present.
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Outcome of one probe request.
#[derive(Debug, Clone)]
struct Probed {
    status: u32,
    head: ResponseHead,
    effective_url: Option<String>,
}

impl Probed {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl Transport {
    /// HEAD first; if that fails, lacks a length, or lacks `Accept-Ranges:
    /// bytes`, a `Range: bytes=0-0` GET settles it: `206` with
    /// `Content-Range: bytes 0-0/N` proves range support and gives the size.
    ///
    /// Blocking; call from `spawn_blocking` in async code.
    pub fn probe(&self, url: &str) -> Result<ProbeResult> {
        let head = match self.request(url, true) {
            Ok(p) if p.is_success() => Some(p),
            Ok(p) => {
                tracing::debug!(url, status = p.status, "HEAD rejected, falling back to range GET");
                None
            }
            Err(e) => {
                tracing::debug!(url, error = %e, "HEAD failed, falling back to range GET");
                None
            }
        };

        if let Some(h) = &head {
            let info = h.head.info();
            if info.content_length.is_some() && info.accept_ranges {
                return Ok(result_from(url, h, info.content_length, true));
            }
        }

        let get = self.request(url, false).context("range probe failed")?;
        resolve(url, head.as_ref(), &get)
    }

    fn request(&self, url: &str, head_only: bool) -> Result<Probed> {
        let mut easy = self.handle()?;
        easy.url(url).context("invalid URL")?;
        easy.timeout(PROBE_TIMEOUT)?;
        if head_only {
            easy.nobody(true)?;
        } else {
            easy.range("0-0")?;
        }
        let head = perform_collect(&mut easy)?;
        let status = easy.response_code().context("no response code")?;
        let effective_url = easy.effective_url()?.map(str::to_string);
        Ok(Probed {
            status,
            head,
            effective_url,
        })
    }
}

/// Runs the transfer, keeping the final response's headers and at most a
/// couple of body bytes (a server ignoring the range would send everything).
fn perform_collect(easy: &mut Easy) -> Result<ResponseHead> {
    let mut head = ResponseHead::default();
    let mut body = 0usize;
    let result = {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            head.push_line(data);
            true
        })?;
        transfer.write_function(|data| {
            body += data.len();
            if body > 1 {
                Ok(0)
            } else {
                Ok(data.len())
            }
        })?;
        transfer.perform()
    };
    match result {
        Ok(()) => Ok(head),
        Err(e) if e.is_write_error() && head.status.is_some() => Ok(head),
        Err(e) => Err(e.into()),
    }
}

fn result_from(url: &str, p: &Probed, total: Option<u64>, accept_ranges: bool) -> ProbeResult {
    let info = p.head.info();
    ProbeResult {
        total,
        accept_ranges,
        effective_url: p.effective_url.clone().unwrap_or_else(|| url.to_string()),
        etag: info.etag,
        last_modified: info.last_modified,
    }
}

/// Combines an optional successful HEAD with the range GET.
fn resolve(url: &str, head: Option<&Probed>, get: &Probed) -> Result<ProbeResult> {
    let head_info = head.map(|h| h.head.info()).unwrap_or_default();
    match get.status {
        206 => match get.head.content_range() {
            Some(cr) if cr.start == 0 => {
                let total = cr.total.or(head_info.content_length);
                // Without a size the job streams in one request.
                Ok(result_from(url, get, total, total.is_some()))
            }
            _ => bail!("range probe of {url}: 206 without a usable Content-Range"),
        },
        200..=299 => {
            let HeadInfo { content_length, .. } = get.head.info();
            Ok(result_from(url, get, content_length.or(head_info.content_length), false))
        }
        status => bail!("GET {url} returned HTTP {status}"),
    }
}
