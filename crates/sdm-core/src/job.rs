//! Job submission types.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{ResolvedConfig, RuntimeConfig};
use crate::planner::Chunk;
use crate::progress::{ProgressSender, ProgressState};
use crate::transport::ProbeResult;

/// What a caller submits.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub url: String,
    pub output_path: PathBuf,
    /// Stable identifier used for control and in snapshots. Defaults to the
    /// display filename when empty.
    pub id: String,
    /// Display name. Defaults to the output path's file name when empty.
    pub filename: String,
    /// Log per-chunk lifecycle at `info` instead of `debug`.
    pub verbose: bool,
    pub progress: Option<ProgressSender>,
    pub runtime: Option<RuntimeConfig>,
}

/// Where a paused job left off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub total: u64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Unwritten ranges, in offset order.
    pub remaining: Vec<Chunk>,
}

impl ResumePoint {
    pub fn remaining_bytes(&self) -> u64 {
        self.remaining.iter().map(Chunk::len).sum()
    }

    /// True if the probed resource is still the one this point was taken from.
    pub fn matches(&self, probe: &ProbeResult) -> bool {
        probe.accept_ranges
            && probe.total == Some(self.total)
            && (self.etag.is_none() || probe.etag == self.etag)
            && (self.last_modified.is_none() || probe.last_modified == self.last_modified)
            && self.remaining.iter().all(|c| !c.is_open_ended() && c.end <= self.total)
    }
}

/// A validated job, owned by the engine while it runs.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: String,
    pub url: String,
    pub output_path: PathBuf,
    pub filename: String,
    pub verbose: bool,
    pub(crate) sink: Option<ProgressSender>,
    pub progress: Arc<ProgressState>,
    /// Captured at creation; never changes afterwards.
    pub config: ResolvedConfig,
    pub(crate) resume: Option<ResumePoint>,
}

impl DownloadJob {
    pub fn new(req: JobRequest) -> Result<Self> {
        let parsed = url::Url::parse(req.url.trim())
            .with_context(|| format!("invalid URL: {}", req.url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("unsupported URL scheme: {}", parsed.scheme());
        }
        if req.output_path.as_os_str().is_empty() {
            bail!("output path is empty");
        }

        let filename = if req.filename.trim().is_empty() {
            req.output_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            req.filename
        };
        let id = if req.id.trim().is_empty() {
            filename.clone()
        } else {
            req.id
        };

        Ok(Self {
            id,
            url: parsed.to_string(),
            output_path: req.output_path,
            filename,
            verbose: req.verbose,
            sink: req.progress,
            progress: Arc::new(ProgressState::new()),
            config: RuntimeConfig::resolve(req.runtime.as_ref()),
            resume: None,
        })
    }

    /// Continue from a paused run, reusing its part file when the resource is unchanged.
    pub fn resume_from(mut self, point: ResumePoint) -> Self {
        self.resume = Some(point);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::PER_HOST_MAX;

    fn request(url: &str, out: &str) -> JobRequest {
        JobRequest {
            url: url.into(),
            output_path: out.into(),
            ..Default::default()
        }
    }

    #[test]
    fn filename_and_id_default_from_output() {
        let job = DownloadJob::new(request("http://h/x", "/tmp/dir/file.iso")).unwrap();
        assert_eq!(job.filename, "file.iso");
        assert_eq!(job.id, "file.iso");
        assert_eq!(job.config.max_connections_per_host, PER_HOST_MAX);
    }

    #[test]
    fn explicit_fields_are_kept() {
        let mut req = request("https://h/x", "out.bin");
        req.id = "42".into();
        req.filename = "Nice Name".into();
        req.runtime = Some(RuntimeConfig {
            max_connections_per_host: 4,
            ..Default::default()
        });
        let job = DownloadJob::new(req).unwrap();
        assert_eq!(job.id, "42");
        assert_eq!(job.filename, "Nice Name");
        assert_eq!(job.config.max_connections_per_host, 4);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(DownloadJob::new(request("not a url", "out")).is_err());
        assert!(DownloadJob::new(request("ftp://h/x", "out")).is_err());
        assert!(DownloadJob::new(request("http://h/x", "")).is_err());
    }

    fn probe(total: Option<u64>, ranges: bool, etag: Option<&str>) -> ProbeResult {
        ProbeResult {
            total,
            accept_ranges: ranges,
            effective_url: "http://h/x".into(),
            etag: etag.map(str::to_string),
            last_modified: None,
        }
    }

    #[test]
    fn resume_point_matching() {
        let point = ResumePoint {
            total: 100,
            etag: Some("\"v1\"".into()),
            last_modified: None,
            remaining: vec![Chunk::new(40, 60), Chunk::new(80, 100)],
        };
        assert_eq!(point.remaining_bytes(), 40);
        assert!(point.matches(&probe(Some(100), true, Some("\"v1\""))));
        assert!(!point.matches(&probe(Some(101), true, Some("\"v1\""))));
        assert!(!point.matches(&probe(Some(100), false, Some("\"v1\""))));
        assert!(!point.matches(&probe(Some(100), true, Some("\"v2\""))));
    }
}
