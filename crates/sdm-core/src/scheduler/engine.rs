//! Job driver: probe, plan, run the worker pool, finalize.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use super::limiter::{host_key, ConnectionGrant, ConnectionLimiter};
use super::pool::run_pool;
use super::queue::{QueueOutcome, QueueStats, WorkQueue};
use super::worker::WorkerContext;
use crate::config::defaults::{ALIGN_SIZE, MAX_GLOBAL_CONNECTIONS, MONITOR_INTERVAL, PROGRESS_INTERVAL};
use crate::control::{JobControl, StopReason, StopToken};
use crate::job::{DownloadJob, ResumePoint};
use crate::monitor::{spawn_monitor, Monitor};
use crate::planner::{plan_chunks, Chunk};
use crate::progress::{spawn_aggregator, JobStatus};
use crate::retry::RetryPolicy;
use crate::storage::PartFile;
use crate::transport::{ProbeResult, Transport};

/// How often a job waiting for connection slots re-checks the limiter.
const SLOT_POLL: Duration = Duration::from_millis(100);

/// Result of a job that did not fail.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub id: String,
    /// `Completed`, `Paused` or `Cancelled`.
    pub status: JobStatus,
    pub downloaded: u64,
    pub total: Option<u64>,
    pub elapsed: Duration,
    pub stats: QueueStats,
    /// Set for paused jobs whose resource can be resumed with Range requests.
    pub resume: Option<ResumePoint>,
}

#[derive(Debug)]
struct Settled {
    status: JobStatus,
    stats: QueueStats,
    resume: Option<ResumePoint>,
}

/// Runs download jobs under shared connection limits and a shared control registry.
#[derive(Debug, Clone)]
pub struct Engine {
    limiter: Arc<ConnectionLimiter>,
    control: Arc<JobControl>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(MAX_GLOBAL_CONNECTIONS)
    }
}

impl Engine {
    /// `max_global_connections` bounds connections across every job run by this engine.
    pub fn new(max_global_connections: usize) -> Self {
        Self {
            limiter: Arc::new(ConnectionLimiter::new(max_global_connections)),
            control: Arc::new(JobControl::new()),
        }
    }

    /// Pause/cancel registry for jobs run by this engine.
    pub fn control(&self) -> Arc<JobControl> {
        Arc::clone(&self.control)
    }

    pub fn limiter(&self) -> Arc<ConnectionLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Run a job to completion, pause, or cancellation. A failed job returns
    /// `Err`; its progress state and final snapshot carry `Failed` and the error.
    pub async fn run(&self, job: DownloadJob) -> Result<DownloadReport> {
        let token = self.control.register(&job.id);
        let aggregator = spawn_aggregator(
            job.id.clone(),
            job.filename.clone(),
            Arc::clone(&job.progress),
            job.sink.clone(),
            job.config.speed_ema_alpha,
            PROGRESS_INTERVAL,
        );
        tracing::info!(job = %job.id, url = %job.url, output = %job.output_path.display(), "job started");

        let result = self.drive(&job, &token).await;
        if let Err(e) = &result {
            job.progress.fail(format!("{e:#}"));
            tracing::warn!(job = %job.id, error = %format!("{e:#}"), "job failed");
        }
        aggregator.finish().await;
        self.control.unregister(&job.id);

        let settled = result?;
        Ok(DownloadReport {
            id: job.id.clone(),
            status: settled.status,
            downloaded: job.progress.downloaded(),
            total: job.progress.total(),
            elapsed: job.progress.elapsed(),
            stats: settled.stats,
            resume: settled.resume,
        })
    }

    async fn drive(&self, job: &DownloadJob, token: &StopToken) -> Result<Settled> {
        job.progress.set_status(JobStatus::Probing);
        let transport = Transport::new(&job.config);
        let probe = {
            let transport = transport.clone();
            let url = job.url.clone();
            tokio::task::spawn_blocking(move || transport.probe(&url))
                .await
                .context("probe task")??
        };
        tracing::info!(
            job = %job.id,
            total = ?probe.total,
            ranges = probe.accept_ranges,
            url = %probe.effective_url,
            "probed"
        );
        job.progress.set_total(probe.total);

        let (chunks, ranged, part) = prepare(job, &probe)?;
        if chunks.is_empty() {
            return finish_completed(job, part, &probe, QueueStats::default());
        }

        let host = host_key(&probe.effective_url)?;
        let cap = if ranged { job.config.connection_cap() } else { 1 };
        let Some(grant) = self
            .reserve(&host, cap, job.config.max_connections_per_host, token)
            .await
        else {
            let reason = token.reason().unwrap_or(StopReason::Cancelled);
            return Ok(stopped(job, reason, part, ranged, &probe, chunks, QueueStats::default()));
        };
        tracing::debug!(job = %job.id, host = %host, slots = grant.slots(), "connections reserved");

        job.progress.set_status(JobStatus::Downloading);
        let queue = Arc::new(WorkQueue::new(chunks, job.config.speed_ema_alpha));
        let monitor = ranged.then(|| {
            spawn_monitor(
                Monitor::new(Arc::clone(&queue), &job.config, ALIGN_SIZE),
                MONITOR_INTERVAL,
            )
        });
        let ctx = Arc::new(WorkerContext {
            job_id: job.id.clone(),
            url: probe.effective_url.clone(),
            etag: probe.etag.clone(),
            total: probe.total,
            ranged,
            verbose: job.verbose,
            transport,
            policy: RetryPolicy::from_config(&job.config),
            part: part.clone(),
            progress: Arc::clone(&job.progress),
            queue: Arc::clone(&queue),
        });
        let workers = grant.slots();
        let pool_token = token.clone();
        let outcome = tokio::task::spawn_blocking(move || run_pool(ctx, workers, pool_token))
            .await
            .context("worker pool task")?;
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
        drop(grant);

        let stats = queue.stats();
        match outcome {
            QueueOutcome::Completed => finish_completed(job, part, &probe, stats),
            QueueOutcome::Stopped(reason) => {
                let remaining = queue.pending_chunks();
                Ok(stopped(job, reason, part, ranged, &probe, remaining, stats))
            }
            QueueOutcome::Failed(e) => Err(e),
        }
    }

    /// Wait until at least one slot is granted. `None` if the job is stopped meanwhile.
    async fn reserve(
        &self,
        host: &str,
        wanted: usize,
        per_host_max: usize,
        token: &StopToken,
    ) -> Option<ConnectionGrant> {
        let mut waited = false;
        loop {
            if let Some(grant) = self.limiter.try_reserve(host, wanted, per_host_max) {
                return Some(grant);
            }
            if token.is_stopped() {
                return None;
            }
            if !waited {
                tracing::info!(host, "waiting for a free connection slot");
                waited = true;
            }
            tokio::time::sleep(SLOT_POLL).await;
        }
    }
}

/// Fresh plan and part file, or the paused run's remaining chunks and its
/// part file when the resource is unchanged.
fn prepare(job: &DownloadJob, probe: &ProbeResult) -> Result<(Vec<Chunk>, bool, PartFile)> {
    if let Some(point) = &job.resume {
        if point.matches(probe) {
            match PartFile::open_existing(&job.output_path) {
                Ok(part) if part.len().ok() == Some(point.total) => {
                    job.progress
                        .set_downloaded(point.total - point.remaining_bytes());
                    tracing::info!(
                        job = %job.id,
                        chunks = point.remaining.len(),
                        remaining = point.remaining_bytes(),
                        "resuming from part file"
                    );
                    let chunks = point
                        .remaining
                        .iter()
                        .map(|c| Chunk::new(c.start, c.end))
                        .collect();
                    return Ok((chunks, true, part));
                }
                Ok(_) => tracing::warn!(job = %job.id, "part file size changed; restarting"),
                Err(e) => tracing::warn!(job = %job.id, error = %format!("{e:#}"), "part file unusable; restarting"),
            }
        } else {
            tracing::warn!(job = %job.id, "remote resource changed since pause; restarting");
        }
    }

    let plan = plan_chunks(probe.total, probe.accept_ranges, job.config.chunk, ALIGN_SIZE);
    let part = PartFile::create(&job.output_path, probe.total)?;
    tracing::info!(job = %job.id, chunks = plan.len(), ranged = plan.ranged, "planned");
    Ok((plan.chunks, plan.ranged, part))
}

fn finish_completed(
    job: &DownloadJob,
    part: PartFile,
    probe: &ProbeResult,
    stats: QueueStats,
) -> Result<Settled> {
    part.sync()?;
    if probe.total.is_none() {
        job.progress.set_total(Some(job.progress.downloaded()));
    }
    part.finalize(&job.output_path)?;
    job.progress.set_status(JobStatus::Completed);
    tracing::info!(
        job = %job.id,
        bytes = job.progress.downloaded(),
        retries = stats.retries,
        reclaimed = stats.reclaimed,
        splits = stats.splits,
        "job completed"
    );
    Ok(Settled {
        status: JobStatus::Completed,
        stats,
        resume: None,
    })
}

fn stopped(
    job: &DownloadJob,
    reason: StopReason,
    part: PartFile,
    ranged: bool,
    probe: &ProbeResult,
    remaining: Vec<Chunk>,
    stats: QueueStats,
) -> Settled {
    if let Err(e) = part.sync() {
        tracing::warn!(job = %job.id, error = %format!("{e:#}"), "part file sync failed");
    }
    let status = match reason {
        StopReason::Paused => JobStatus::Paused,
        StopReason::Cancelled => JobStatus::Cancelled,
    };
    let resume = match (reason, ranged, probe.total) {
        (StopReason::Paused, true, Some(total)) => Some(ResumePoint {
            total,
            etag: probe.etag.clone(),
            last_modified: probe.last_modified.clone(),
            remaining: remaining.iter().map(|c| Chunk::new(c.start, c.end)).collect(),
        }),
        _ => None,
    };
    job.progress.set_status(status);
    tracing::info!(
        job = %job.id,
        %status,
        remaining = remaining.iter().map(Chunk::len).sum::<u64>(),
        "job stopped"
    );
    Settled {
        status,
        stats,
        resume,
    }
}
