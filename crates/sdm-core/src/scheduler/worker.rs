//! Worker threads: fetch leased chunks with a reusable curl handle.

use curl::easy::{Easy, List};
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Instant;

use super::queue::{Settle, WorkQueue};
use super::task::{TaskHandle, WriteOutcome};
use crate::planner::Chunk;
use crate::progress::ProgressState;
use crate::retry::{classify, ChunkError, ErrorKind, RetryDecision, RetryPolicy};
use crate::storage::PartFile;
use crate::transport::{ResponseHead, Transport};

/// Per-chunk lifecycle events: `info!` for verbose jobs, `debug!` otherwise.
macro_rules! chunk_event {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

/// Everything a worker needs; shared by all workers of one job.
pub(crate) struct WorkerContext {
    pub job_id: String,
    /// Effective URL from the probe.
    pub url: String,
    pub etag: Option<String>,
    pub total: Option<u64>,
    /// Chunks are fetched with Range requests and can resume mid-way.
    pub ranged: bool,
    pub verbose: bool,
    pub transport: Transport,
    pub policy: RetryPolicy,
    pub part: PartFile,
    pub progress: Arc<ProgressState>,
    pub queue: Arc<WorkQueue>,
}

/// Worker loop: lease, fetch, settle, until the queue has nothing more.
pub(crate) fn run_worker(ctx: &WorkerContext, index: usize) {
    let mut easy = match ctx.transport.handle() {
        Ok(easy) => easy,
        Err(e) => {
            tracing::warn!(job = %ctx.job_id, worker = index, error = %e, "cannot create curl handle");
            ctx.queue
                .fail(anyhow::Error::new(e).context("create curl handle"));
            return;
        }
    };
    tracing::debug!(job = %ctx.job_id, worker = index, "worker started");

    while let Some(lease) = ctx.queue.next_task() {
        let task = lease.task();
        chunk_event!(
            ctx.verbose,
            job = %ctx.job_id,
            worker = index,
            task = task.id,
            chunk = %task.chunk,
            attempt = task.chunk.attempt,
            "chunk started"
        );
        let result = {
            let _conn = ctx.progress.connection();
            fetch(ctx, &mut easy, task)
        };
        let settle = settlement(ctx, task, result);
        let discard = lease.settle(settle, ctx.ranged);
        if discard > 0 {
            ctx.progress.discard(discard);
        }
    }
    tracing::debug!(job = %ctx.job_id, worker = index, "worker exiting");
}

fn settlement(ctx: &WorkerContext, task: &TaskHandle, result: Result<(), ChunkError>) -> Settle {
    match result {
        Ok(()) => {
            chunk_event!(ctx.verbose, job = %ctx.job_id, task = task.id, chunk = %task.chunk, "chunk done");
            Settle::Done
        }
        Err(ChunkError::Cancelled) => {
            tracing::debug!(job = %ctx.job_id, task = task.id, reason = ?task.cancel_reason(), "chunk cancelled");
            Settle::Abandon
        }
        Err(e) => {
            let kind = classify(&e);
            let attempt = task.chunk.attempt.saturating_add(1);
            match ctx.policy.decide(attempt, kind) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        job = %ctx.job_id,
                        chunk = %task.chunk,
                        attempt,
                        ?kind,
                        ?delay,
                        error = %e,
                        "chunk failed, retrying"
                    );
                    Settle::Retry {
                        not_before: Instant::now() + delay,
                        throttled: kind == ErrorKind::Throttled,
                    }
                }
                RetryDecision::NoRetry => Settle::Fail(anyhow::Error::new(e).context(format!(
                    "chunk {} failed after {attempt} attempt(s)",
                    task.chunk
                ))),
            }
        }
    }
}

/// One HTTP exchange for the task's pending range.
fn fetch(ctx: &WorkerContext, easy: &mut Easy, task: &TaskHandle) -> Result<(), ChunkError> {
    let request = task.pending_range();
    if request.is_empty() {
        return Ok(());
    }
    if task.cancel_reason().is_some() {
        return Err(ChunkError::Cancelled);
    }

    ctx.transport.reset(easy)?;
    easy.url(&ctx.url)?;
    if ctx.ranged {
        easy.range(&request.curl_range())?;
        if let Some(etag) = &ctx.etag {
            let mut headers = List::new();
            headers.append(&format!("If-Range: {etag}"))?;
            easy.http_headers(headers)?;
        }
    }

    let started = Instant::now();
    let exchange = Exchange {
        ctx,
        task,
        request,
        started,
        deadline: ctx.transport.header_deadline(started),
        head: RefCell::default(),
        validated: Cell::new(false),
        boundary: Cell::new(false),
        failure: RefCell::new(None),
    };
    let performed = {
        let mut transfer = easy.transfer();
        transfer.header_function(|line| {
            exchange.head.borrow_mut().push_line(line);
            true
        })?;
        transfer.write_function(|data| Ok(exchange.on_data(data)))?;
        transfer.progress_function(|_, _, _, _| exchange.keep_going())?;
        transfer.perform()
    };
    exchange.finish(performed)
}

/// Callback state for one request. Lives on the worker's stack; curl calls
/// back on the same thread, so `Cell`/`RefCell` suffice.
struct Exchange<'a> {
    ctx: &'a WorkerContext,
    task: &'a TaskHandle,
    request: Chunk,
    started: Instant,
    deadline: Instant,
    head: RefCell<ResponseHead>,
    validated: Cell<bool>,
    boundary: Cell<bool>,
    failure: RefCell<Option<ChunkError>>,
}

impl Exchange<'_> {
    fn record(&self, err: ChunkError) {
        self.failure.borrow_mut().get_or_insert(err);
    }

    /// Returns the number of bytes consumed; fewer than `data.len()` aborts the transfer.
    fn on_data(&self, data: &[u8]) -> usize {
        if !self.validated.get() {
            if let Err(e) = self.validate() {
                self.record(e);
                return 0;
            }
            self.validated.set(true);
        }
        match self.task.write(data, &self.ctx.part, Instant::now()) {
            Ok(WriteOutcome::Written(n)) => {
                self.ctx.progress.add_downloaded(n as u64);
                n
            }
            Ok(WriteOutcome::Boundary(n)) => {
                self.ctx.progress.add_downloaded(n as u64);
                self.boundary.set(true);
                n
            }
            Ok(WriteOutcome::Cancelled) => 0,
            Err(e) => {
                self.record(ChunkError::Storage(e));
                0
            }
        }
    }

    /// Progress callback: false aborts the transfer.
    fn keep_going(&self) -> bool {
        if self.task.cancel_reason().is_some() {
            return false;
        }
        if !self.validated.get() && !self.head.borrow().is_final() && Instant::now() >= self.deadline {
            self.record(ChunkError::HeaderTimeout(self.started.elapsed()));
            return false;
        }
        true
    }

    /// Status and `Content-Range` checks, run before the first body byte.
    fn validate(&self) -> Result<(), ChunkError> {
        let head = self.head.borrow();
        let status = head.status.unwrap_or(0);
        if !self.ctx.ranged {
            return if (200..300).contains(&status) {
                Ok(())
            } else {
                Err(ChunkError::Http(status))
            };
        }
        match status {
            206 => {}
            200 => return Err(ChunkError::RangeIgnored(status)),
            other => return Err(ChunkError::Http(other)),
        }
        let mismatch = || ChunkError::ContentRangeMismatch {
            requested: self.request.range_header_value(),
            got: head.header("content-range").unwrap_or("<missing>").to_string(),
        };
        let range = head.content_range().ok_or_else(&mismatch)?;
        let same_total = match (range.total, self.ctx.total) {
            (Some(got), Some(want)) => got == want,
            _ => true,
        };
        if range.start != self.request.start || !same_total {
            return Err(mismatch());
        }
        Ok(())
    }

    fn finish(self, performed: Result<(), curl::Error>) -> Result<(), ChunkError> {
        if let Some(e) = self.failure.take() {
            return Err(e);
        }
        if self.task.cancel_reason().is_some() {
            return Err(ChunkError::Cancelled);
        }
        if self.boundary.get() {
            return Ok(());
        }
        performed?;
        if !self.validated.get() {
            self.validate()?;
        }
        let left = self.task.pending_range();
        if !left.is_open_ended() && !left.is_empty() {
            return Err(ChunkError::PartialTransfer {
                expected: self.request.len(),
                received: left.start - self.request.start,
            });
        }
        Ok(())
    }
}
