//! Bounded worker pool driven from a blocking task.

use anyhow::anyhow;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::queue::QueueOutcome;
use super::worker::{run_worker, WorkerContext};
use crate::control::StopToken;

/// How often the pool checks for stop requests and extra demand.
const POOL_TICK: Duration = Duration::from_millis(50);

/// Run workers until the queue settles. Starts `min(cap, pending)` workers
/// and adds more (up to `cap`) when queued work outnumbers idle workers,
/// e.g. after the monitor splits a slow task.
pub(crate) fn run_pool(ctx: Arc<WorkerContext>, cap: usize, token: StopToken) -> QueueOutcome {
    let cap = cap.max(1);
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    let mut next_index = 0usize;

    let initial = cap.min(ctx.queue.pending_len());
    spawn(&ctx, initial, &mut workers, &mut next_index);
    tracing::debug!(job = %ctx.job_id, workers = workers.len(), cap, "worker pool started");

    loop {
        if let Some(reason) = token.reason() {
            ctx.queue.stop(reason);
        }
        if ctx.queue.wait_settled(POOL_TICK) {
            break;
        }
        reap(&ctx, &mut workers);
        let want = ctx.queue.demand().min(cap.saturating_sub(workers.len()));
        if want > 0 {
            tracing::debug!(job = %ctx.job_id, add = want, running = workers.len(), "growing worker pool");
            spawn(&ctx, want, &mut workers, &mut next_index);
        }
    }

    for handle in workers {
        if handle.join().is_err() {
            ctx.queue.fail(anyhow!("worker thread panicked"));
        }
    }
    ctx.queue.outcome()
}

fn spawn(ctx: &Arc<WorkerContext>, n: usize, workers: &mut Vec<JoinHandle<()>>, next_index: &mut usize) {
    for _ in 0..n {
        let index = *next_index;
        *next_index += 1;
        let worker_ctx = Arc::clone(ctx);
        let spawned = std::thread::Builder::new()
            .name(format!("sdm-worker-{index}"))
            .spawn(move || run_worker(&worker_ctx, index));
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(e) => {
                tracing::warn!(job = %ctx.job_id, error = %e, "failed to spawn worker thread");
                if workers.is_empty() {
                    ctx.queue
                        .fail(anyhow::Error::new(e).context("spawn worker thread"));
                }
                return;
            }
        }
    }
}

/// Join workers that already exited so their slots can be reused.
fn reap(ctx: &WorkerContext, workers: &mut Vec<JoinHandle<()>>) {
    let mut i = 0;
    while i < workers.len() {
        if workers[i].is_finished() {
            let handle = workers.swap_remove(i);
            if handle.join().is_err() {
                ctx.queue.fail(anyhow!("worker thread panicked"));
            }
        } else {
            i += 1;
        }
    }
}
