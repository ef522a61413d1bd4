//! End-to-end downloads against a local range-capable server.

mod common;

use common::range_server::{self, RangeServerOptions};
use sdm_core::{
    progress_channel, DownloadJob, Engine, JobRequest, JobStatus, ProgressSnapshot, RuntimeConfig,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const MB: usize = 1024 * 1024;

fn body(len: usize) -> Vec<u8> {
    (0u8..251).cycle().take(len).collect()
}

fn request(url: &str, out: &Path, runtime: Option<RuntimeConfig>) -> JobRequest {
    JobRequest {
        url: url.to_string(),
        output_path: out.to_path_buf(),
        id: "job-1".to_string(),
        runtime,
        ..Default::default()
    }
}

fn part_exists(out: &Path) -> bool {
    let mut p = out.as_os_str().to_owned();
    p.push(".part");
    Path::new(&p).exists()
}

#[tokio::test(flavor = "multi_thread")]
async fn ten_mib_in_two_mib_chunks_is_byte_exact() {
    let data = body(10 * MB);
    let server = range_server::start(data.clone());
    let dir = tempdir().unwrap();
    let out = dir.path().join("file.bin");
    let runtime = RuntimeConfig {
        target_chunk_size: (2 * MB) as i64,
        ..Default::default()
    };

    let job = DownloadJob::new(request(&server.url, &out, Some(runtime))).unwrap();
    let report = Engine::default().run(job).await.expect("download");

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.total, Some(data.len() as u64));
    assert_eq!(report.downloaded, data.len() as u64);
    assert_eq!(server.served(), 5, "one request per 2 MiB chunk");
    assert_eq!(report.stats.retries, 0);
    assert!(report.resume.is_none());
    assert_eq!(std::fs::read(&out).unwrap(), data);
    assert!(!part_exists(&out), "part file renamed away");
}

#[tokio::test(flavor = "multi_thread")]
async fn server_without_ranges_uses_one_connection() {
    let data = body(3 * MB);
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            support_ranges: false,
            advertise_ranges: false,
            ..Default::default()
        },
    );
    let dir = tempdir().unwrap();
    let out = dir.path().join("plain.bin");

    let job = DownloadJob::new(request(&server.url, &out, None)).unwrap();
    let report = Engine::default().run(job).await.expect("download");

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(server.served(), 1);
    assert_eq!(std::fs::read(&out).unwrap(), data);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_length_reads_to_end_of_stream() {
    let data = body(MB + 123);
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            support_ranges: false,
            advertise_ranges: false,
            omit_length: true,
            ..Default::default()
        },
    );
    let dir = tempdir().unwrap();
    let out = dir.path().join("stream.bin");

    let job = DownloadJob::new(request(&server.url, &out, None)).unwrap();
    let report = Engine::default().run(job).await.expect("download");

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.total, Some(data.len() as u64), "total learned at the end");
    assert_eq!(std::fs::read(&out).unwrap(), data);
}

#[tokio::test(flavor = "multi_thread")]
async fn throttled_chunks_are_retried() {
    let data = body(4 * MB);
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            fail_first: 2,
            ..Default::default()
        },
    );
    let dir = tempdir().unwrap();
    let out = dir.path().join("retry.bin");

    let job = DownloadJob::new(request(&server.url, &out, None)).unwrap();
    let report = Engine::default().run(job).await.expect("download");

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(server.rejected(), 2);
    assert_eq!(report.stats.retries, 2);
    assert_eq!(report.stats.throttled, 2);
    assert_eq!(report.downloaded, data.len() as u64);
    assert_eq!(std::fs::read(&out).unwrap(), data);
}

#[tokio::test(flavor = "multi_thread")]
async fn retries_run_out() {
    let server = range_server::start_with_options(
        body(MB),
        RangeServerOptions {
            fail_first: usize::MAX,
            ..Default::default()
        },
    );
    let dir = tempdir().unwrap();
    let out = dir.path().join("never.bin");
    let runtime = RuntimeConfig {
        max_task_retries: 2,
        ..Default::default()
    };

    let job = DownloadJob::new(request(&server.url, &out, Some(runtime))).unwrap();
    let progress = Arc::clone(&job.progress);
    let err = Engine::default().run(job).await.unwrap_err();

    assert!(format!("{err:#}").contains("503"), "{err:#}");
    assert_eq!(server.rejected(), 2, "max_task_retries bounds the attempts");
    assert_eq!(progress.status(), JobStatus::Failed);
    assert!(!out.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_resource_fails_the_job() {
    let server = range_server::start_with_options(
        body(1024),
        RangeServerOptions {
            status: Some(404),
            ..Default::default()
        },
    );
    let dir = tempdir().unwrap();
    let out = dir.path().join("missing.bin");
    let (tx, mut rx) = progress_channel();
    let mut req = request(&server.url, &out, None);
    req.progress = Some(tx);

    let job = DownloadJob::new(req).unwrap();
    let progress = Arc::clone(&job.progress);
    let err = Engine::default().run(job).await.unwrap_err();

    assert!(format!("{err:#}").contains("404"), "{err:#}");
    assert_eq!(progress.status(), JobStatus::Failed);
    let last = drain(&mut rx).expect("final snapshot");
    assert_eq!(last.status, JobStatus::Failed);
    assert!(last.error.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn final_snapshot_reports_completion() {
    let data = body(2 * MB);
    let server = range_server::start(data.clone());
    let dir = tempdir().unwrap();
    let out = dir.path().join("snap.bin");
    let (tx, mut rx) = progress_channel();
    let mut req = request(&server.url, &out, None);
    req.progress = Some(tx);
    req.filename = "snap.bin".into();

    let job = DownloadJob::new(req).unwrap();
    Engine::default().run(job).await.expect("download");

    let last = drain(&mut rx).expect("final snapshot");
    assert_eq!(last.id, "job-1");
    assert_eq!(last.filename, "snap.bin");
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.downloaded, data.len() as u64);
    assert_eq!(last.total, Some(data.len() as u64));
    assert_eq!(last.active_connections, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn blocked_head_falls_back_to_range_probe() {
    let data = body(5 * MB);
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            head_allowed: false,
            ..Default::default()
        },
    );
    let dir = tempdir().unwrap();
    let out = dir.path().join("nohead.bin");
    let runtime = RuntimeConfig {
        target_chunk_size: (2 * MB) as i64,
        ..Default::default()
    };

    let job = DownloadJob::new(request(&server.url, &out, Some(runtime))).unwrap();
    let report = Engine::default().run(job).await.expect("download");

    assert_eq!(report.total, Some(data.len() as u64));
    assert!(server.served() > 1, "ranges discovered through the GET probe");
    assert_eq!(std::fs::read(&out).unwrap(), data);
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_chunk_is_recovered() {
    let data = body(8 * MB);
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            throttle: Some((32 * 1024, Duration::from_millis(10))),
            stall_once: Some(Duration::from_secs(3)),
            ..Default::default()
        },
    );
    let dir = tempdir().unwrap();
    let out = dir.path().join("stalled.bin");
    let runtime = RuntimeConfig {
        target_chunk_size: (2 * MB) as i64,
        stall_timeout_ms: 300,
        ..Default::default()
    };

    let job = DownloadJob::new(request(&server.url, &out, Some(runtime))).unwrap();
    let report = Engine::default().run(job).await.expect("download");

    assert_eq!(report.status, JobStatus::Completed);
    assert!(report.stats.reclaimed + report.stats.retries >= 1, "{:?}", report.stats);
    assert_eq!(report.downloaded, data.len() as u64);
    assert_eq!(std::fs::read(&out).unwrap(), data);
}

fn slow_server(data: Vec<u8>) -> range_server::RangeServer {
    range_server::start_with_options(
        data,
        RangeServerOptions {
            throttle: Some((32 * 1024, Duration::from_millis(10))),
            ..Default::default()
        },
    )
}

fn small_chunks() -> RuntimeConfig {
    RuntimeConfig {
        max_connections_per_host: 2,
        min_chunk_size: MB as i64,
        target_chunk_size: MB as i64,
        ..Default::default()
    }
}

async fn wait_registered(engine: &Engine, id: &str) {
    for _ in 0..100 {
        if engine.control().is_running(id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never registered");
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_then_resume_is_byte_exact() {
    let data = body(8 * MB);
    let server = slow_server(data.clone());
    let dir = tempdir().unwrap();
    let out = dir.path().join("paused.bin");
    let req = request(&server.url, &out, Some(small_chunks()));
    let engine = Engine::default();

    let job = DownloadJob::new(req.clone()).unwrap();
    let running = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(job).await })
    };
    wait_registered(&engine, "job-1").await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(engine.control().pause("job-1"));
    let paused = running.await.unwrap().expect("paused run");

    assert_eq!(paused.status, JobStatus::Paused);
    let point = paused.resume.clone().expect("resume point");
    assert_eq!(point.total, data.len() as u64);
    assert!(point.remaining_bytes() > 0);
    assert_eq!(
        paused.downloaded + point.remaining_bytes(),
        data.len() as u64,
        "counted bytes and remaining ranges partition the file"
    );
    assert!(part_exists(&out));
    assert!(!out.exists());

    let resumed = DownloadJob::new(req).unwrap().resume_from(point);
    let report = engine.run(resumed).await.expect("resumed run");
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.downloaded, data.len() as u64);
    assert_eq!(std::fs::read(&out).unwrap(), data);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_leaves_no_resume_point() {
    let data = body(8 * MB);
    let server = slow_server(data);
    let dir = tempdir().unwrap();
    let out = dir.path().join("cancelled.bin");
    let engine = Engine::default();

    let job = DownloadJob::new(request(&server.url, &out, Some(small_chunks()))).unwrap();
    let running = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(job).await })
    };
    wait_registered(&engine, "job-1").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(engine.control().cancel("job-1"));
    let report = running.await.unwrap().expect("cancelled run");

    assert_eq!(report.status, JobStatus::Cancelled);
    assert!(report.resume.is_none());
    assert!(!out.exists());
    assert!(!engine.control().is_running("job-1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn jobs_share_the_connection_limit() {
    let data = body(4 * MB);
    let server = slow_server(data.clone());
    let dir = tempdir().unwrap();
    let engine = Engine::new(2);
    let cap = 2;

    let mut runs = Vec::new();
    for i in 0..3 {
        let out = dir.path().join(format!("shared-{i}.bin"));
        let (tx, mut rx) = progress_channel();
        let mut req = request(&server.url, &out, Some(small_chunks()));
        req.id = format!("shared-{i}");
        req.progress = Some(tx);
        let job = DownloadJob::new(req).unwrap();
        let watcher = tokio::spawn(async move {
            let mut connections = Vec::new();
            loop {
                match rx.recv().await {
                    Ok(s) => connections.push(s.active_connections),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => return connections,
                }
            }
        });
        let engine = engine.clone();
        runs.push((out, watcher, tokio::spawn(async move { engine.run(job).await })));
    }

    let mut busiest = 0;
    for (out, watcher, run) in runs {
        let report = run.await.unwrap().expect("download");
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(std::fs::read(&out).unwrap(), data);
        let connections = watcher.await.unwrap();
        assert!(!connections.is_empty());
        for n in &connections {
            assert!(*n <= cap, "{n} connections with a cap of {cap}");
        }
        busiest = busiest.max(connections.into_iter().max().unwrap_or(0));
    }
    assert!(busiest > 0, "snapshots sampled while chunks were in flight");
    assert_eq!(engine.limiter().in_use(), 0);
}

fn drain(rx: &mut sdm_core::ProgressReceiver) -> Option<ProgressSnapshot> {
    let mut last = None;
    loop {
        match rx.try_recv() {
            Ok(s) => last = Some(s),
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return last,
        }
    }
}
