//! Minimal HTTP/1.1 server that supports HEAD and Range GET for integration tests.
//!
//! Serves a single static body. Every response carries `Connection: close`,
//! so a body without Content-Length is delimited by the end of the stream.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RangeServerOptions {
    /// If false, HEAD returns 405 (simulates servers that block HEAD).
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes` header even if ranges work.
    pub advertise_ranges: bool,
    /// If true, never send Content-Length.
    pub omit_length: bool,
    /// Answer this many body GETs with 503 before serving normally. The
    /// one-byte probe request is not counted.
    pub fail_first: usize,
    /// Answer every request with this status and an empty body.
    pub status: Option<u16>,
    /// Send the body in pieces of this size, sleeping between them.
    pub throttle: Option<(usize, Duration)>,
    pub etag: Option<String>,
    /// The first body GET sends its headers, then goes silent for this long
    /// and closes without a body.
    pub stall_once: Option<Duration>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            advertise_ranges: true,
            omit_length: false,
            fail_first: 0,
            status: None,
            throttle: None,
            etag: Some("\"v1\"".to_string()),
            stall_once: None,
        }
    }
}

/// A running server. It lives until the process exits.
#[derive(Debug, Clone)]
pub struct RangeServer {
    pub url: String,
    /// Body GETs answered with 206 or 200 (probe excluded).
    pub served: Arc<AtomicUsize>,
    /// Body GETs answered with 503.
    pub rejected: Arc<AtomicUsize>,
    stalled: Arc<AtomicBool>,
}

impl RangeServer {
    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

/// Starts a server in a background thread serving `body`.
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

/// Like `start` but allows customizing server behavior.
pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let server = RangeServer {
        url: format!("http://127.0.0.1:{}/file.bin", port),
        served: Arc::new(AtomicUsize::new(0)),
        rejected: Arc::new(AtomicUsize::new(0)),
        stalled: Arc::new(AtomicBool::new(false)),
    };
    let body = Arc::new(body);
    let opts = Arc::new(opts);
    let shared = server.clone();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = Arc::clone(&opts);
            let shared = shared.clone();
            thread::spawn(move || handle(stream, &body, &opts, &shared));
        }
    });
    server
}

fn handle(mut stream: TcpStream, body: &[u8], opts: &RangeServerOptions, server: &RangeServer) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, range) = parse_request(request);

    if let Some(status) = opts.status {
        let _ = write!(
            stream,
            "HTTP/1.1 {} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            status
        );
        return;
    }

    let total = body.len() as u64;
    let mut common = String::from("Connection: close\r\n");
    if opts.advertise_ranges && opts.support_ranges {
        common.push_str("Accept-Ranges: bytes\r\n");
    }
    if let Some(etag) = &opts.etag {
        common.push_str(&format!("ETag: {}\r\n", etag));
    }

    if method.eq_ignore_ascii_case("HEAD") {
        if !opts.head_allowed {
            let _ = stream.write_all(
                b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
            return;
        }
        let length = if opts.omit_length {
            String::new()
        } else {
            format!("Content-Length: {}\r\n", total)
        };
        let _ = write!(stream, "HTTP/1.1 200 OK\r\n{}{}\r\n", length, common);
        return;
    }
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(
            b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }

    let is_probe = range == Some((0, 0));
    if !is_probe {
        let failed = server.rejected.load(Ordering::SeqCst);
        if failed < opts.fail_first {
            server.rejected.fetch_add(1, Ordering::SeqCst);
            let _ = stream.write_all(
                b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
            return;
        }
        server.served.fetch_add(1, Ordering::SeqCst);
    }

    let (status, content_range, slice) = match range.filter(|_| opts.support_ranges) {
        Some((start, end_incl)) => {
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start > end_incl || start >= total {
                (
                    "416 Range Not Satisfiable",
                    Some(format!("bytes */{}", total)),
                    &body[0..0],
                )
            } else {
                let slice = &body[start as usize..=end_incl as usize];
                (
                    "206 Partial Content",
                    Some(format!("bytes {}-{}/{}", start, end_incl, total)),
                    slice,
                )
            }
        }
        None => ("200 OK", None, body),
    };

    let mut head = format!("HTTP/1.1 {}\r\n{}", status, common);
    if !opts.omit_length {
        head.push_str(&format!("Content-Length: {}\r\n", slice.len()));
    }
    if let Some(cr) = content_range {
        head.push_str(&format!("Content-Range: {}\r\n", cr));
    }
    head.push_str("\r\n");
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }
    if let Some(silence) = opts.stall_once {
        if !is_probe && !server.stalled.swap(true, Ordering::SeqCst) {
            thread::sleep(silence);
            return;
        }
    }
    match opts.throttle {
        Some((piece, pause)) => {
            for part in slice.chunks(piece.max(1)) {
                if stream.write_all(part).is_err() {
                    return;
                }
                thread::sleep(pause);
            }
        }
        None => {
            let _ = stream.write_all(slice);
        }
    }
}

/// Returns (method, optional (start, end_inclusive) for Range: bytes=X-Y).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(spec) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = spec.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = b.trim();
                        let end_incl = if end.is_empty() {
                            u64::MAX
                        } else {
                            end.parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, range)
}
