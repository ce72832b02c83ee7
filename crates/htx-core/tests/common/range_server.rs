//! Minimal HTTP/1.1 server for integration tests: HEAD with
//! Content-Length, Range GET with 206, POST echo, failure injection, and
//! optional concurrency telemetry for connection-pool assertions.
//!
//! Serves a single static body. Each connection handles one request and
//! closes, which is enough for curl to retry on a fresh connection.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, HEAD returns 405 (simulates servers that block HEAD).
    pub head_allowed: bool,
    /// If true, every Range GET returns 500 with an empty body.
    pub fail_ranges: bool,
    /// Hold every GET open for this long before responding, so that
    /// transfers overlap and concurrency is observable.
    pub delay: Option<Duration>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            fail_ranges: false,
            delay: None,
        }
    }
}

/// Concurrency counters recorded by an instrumented server. Concurrency
/// seen here is a lower bound on the client's in-flight transfer count,
/// so the max values are sound witnesses for pool-cap assertions.
#[derive(Default)]
pub struct Telemetry {
    active_ranges: AtomicUsize,
    active_plain: AtomicUsize,
    /// Range GETs fully served so far.
    pub ranges_done: AtomicUsize,
    /// While `ranges_done` is below this, chunk demand is known to still
    /// be queued client-side (set it to chunk_total - reservation).
    pub queued_threshold: AtomicUsize,
    /// Highest number of concurrent Range GETs.
    pub max_ranges: AtomicUsize,
    /// Highest number of concurrent GETs of any kind.
    pub max_total: AtomicUsize,
    /// Highest number of concurrent plain GETs seen while chunk demand
    /// was still queued.
    pub max_plain_while_ranges_queued: AtomicUsize,
}

/// Starts a server in a background thread serving `body`. Returns the
/// base URL (e.g. "http://127.0.0.1:12345/"). Runs until the process
/// exits.
pub fn start(body: Vec<u8>) -> String {
    serve(body, RangeServerOptions::default(), None)
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> String {
    serve(body, opts, None)
}

/// Like `start_with_options`, but records concurrency telemetry. Plain
/// GETs answer with a tiny canned body so a flood of them stays cheap.
pub fn start_instrumented(
    body: Vec<u8>,
    opts: RangeServerOptions,
    telemetry: Arc<Telemetry>,
) -> String {
    serve(body, opts, Some(telemetry))
}

fn serve(body: Vec<u8>, opts: RangeServerOptions, telemetry: Option<Arc<Telemetry>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let telemetry = telemetry.clone();
            thread::spawn(move || handle(stream, &body, opts, telemetry));
        }
    });
    format!("http://127.0.0.1:{}/", port)
}

fn handle(
    mut stream: std::net::TcpStream,
    body: &[u8],
    opts: RangeServerOptions,
    telemetry: Option<Arc<Telemetry>>,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));

    let Some(request) = read_request(&mut stream) else {
        return;
    };
    let Some(head_end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
        return;
    };
    let header_text = match std::str::from_utf8(&request[..head_end]) {
        Ok(s) => s.to_string(),
        Err(_) => return,
    };
    let (method, range, _content_length) = parse_request(&header_text);
    let total = body.len() as u64;

    if method.eq_ignore_ascii_case("HEAD") {
        if !opts.head_allowed {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
            return;
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\n\r\n",
            total
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if method.eq_ignore_ascii_case("POST") {
        // Echo the request body back.
        let received = &request[head_end + 4..];
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
            received.len()
        );
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.write_all(received);
        return;
    }

    if method.eq_ignore_ascii_case("GET") {
        if let Some((start, end_incl)) = range {
            if let Some(t) = &telemetry {
                let cur = t.active_ranges.fetch_add(1, Ordering::SeqCst) + 1;
                t.max_ranges.fetch_max(cur, Ordering::SeqCst);
                t.max_total
                    .fetch_max(cur + t.active_plain.load(Ordering::SeqCst), Ordering::SeqCst);
            }
            if let Some(delay) = opts.delay {
                thread::sleep(delay);
            }
            serve_range(&mut stream, body, total, start, end_incl, opts);
            if let Some(t) = &telemetry {
                t.active_ranges.fetch_sub(1, Ordering::SeqCst);
                t.ranges_done.fetch_add(1, Ordering::SeqCst);
            }
        } else {
            if let Some(t) = &telemetry {
                let cur = t.active_plain.fetch_add(1, Ordering::SeqCst) + 1;
                if t.ranges_done.load(Ordering::SeqCst) < t.queued_threshold.load(Ordering::SeqCst)
                {
                    t.max_plain_while_ranges_queued.fetch_max(cur, Ordering::SeqCst);
                }
                t.max_total
                    .fetch_max(cur + t.active_ranges.load(Ordering::SeqCst), Ordering::SeqCst);
            }
            if let Some(delay) = opts.delay {
                thread::sleep(delay);
            }
            let payload: &[u8] = if telemetry.is_some() { b"ok" } else { body };
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\n\r\n",
                payload.len()
            );
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.write_all(payload);
            if let Some(t) = &telemetry {
                t.active_plain.fetch_sub(1, Ordering::SeqCst);
            }
        }
        return;
    }

    let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
}

fn serve_range(
    stream: &mut std::net::TcpStream,
    body: &[u8],
    total: u64,
    start: u64,
    end_incl: u64,
    opts: RangeServerOptions,
) {
    if opts.fail_ranges {
        let _ = stream.write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n");
        return;
    }
    let start = start.min(total);
    let end_incl = end_incl.min(total.saturating_sub(1));
    if total == 0 || start > end_incl {
        let response = format!(
            "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\n\r\n",
            total
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    let slice = &body[start as usize..=(end_incl as usize)];
    let response = format!(
        "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nAccept-Ranges: bytes\r\n\r\n",
        slice.len(),
        start,
        end_incl,
        total
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(slice);
}

/// Reads the request head plus any Content-Length body.
fn read_request(stream: &mut std::net::TcpStream) -> Option<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let head_end = data.windows(4).position(|w| w == b"\r\n\r\n");
        if let Some(head_end) = head_end {
            let header_text = std::str::from_utf8(&data[..head_end]).ok()?;
            let (_, _, content_length) = parse_request(header_text);
            let want = head_end + 4 + content_length.unwrap_or(0);
            if data.len() >= want {
                data.truncate(want);
                return Some(data);
            }
        }
        match stream.read(&mut buf) {
            Ok(0) => return if data.is_empty() { None } else { Some(data) },
            Ok(n) => data.extend_from_slice(&buf[..n]),
            Err(_) => return None,
        }
    }
}

/// Returns (method, optional (start, end_inclusive) from `Range: bytes=X-Y`,
/// optional Content-Length).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>, Option<usize>) {
    let mut method = "";
    let mut range = None;
    let mut content_length = None;
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
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse::<usize>().ok();
            }
            if name.eq_ignore_ascii_case("range") {
                if let Some(ranges) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = ranges.trim().split_once('-') {
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
    (method, range, content_length)
}
