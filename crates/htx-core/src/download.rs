//! Download jobs, chunk state, and the chunk write sink.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use curl::easy::{Handler, WriteError};

use crate::dashboard::ProgressBoard;
use crate::error::TransferError;
use crate::options::HttpOption;
use crate::range::ByteRange;
use crate::range_log::RangeLog;
use crate::storage::StorageWriter;

/// Callback invoked on the pumping thread with `(succeeded, dest)`.
pub type DownloadCallback = Box<dyn FnOnce(bool, PathBuf) + Send + 'static>;

/// Completion state of one chunk of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Pending,
    Succeed,
    Failed,
}

/// One active download job, keyed by its destination path.
pub struct DownloadJob {
    pub url: String,
    pub options: HttpOption,
    pub resume: bool,
    pub dest: PathBuf,
    pub storage: StorageWriter,
    /// Open log shared with the chunk sinks; `None` when resume is off.
    pub log: Option<RangeLog>,
    pub outcomes: Vec<ChunkOutcome>,
    pub callback: Option<DownloadCallback>,
}

impl DownloadJob {
    /// Folds the chunk outcomes into the job verdict: `None` while any
    /// chunk is pending, then `Some(false)` if any chunk failed, else
    /// `Some(true)`.
    pub fn verdict(&self) -> Option<bool> {
        if self.outcomes.iter().any(|o| *o == ChunkOutcome::Pending) {
            return None;
        }
        Some(self.outcomes.iter().all(|o| *o == ChunkOutcome::Succeed))
    }
}

/// A chunk waiting in the download queue for a transfer slot.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub dest: PathBuf,
    pub index: usize,
    pub range: ByteRange,
}

const SPEED_WINDOW: Duration = Duration::from_millis(500);

/// Windowed estimate of instantaneous transfer speed, fed from the byte
/// stream itself.
struct SpeedGauge {
    window_start: Instant,
    window_bytes: u64,
    rate: f64,
}

impl SpeedGauge {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            window_bytes: 0,
            rate: 0.0,
        }
    }

    /// Accounts `n` fresh bytes; returns the current estimate in
    /// bytes/sec.
    fn on_bytes(&mut self, n: u64) -> f64 {
        self.window_bytes += n;
        let elapsed = self.window_start.elapsed();
        if elapsed >= SPEED_WINDOW {
            self.rate = self.window_bytes as f64 / elapsed.as_secs_f64();
            self.window_start = Instant::now();
            self.window_bytes = 0;
        }
        self.rate
    }
}

/// Write sink for one download chunk.
///
/// Validates `206 Partial Content` plus an exact `Content-Range` match
/// before the first write, then lands each block at the chunk's current
/// offset, advances the persisted range, and publishes progress to the
/// board. Returning fewer bytes than offered makes the transfer fail,
/// which is how disk errors and bad range replies abort a chunk.
pub struct ChunkSink {
    dest: PathBuf,
    index: usize,
    range: ByteRange,
    expected: u64,
    bytes_written: u64,
    storage: StorageWriter,
    log: Option<RangeLog>,
    board: Arc<ProgressBoard>,
    response_headers: Vec<String>,
    /// `None` = not yet checked; `Some(false)` = reject all writes.
    range_ok: Option<bool>,
    /// First disk failure, kept so the router can classify the abort.
    storage_error: Option<std::io::Error>,
    gauge: SpeedGauge,
}

impl ChunkSink {
    pub fn new(
        dest: PathBuf,
        index: usize,
        range: ByteRange,
        storage: StorageWriter,
        log: Option<RangeLog>,
        board: Arc<ProgressBoard>,
    ) -> Self {
        Self {
            dest,
            index,
            expected: range.len(),
            range,
            bytes_written: 0,
            storage,
            log,
            board,
            response_headers: Vec::new(),
            range_ok: None,
            storage_error: None,
            gauge: SpeedGauge::new(),
        }
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Takes the first disk failure seen by this sink, if any.
    pub(crate) fn take_storage_error(&mut self) -> Option<std::io::Error> {
        self.storage_error.take()
    }
}

impl Handler for ChunkSink {
    fn header(&mut self, data: &[u8]) -> bool {
        if let Ok(s) = std::str::from_utf8(data) {
            let line = s.trim_end();
            if line.starts_with("HTTP/") {
                self.response_headers.clear();
            }
            self.response_headers.push(line.to_string());
        }
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if self.range_ok.is_none() {
            let status = parse_http_status(&self.response_headers);
            let content_ok = parse_content_range(&self.response_headers)
                .map(|(s, e)| s == self.range.start && e == self.range.end.saturating_sub(1))
                .unwrap_or(false);
            self.range_ok = Some(status == Some(206) && content_ok);
        }
        if self.range_ok == Some(false) {
            return Ok(0);
        }
        match self.storage.write_at(self.range.start, data) {
            Ok(()) => {
                let n = data.len();
                self.range.start += n as u64;
                self.bytes_written += n as u64;
                if let Some(log) = &self.log {
                    if let Err(e) = log.update(self.index, self.range.start) {
                        tracing::warn!(index = self.index, "range log update failed: {:#}", e);
                    }
                }
                let speed = self.gauge.on_bytes(n as u64);
                self.board.update(&self.dest, self.index, speed, self.bytes_written);
                Ok(n)
            }
            Err(e) => {
                tracing::error!(dest = %self.dest.display(), index = self.index, "chunk write failed: {:#}", e);
                let io_err = e.downcast::<std::io::Error>().unwrap_or_else(|e| {
                    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
                });
                self.storage_error.get_or_insert(io_err);
                Ok(0)
            }
        }
    }
}

/// Classifies a finished chunk transfer: disk failures first, then the
/// curl-level result, the final status, and whether every expected byte
/// landed.
pub(crate) fn chunk_result(
    code: u32,
    transfer: Result<(), curl::Error>,
    storage_error: Option<std::io::Error>,
    expected: u64,
    received: u64,
) -> Result<(), TransferError> {
    if let Some(e) = storage_error {
        return Err(TransferError::Storage(e));
    }
    transfer?;
    if !(200..300).contains(&code) {
        return Err(TransferError::Http(code));
    }
    if received != expected {
        return Err(TransferError::PartialTransfer { expected, received });
    }
    Ok(())
}

fn parse_http_status(headers: &[String]) -> Option<u32> {
    let first = headers.first()?;
    first
        .strip_prefix("HTTP/")?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

/// Parses `Content-Range: bytes <start>-<end>/<total>` into
/// `(start, end_inclusive)`.
fn parse_content_range(headers: &[String]) -> Option<(u64, u64)> {
    for line in headers {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("content-range") {
            continue;
        }
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (range_part, _total) = rest.split_once('/')?;
        let (a, b) = range_part.split_once('-')?;
        return Some((a.trim().parse().ok()?, b.trim().parse().ok()?));
    }
    None
}
