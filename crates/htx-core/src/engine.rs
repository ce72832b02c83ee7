//! Public façade: engine lifecycle, submissions, and dashboard queries.
//!
//! Three thread roles meet here. Any thread may submit work; submissions
//! are pushed to the background mailbox. One owned worker thread drains
//! that mailbox and drives the transfer pool. The host thread calls
//! [`HttpClient::pump`] to drain the foreground mailbox — the only place
//! user callbacks ever run.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::dashboard::ProgressBoard;
use crate::download::DownloadCallback;
use crate::mailbox::Mailbox;
use crate::options::HttpOption;
use crate::request::{self, Method, RequestJob, ResponseCallback};
use crate::storage;
use crate::worker::Worker;

/// Default total in-flight transfer cap.
pub const DEFAULT_MAX_CONNECTS: usize = 20;
/// Default download chunk size in megabytes.
pub const DEFAULT_BLOCK_SIZE_MB: usize = 20;

/// Tasks bound for the worker thread.
pub(crate) type BackgroundTask = Box<dyn FnOnce(&mut Worker) + Send + 'static>;
/// Tasks bound for the pumping (host) thread.
pub(crate) type ForegroundTask = Box<dyn FnOnce() + Send + 'static>;

/// State shared between submitters, the worker, and the host thread.
pub(crate) struct Shared {
    pub(crate) background: Mailbox<BackgroundTask>,
    pub(crate) foreground: Mailbox<ForegroundTask>,
    pub(crate) board: Arc<ProgressBoard>,
    pub(crate) alive: AtomicBool,
}

/// How long the worker dozes when it has nothing at all to do.
const IDLE_SLEEP: Duration = Duration::from_millis(20);

/// Handle onto a running transfer engine.
///
/// Submissions are fire-and-forget; every completion is delivered as a
/// single callback invocation from [`pump`](Self::pump). Dropping the
/// handle shuts the engine down and abandons whatever is still in
/// flight.
pub struct HttpClient {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl HttpClient {
    /// Starts the engine with a total in-flight connection cap. Must be
    /// called before any submission.
    ///
    /// Ten slots of the cap are reserved for download chunks; keep
    /// `max_connects` above [`crate::DOWNLOAD_CONNECTS`] or GET/POST
    /// requests will never be admitted.
    pub fn start_up(max_connects: usize) -> Result<Self> {
        let shared = Arc::new(Shared {
            background: Mailbox::new(),
            foreground: Mailbox::new(),
            board: Arc::new(ProgressBoard::default()),
            alive: AtomicBool::new(true),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("htx-worker".into())
            .spawn(move || worker_loop(worker_shared, max_connects))
            .context("spawn worker thread")?;
        tracing::info!(max_connects, "engine started");
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Starts the engine with [`DEFAULT_MAX_CONNECTS`].
    pub fn start_up_default() -> Result<Self> {
        Self::start_up(DEFAULT_MAX_CONNECTS)
    }

    /// Stops the worker and abandons in-flight transfers; their
    /// completion callbacks may never be delivered. Idempotent.
    pub fn shut_down(&mut self) {
        self.shared.alive.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("worker thread panicked");
            } else {
                tracing::info!("engine stopped");
            }
        }
    }

    /// Drains the foreground mailbox, invoking completion callbacks on
    /// the calling thread in delivery order. Call once per host-loop
    /// iteration. Returns the number of callbacks run.
    pub fn pump(&self) -> usize {
        let tasks = self.shared.foreground.take();
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }

    /// Fire-and-forget GET with scheme-derived options. The callback
    /// receives `(status, body)`; status 0 means the transfer never got a
    /// response. Returns the request id.
    pub fn request_get(
        &self,
        url: impl Into<String>,
        callback: impl FnOnce(u32, String) + Send + 'static,
    ) -> u64 {
        let url = url.into();
        let options = HttpOption::for_url(&url);
        self.submit_request(url, Method::Get, options, Box::new(callback))
    }

    /// GET with explicit options.
    pub fn request_get_with(
        &self,
        url: impl Into<String>,
        options: HttpOption,
        callback: impl FnOnce(u32, String) + Send + 'static,
    ) -> u64 {
        self.submit_request(url.into(), Method::Get, options, Box::new(callback))
    }

    /// Fire-and-forget POST. The engine owns the body until the transfer
    /// completes.
    pub fn request_post(
        &self,
        url: impl Into<String>,
        body: impl Into<String>,
        callback: impl FnOnce(u32, String) + Send + 'static,
    ) -> u64 {
        let url = url.into();
        let options = HttpOption::for_url(&url);
        self.submit_request(
            url,
            Method::Post(body.into().into_bytes()),
            options,
            Box::new(callback),
        )
    }

    /// POST with explicit options.
    pub fn request_post_with(
        &self,
        url: impl Into<String>,
        body: impl Into<String>,
        options: HttpOption,
        callback: impl FnOnce(u32, String) + Send + 'static,
    ) -> u64 {
        self.submit_request(
            url.into(),
            Method::Post(body.into().into_bytes()),
            options,
            Box::new(callback),
        )
    }

    fn submit_request(
        &self,
        url: String,
        method: Method,
        options: HttpOption,
        callback: ResponseCallback,
    ) -> u64 {
        let id = request::next_request_id();
        let job = RequestJob {
            id,
            url,
            method,
            options,
            callback: Some(callback),
        };
        self.shared
            .background
            .push(Box::new(move |worker: &mut Worker| worker.enqueue_request(job)));
        id
    }

    /// Submits a resumable download with the default block size and
    /// scheme-derived options. The callback fires exactly once with
    /// `(succeeded, dest)`; failure leaves the temp and log files behind
    /// so a resubmission resumes instead of restarting.
    pub fn push_download(
        &self,
        url: impl Into<String>,
        dest: impl Into<PathBuf>,
        callback: impl FnOnce(bool, PathBuf) + Send + 'static,
    ) {
        let url = url.into();
        let options = HttpOption::for_url(&url);
        self.push_download_with(url, dest, options, DEFAULT_BLOCK_SIZE_MB, true, callback);
    }

    /// Download with explicit options, block size (MB) and resume flag.
    /// At most one download per destination path may be active; a
    /// duplicate submission fails via its own callback.
    pub fn push_download_with(
        &self,
        url: impl Into<String>,
        dest: impl Into<PathBuf>,
        options: HttpOption,
        block_size_mb: usize,
        resume: bool,
        callback: impl FnOnce(bool, PathBuf) + Send + 'static,
    ) {
        let url = url.into();
        let dest = dest.into();
        let callback: DownloadCallback = Box::new(callback);
        self.shared.background.push(Box::new(move |worker: &mut Worker| {
            worker.enqueue_download(url, dest, options, block_size_mb, resume, callback)
        }));
    }

    /// Aggregate download speed for one destination, bytes/sec.
    pub fn download_speed(&self, path: &Path) -> f64 {
        self.shared.board.speed(path)
    }

    /// Bytes downloaded so far for one destination.
    pub fn download_size(&self, path: &Path) -> u64 {
        self.shared.board.size(path)
    }

    /// Both aggregates from one coherent snapshot.
    pub fn download_speed_and_size(&self, path: &Path) -> (f64, u64) {
        self.shared.board.speed_and_size(path)
    }

    /// Aggregate speed across every active download.
    pub fn download_all_speed(&self) -> f64 {
        self.shared.board.total_speed()
    }

    /// Deletes the temp and log files for `path`. Must not be called
    /// while a download for that path is active.
    pub fn clear_download(&self, path: &Path) -> Result<()> {
        storage::clear_files(path)
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) {
        self.shut_down();
    }
}

fn worker_loop(shared: Arc<Shared>, max_connects: usize) {
    let mut worker = Worker::new(Arc::clone(&shared), max_connects);
    while shared.alive.load(Ordering::Acquire) {
        for task in shared.background.take() {
            task(&mut worker);
        }
        if worker.is_idle() {
            thread::sleep(IDLE_SLEEP);
            continue;
        }
        if let Err(e) = worker.tick() {
            // Driver failures are logged and retried on the next tick.
            tracing::error!("driver tick failed: {:#}", e);
            thread::sleep(IDLE_SLEEP);
        }
    }
    worker.teardown();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_and_shutdown_is_idempotent() {
        let mut client = HttpClient::start_up(4).unwrap();
        assert_eq!(client.pump(), 0);
        client.shut_down();
        client.shut_down();
    }

    #[test]
    fn dashboard_queries_read_zero_when_inactive() {
        let client = HttpClient::start_up_default().unwrap();
        let path = Path::new("/tmp/never-downloaded.bin");
        assert_eq!(client.download_speed(path), 0.0);
        assert_eq!(client.download_size(path), 0);
        assert_eq!(client.download_speed_and_size(path), (0.0, 0));
        assert_eq!(client.download_all_speed(), 0.0);
    }
}
