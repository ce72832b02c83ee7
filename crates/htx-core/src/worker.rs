//! The engine's worker side: transfer pool and completion router.
//!
//! Owns the curl multi handle, the two wait queues, and every in-flight
//! transfer. One driver tick advances the multi handle, waits for socket
//! readiness (bounded), routes completed transfers, then admits queued
//! work — keeping a reserved share of the connection budget for download
//! chunks so request floods cannot starve them.

use anyhow::{Context, Result};
use curl::easy::Easy2;
use curl::multi::{Easy2Handle, Multi};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::download::{
    chunk_result, ChunkOutcome, ChunkSink, DownloadCallback, DownloadJob, PendingChunk,
};
use crate::engine::Shared;
use crate::options::HttpOption;
use crate::planner::{self, DownloadPlan};
use crate::range_log::{self, RangeLog};
use crate::request::{Method, RequestJob, RequestSink, ResponseCallback};
use crate::storage::{self, StorageWriter, StorageWriterBuilder};

/// Connection slots reserved for download chunks out of the total cap.
pub const DOWNLOAD_CONNECTS: usize = 10;

/// Upper bound on one readiness wait, also used when the primitive
/// reports no timeout of its own.
const WAIT_CLAMP: Duration = Duration::from_millis(100);

/// One in-flight transfer registered with the multi handle. The variant
/// is the tag the completion router dispatches on.
enum Active {
    Request(Easy2Handle<RequestSink>),
    Chunk(Easy2Handle<ChunkSink>),
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
    multi: Multi,
    max_connects: usize,
    wait_requests: VecDeque<RequestJob>,
    wait_chunks: VecDeque<PendingChunk>,
    active: Vec<Active>,
    jobs: HashMap<PathBuf, DownloadJob>,
}

impl Worker {
    pub(crate) fn new(shared: Arc<Shared>, max_connects: usize) -> Self {
        Self {
            shared,
            multi: Multi::new(),
            max_connects: max_connects.max(1),
            wait_requests: VecDeque::new(),
            wait_chunks: VecDeque::new(),
            active: Vec::new(),
            jobs: HashMap::new(),
        }
    }

    /// True when there is nothing in flight and nothing queued.
    pub(crate) fn is_idle(&self) -> bool {
        self.active.is_empty() && self.wait_requests.is_empty() && self.wait_chunks.is_empty()
    }

    /// Queues a GET/POST submission.
    pub(crate) fn enqueue_request(&mut self, job: RequestJob) {
        tracing::debug!(id = job.id, url = %job.url, "request queued");
        self.wait_requests.push_back(job);
    }

    /// Plans a download submission and queues its chunks. Planning
    /// failures settle the job immediately with `(false, dest)` without
    /// touching the disk.
    pub(crate) fn enqueue_download(
        &mut self,
        url: String,
        dest: PathBuf,
        options: HttpOption,
        block_size_mb: usize,
        resume: bool,
        callback: DownloadCallback,
    ) {
        if self.jobs.contains_key(&dest) {
            tracing::warn!(dest = %dest.display(), "download already active for this destination");
            self.finish_download(callback, false, dest);
            return;
        }

        let block_bytes = (block_size_mb as u64) * 1024 * 1024;
        let plan = match planner::plan_download(&url, &options, block_bytes, resume, &dest) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(dest = %dest.display(), "download planning failed: {:#}", e);
                self.finish_download(callback, false, dest);
                return;
            }
        };

        let storage = match open_storage(&dest, &plan) {
            Ok(storage) => storage,
            Err(e) => {
                tracing::error!(dest = %dest.display(), "cannot open temp file: {:#}", e);
                self.finish_download(callback, false, dest);
                return;
            }
        };

        // Zero-length resource: nothing to fetch, finalize right away.
        if plan.ranges.is_empty() {
            let ok = storage.finalize(&dest).is_ok();
            self.finish_download(callback, ok, dest);
            return;
        }

        // Persist the effective list (also when it was loaded) so record
        // index i always lines up with chunk index i for in-place updates.
        let log = if resume {
            match RangeLog::create(&dest, &plan.ranges) {
                Ok(log) => Some(log),
                Err(e) => {
                    tracing::warn!(dest = %dest.display(), "range log unavailable, download will not resume: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        for (index, range) in plan.ranges.iter().enumerate() {
            self.wait_chunks.push_back(PendingChunk {
                dest: dest.clone(),
                index,
                range: *range,
            });
        }
        tracing::info!(dest = %dest.display(), chunks = plan.ranges.len(), resumed = plan.resumed, "download queued");
        self.jobs.insert(
            dest.clone(),
            DownloadJob {
                url,
                options,
                resume,
                dest,
                storage,
                log,
                outcomes: vec![ChunkOutcome::Pending; plan.ranges.len()],
                callback: Some(callback),
            },
        );
    }

    /// One driver tick: advance transfers, wait briefly for socket
    /// readiness, route completions, then admit queued transfers.
    pub(crate) fn tick(&mut self) -> Result<()> {
        let running = self.multi.perform().context("multi perform")?;
        if running > 0 {
            let timeout = match self.multi.get_timeout().context("multi timeout")? {
                Some(t) => t.min(WAIT_CLAMP),
                None => WAIT_CLAMP,
            };
            if !timeout.is_zero() {
                self.multi.wait(&mut [], timeout).context("multi wait")?;
            }
        }
        self.route_completions()?;
        self.admit();
        Ok(())
    }

    /// Drains the multi handle's completion messages and routes each
    /// finished transfer by its tag.
    fn route_completions(&mut self) -> Result<()> {
        let mut finished: Vec<(usize, Result<(), curl::Error>)> = Vec::new();
        self.multi.messages(|msg| {
            for (i, act) in self.active.iter().enumerate() {
                let result = match act {
                    Active::Request(handle) => msg.result_for2(handle),
                    Active::Chunk(handle) => msg.result_for2(handle),
                };
                if let Some(result) = result {
                    finished.push((i, result));
                    break;
                }
            }
        });
        finished.sort_by(|a, b| b.0.cmp(&a.0));
        for (i, transfer) in finished {
            match self.active.remove(i) {
                Active::Request(handle) => self.finish_request(handle, transfer)?,
                Active::Chunk(handle) => self.finish_chunk(handle, transfer)?,
            }
        }
        Ok(())
    }

    fn finish_request(
        &mut self,
        handle: Easy2Handle<RequestSink>,
        transfer: Result<(), curl::Error>,
    ) -> Result<()> {
        let mut easy = self.multi.remove2(handle).context("detach request transfer")?;
        let code = easy.response_code().unwrap_or(0);
        if let Err(e) = transfer {
            tracing::debug!(code, "request transfer failed: {}", e);
        }
        let sink = easy.get_mut();
        let id = sink.id;
        let body = sink.take_body();
        if let Some(callback) = sink.callback.take() {
            self.shared
                .foreground
                .push(Box::new(move || callback(code, body)));
        }
        tracing::debug!(id, code, "request completed");
        Ok(())
    }

    fn finish_chunk(
        &mut self,
        handle: Easy2Handle<ChunkSink>,
        transfer: Result<(), curl::Error>,
    ) -> Result<()> {
        let mut easy = self.multi.remove2(handle).context("detach chunk transfer")?;
        let code = easy.response_code().unwrap_or(0);
        let sink = easy.get_mut();
        let dest = sink.dest().to_path_buf();
        let index = sink.index();
        let received = sink.bytes_written();
        let expected = sink.expected();
        let storage_error = sink.take_storage_error();
        self.shared.board.update(&dest, index, 0.0, received);

        let ok = match chunk_result(code, transfer, storage_error, expected, received) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(dest = %dest.display(), index, "chunk failed: {}", e);
                false
            }
        };
        drop(easy);
        self.settle_chunk(&dest, index, ok);
        Ok(())
    }

    /// Records one chunk's outcome; when it is the job's last open chunk,
    /// finalizes (or abandons) the files and emits the terminal callback.
    fn settle_chunk(&mut self, dest: &Path, index: usize, ok: bool) {
        let Some(job) = self.jobs.get_mut(dest) else {
            return;
        };
        job.outcomes[index] = if ok { ChunkOutcome::Succeed } else { ChunkOutcome::Failed };
        let Some(success) = job.verdict() else {
            return;
        };
        let Some(job) = self.jobs.remove(dest) else {
            return;
        };
        let DownloadJob { dest, storage, mut callback, .. } = job;

        let mut verdict = success;
        if success {
            if let Err(e) = storage.finalize(&dest) {
                tracing::error!(dest = %dest.display(), "finalize failed: {:#}", e);
                verdict = false;
            } else if let Err(e) = range_log::remove(&dest) {
                tracing::warn!(dest = %dest.display(), "cannot remove range log: {:#}", e);
            }
        }
        // On failure temp and log stay behind so a resubmission with
        // resume picks up from here.

        self.shared.board.remove(&dest);
        tracing::info!(dest = %dest.display(), ok = verdict, "download finished");
        if let Some(callback) = callback.take() {
            self.finish_download(callback, verdict, dest);
        }
    }

    fn finish_download(&self, callback: DownloadCallback, ok: bool, dest: PathBuf) {
        self.shared
            .foreground
            .push(Box::new(move || callback(ok, dest)));
    }

    /// Admission: download chunks first, up to their reservation, then
    /// requests up to the total cap — at most `max − reservation` request
    /// promotions per tick, so requests can never crowd out queued
    /// downloads.
    fn admit(&mut self) {
        let download_cap = DOWNLOAD_CONNECTS.min(self.max_connects);
        let mut chunks_active = self
            .active
            .iter()
            .filter(|a| matches!(a, Active::Chunk(_)))
            .count();
        while chunks_active < download_cap && self.active.len() < self.max_connects {
            let Some(chunk) = self.wait_chunks.pop_front() else {
                break;
            };
            if self.activate_chunk(chunk) {
                chunks_active += 1;
            }
        }

        let request_budget = self.max_connects.saturating_sub(DOWNLOAD_CONNECTS);
        let mut promoted = 0;
        while self.active.len() < self.max_connects && promoted < request_budget {
            let Some(job) = self.wait_requests.pop_front() else {
                break;
            };
            if self.activate_request(job) {
                promoted += 1;
            }
        }
    }

    fn activate_chunk(&mut self, chunk: PendingChunk) -> bool {
        match self.add_chunk_transfer(&chunk) {
            Ok(handle) => {
                self.active.push(Active::Chunk(handle));
                true
            }
            Err(e) => {
                tracing::error!(dest = %chunk.dest.display(), index = chunk.index, "cannot start chunk transfer: {:#}", e);
                self.settle_chunk(&chunk.dest, chunk.index, false);
                false
            }
        }
    }

    fn add_chunk_transfer(&mut self, chunk: &PendingChunk) -> Result<Easy2Handle<ChunkSink>> {
        let job = self.jobs.get(&chunk.dest).context("no job for queued chunk")?;
        let sink = ChunkSink::new(
            chunk.dest.clone(),
            chunk.index,
            chunk.range,
            job.storage.clone(),
            job.log.clone(),
            Arc::clone(&self.shared.board),
        );
        let mut easy = Easy2::new(sink);
        easy.url(&job.url).context("invalid URL")?;
        job.options.apply(&mut easy).context("apply transfer options")?;
        easy.range(&chunk.range.to_http_range()).context("set byte range")?;
        self.multi.add2(easy).context("register chunk transfer")
    }

    fn activate_request(&mut self, job: RequestJob) -> bool {
        let RequestJob { id, url, method, options, callback } = job;
        // The callback stays out of the sink until registration succeeds,
        // so every failure path below can still deliver it.
        let mut easy = Easy2::new(RequestSink::new(id, None));
        if let Err(e) = configure_request(&mut easy, &url, &options, method) {
            tracing::warn!(id, url = %url, "cannot start request: {}", e);
            self.fail_request(callback);
            return false;
        }
        match self.multi.add2(easy) {
            Ok(mut handle) => {
                handle.get_mut().callback = callback;
                self.active.push(Active::Request(handle));
                true
            }
            Err(e) => {
                tracing::error!(id, "cannot register request transfer: {}", e);
                self.fail_request(callback);
                false
            }
        }
    }

    /// Fires a request callback with status 0 when its transfer could not
    /// be started, keeping delivery exactly-once even for doomed
    /// requests.
    fn fail_request(&self, callback: Option<ResponseCallback>) {
        if let Some(callback) = callback {
            self.shared
                .foreground
                .push(Box::new(move || callback(0, String::new())));
        }
    }

    /// Detaches anything still in flight and drops all queued state.
    pub(crate) fn teardown(mut self) {
        for act in self.active.drain(..) {
            let detached = match act {
                Active::Request(handle) => self.multi.remove2(handle).map(drop),
                Active::Chunk(handle) => self.multi.remove2(handle).map(drop),
            };
            if let Err(e) = detached {
                tracing::debug!("detach in-flight transfer: {}", e);
            }
        }
        self.wait_requests.clear();
        self.wait_chunks.clear();
        self.jobs.clear();
        tracing::debug!("worker state torn down");
    }
}

fn configure_request(
    easy: &mut Easy2<RequestSink>,
    url: &str,
    options: &HttpOption,
    method: Method,
) -> Result<(), curl::Error> {
    easy.url(url)?;
    options.apply(easy)?;
    match method {
        Method::Get => easy.get(true)?,
        Method::Post(body) => {
            easy.post(true)?;
            easy.post_fields_copy(&body)?;
        }
    }
    Ok(())
}

fn open_storage(dest: &Path, plan: &DownloadPlan) -> Result<StorageWriter> {
    let temp = storage::temp_path(dest);
    if plan.resumed {
        StorageWriter::open_resume(&temp)
    } else {
        let mut builder = StorageWriterBuilder::create(&temp)?;
        builder.preallocate(plan.total_len())?;
        Ok(builder.build())
    }
}
