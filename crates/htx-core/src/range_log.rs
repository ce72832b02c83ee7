//! Persistent range log: the on-disk list of outstanding byte ranges for
//! one download, so an interrupted run resumes where it left off.
//!
//! The file is `dest + ".ftxlog"`. Layout: one count line followed by one
//! record per range, every field 20-digit zero-padded decimal so the hot
//! `update` path can overwrite a single begin field in place:
//!
//! ```text
//! 00000000000000000002\n
//! 00000000000000010000 00000000000000020000\n
//! 00000000000000030000 00000000000000040000\n
//! ```
//!
//! `load` parses whitespace-separated integers, so anything written by
//! `write` reads back unchanged. Pairs with `begin >= end` are dropped at
//! load; a fully-downloaded chunk leaves exactly such a record behind,
//! which is how finished chunks fall out of a resumed plan.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::range::ByteRange;

/// Suffix appended to the destination path for the log file.
pub const LOG_SUFFIX: &str = ".ftxlog";

const COUNT_LINE_LEN: u64 = 21;
const RECORD_LEN: u64 = 42;

/// Path of the range log for a destination: `dest + ".ftxlog"`.
pub fn log_path(dest: &Path) -> PathBuf {
    let mut p = dest.as_os_str().to_owned();
    p.push(LOG_SUFFIX);
    PathBuf::from(p)
}

/// Reads the persisted range list for `dest`, or empty if the log is
/// absent or unreadable.
pub fn load(dest: &Path) -> Vec<ByteRange> {
    match std::fs::read_to_string(log_path(dest)) {
        Ok(text) => parse(&text),
        Err(_) => Vec::new(),
    }
}

fn parse(text: &str) -> Vec<ByteRange> {
    let mut ints = text.split_whitespace().map(str::parse::<u64>);
    let Some(Ok(count)) = ints.next() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for _ in 0..count {
        match (ints.next(), ints.next()) {
            (Some(Ok(start)), Some(Ok(end))) if start < end => {
                out.push(ByteRange { start, end });
            }
            // Finished chunk (start == end) or inverted pair: skip it.
            (Some(Ok(_)), Some(Ok(_))) => {}
            // Truncated or garbled tail: keep what parsed cleanly.
            _ => break,
        }
    }
    out
}

/// Deletes the log file for `dest` if present.
pub fn remove(dest: &Path) -> Result<()> {
    let path = log_path(dest);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove range log: {}", path.display())),
    }
}

/// An open range log. Clones share the file handle, so every chunk sink of
/// a job can patch its own record; records sit at disjoint offsets and the
/// worker thread is the only writer.
#[derive(Clone)]
pub struct RangeLog {
    file: Arc<File>,
}

impl RangeLog {
    /// Creates (or truncates) the log for `dest` and persists `ranges`.
    pub fn create(dest: &Path, ranges: &[ByteRange]) -> Result<Self> {
        let path = log_path(dest);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("create range log: {}", path.display()))?;
        let log = RangeLog { file: Arc::new(file) };
        log.write(ranges)?;
        Ok(log)
    }

    /// Truncates and rewrites the whole list.
    pub fn write(&self, ranges: &[ByteRange]) -> Result<()> {
        let mut buf = String::with_capacity(COUNT_LINE_LEN as usize + ranges.len() * RECORD_LEN as usize);
        buf.push_str(&format!("{:020}\n", ranges.len()));
        for r in ranges {
            buf.push_str(&format!("{:020} {:020}\n", r.start, r.end));
        }
        self.file.set_len(0).context("truncate range log")?;
        write_all_at(&self.file, 0, buf.as_bytes()).context("write range log")
    }

    /// Overwrites just the begin field of record `index`. Hot path: called
    /// from the chunk write sink after every block.
    pub fn update(&self, index: usize, new_start: u64) -> Result<()> {
        let offset = COUNT_LINE_LEN + RECORD_LEN * index as u64;
        write_all_at(&self.file, offset, format!("{:020}", new_start).as_bytes())
            .context("update range log record")
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(not(unix))]
fn write_all_at(file: &File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    let mut f = file.try_clone()?;
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(data)
}
