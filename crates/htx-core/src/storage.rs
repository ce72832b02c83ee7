//! Temp-file lifecycle and concurrent offset writes.
//!
//! Each download writes into `dest + ".ftxtmp"`: preallocated up front
//! (fallocate on Linux when available, else `set_len`), chunks write at
//! their own byte offsets (pwrite-style), and on success the temp file is
//! atomically renamed onto the destination.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use crate::range_log;

/// Suffix appended to the destination path for the temp file.
pub const TEMP_SUFFIX: &str = ".ftxtmp";

/// Path of the temp file for a destination: `dest + ".ftxtmp"`.
pub fn temp_path(dest: &Path) -> PathBuf {
    let mut p = dest.as_os_str().to_owned();
    p.push(TEMP_SUFFIX);
    PathBuf::from(p)
}

/// Deletes the temp and log files for `dest` if present. Must not be
/// called while a download for that destination is active.
pub fn clear_files(dest: &Path) -> Result<()> {
    let tmp = temp_path(dest);
    match std::fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("remove temp file: {}", tmp.display())),
    }
    range_log::remove(dest)
}

/// Builder for a fresh temp file. Call `preallocate` then `build` to get a
/// `StorageWriter` usable for concurrent `write_at`.
pub struct StorageWriterBuilder {
    file: File,
    temp_path: PathBuf,
}

impl StorageWriterBuilder {
    /// Creates (truncating) the temp file at `temp_path`.
    pub fn create(temp_path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)
            .with_context(|| format!("create temp file: {}", temp_path.display()))?;
        Ok(Self {
            file,
            temp_path: temp_path.to_path_buf(),
        })
    }

    /// Preallocates `size` bytes. On Unix tries `posix_fallocate` for real
    /// block allocation; falls back to `set_len` elsewhere or on failure.
    pub fn preallocate(&mut self, size: u64) -> Result<()> {
        #[cfg(unix)]
        {
            let fd = self.file.as_raw_fd();
            let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
            if r == 0 {
                return Ok(());
            }
            tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
        }
        self.file.set_len(size).context("preallocate temp file")
    }

    pub fn build(self) -> StorageWriter {
        StorageWriter {
            file: Arc::new(self.file),
            temp_path: self.temp_path,
        }
    }
}

/// Writer over one temp file. Clones share the handle; each `write_at`
/// carries its own offset, so chunks writing disjoint ranges never
/// contend.
#[derive(Clone)]
pub struct StorageWriter {
    file: Arc<File>,
    temp_path: PathBuf,
}

impl StorageWriter {
    /// Opens the temp file for a resumed download, creating it (without
    /// truncation) if a previous run's file went missing.
    pub fn open_resume(temp_path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(temp_path)
            .with_context(|| format!("open temp file: {}", temp_path.display()))?;
        Ok(Self {
            file: Arc::new(file),
            temp_path: temp_path.to_path_buf(),
        })
    }

    /// Writes `data` at `offset` without touching any shared cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;
        self.file
            .write_all_at(data, offset)
            .context("temp file write_at failed")
    }

    /// Non-Unix fallback: seek + write on a cloned handle.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = self.file.try_clone().context("clone temp file handle")?;
        f.seek(SeekFrom::Start(offset)).context("seek temp file")?;
        f.write_all(data).context("write temp file")
    }

    /// Syncs file data to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().context("temp file sync failed")
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Atomically renames the temp file onto `final_path`, consuming the
    /// writer. Fails if `final_path` is on a different filesystem.
    pub fn finalize(self, final_path: &Path) -> Result<()> {
        let temp_path = self.temp_path.clone();
        drop(self.file);
        std::fs::rename(&temp_path, final_path).with_context(|| {
            format!("rename {} to {}", temp_path.display(), final_path.display())
        })
    }
}
