//! Download planning: adopt the persisted range list or probe and
//! partition.

use anyhow::{Context, Result};
use std::path::Path;

use crate::options::HttpOption;
use crate::probe;
use crate::range::{split_ranges, ByteRange};
use crate::range_log;

/// A planned download: the ranges still to fetch and whether they came
/// from a previous run's log.
#[derive(Debug)]
pub struct DownloadPlan {
    pub ranges: Vec<ByteRange>,
    pub resumed: bool,
}

impl DownloadPlan {
    /// Total resource size implied by the plan. For a resumed plan this is
    /// the end of the last outstanding range, which is all the temp file
    /// needs to cover.
    pub fn total_len(&self) -> u64 {
        self.ranges.last().map(|r| r.end).unwrap_or(0)
    }
}

/// Plans the download for `dest`.
///
/// When resuming, a non-empty persisted range list wins and no network
/// traffic happens. Otherwise the resource is probed for its size and
/// `[0, size)` is cut into `block_bytes`-long ranges, the last one short.
/// A failed probe fails the whole job before any file is touched.
pub fn plan_download(
    url: &str,
    options: &HttpOption,
    block_bytes: u64,
    resume: bool,
    dest: &Path,
) -> Result<DownloadPlan> {
    if resume {
        let ranges = range_log::load(dest);
        if !ranges.is_empty() {
            tracing::debug!(
                dest = %dest.display(),
                chunks = ranges.len(),
                "resuming from persisted range list"
            );
            return Ok(DownloadPlan { ranges, resumed: true });
        }
    }

    let size = probe::probe_size(url, options).with_context(|| format!("cannot size {}", url))?;
    let ranges = split_ranges(size, block_bytes);
    tracing::debug!(dest = %dest.display(), size, chunks = ranges.len(), "planned fresh download");
    Ok(DownloadPlan { ranges, resumed: false })
}
