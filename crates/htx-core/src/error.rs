//! Per-transfer error type.

use std::io;

/// Error from a single finished transfer (curl failure, HTTP error, or
/// storage failure). Downloads classify chunks with this before folding
/// the per-chunk results into the job verdict.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// libcurl reported an error (connect failure, TLS, aborted transfer).
    #[error(transparent)]
    Curl(#[from] curl::Error),
    /// HTTP response had a non-2xx status.
    #[error("HTTP {0}")]
    Http(u32),
    /// Transfer completed but fewer bytes landed than the chunk length
    /// (e.g. server closed early, or the range reply was rejected).
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    /// Disk write failed (disk full, permission denied).
    #[error("storage: {0}")]
    Storage(#[from] io::Error),
}
