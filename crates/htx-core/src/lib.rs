//! htx: embeddable HTTP client with asynchronous completion delivery and
//! resumable multi-chunk parallel downloads.
//!
//! Submissions are fire-and-forget from any thread; one owned worker
//! thread drives the transfers; completion callbacks are delivered only
//! when the host calls [`HttpClient::pump`] from its own loop.
//!
//! ```no_run
//! use htx_core::HttpClient;
//!
//! let client = HttpClient::start_up_default().expect("engine start");
//! client.push_download("http://mirror.example/disc.iso", "/tmp/disc.iso", |ok, path| {
//!     println!("{} -> {}", path.display(), if ok { "done" } else { "failed" });
//! });
//! loop {
//!     client.pump();
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! ```

pub mod config;
pub mod logging;

pub mod dashboard;
pub mod download;
pub mod engine;
pub mod error;
pub mod mailbox;
pub mod options;
pub mod planner;
pub mod probe;
pub mod range;
pub mod range_log;
pub mod request;
pub mod storage;
mod worker;

pub use engine::{HttpClient, DEFAULT_BLOCK_SIZE_MB, DEFAULT_MAX_CONNECTS};
pub use error::TransferError;
pub use options::{HttpOption, HttpParams};
pub use range::ByteRange;
pub use range_log::log_path;
pub use storage::temp_path;
pub use worker::DOWNLOAD_CONNECTS;
