//! Optional logging setup for hosts: appends to a file under the XDG
//! state dir when that is writable, otherwise logs to stderr.

use anyhow::Result;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,htx=debug"))
}

/// Where the log file lives: `$XDG_STATE_HOME/htx/htx.log`. Creates the
/// directory on the way.
pub fn log_file_path() -> Result<PathBuf> {
    let dirs = xdg::BaseDirectories::with_prefix("htx")?;
    let dir = dirs.get_state_home().join("htx");
    fs::create_dir_all(&dir)?;
    Ok(dir.join("htx.log"))
}

fn open_log_file() -> Result<(fs::File, PathBuf)> {
    let path = log_file_path()?;
    let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((file, path))
}

/// Initializes tracing for the process; call at most once. The library
/// itself never calls this — embedding hosts usually bring their own
/// subscriber, the CLI uses this one.
pub fn init() {
    match open_log_file() {
        Ok((file, path)) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(move || -> Box<dyn Write + Send> {
                    // Handle clones are per-event; losing one falls back
                    // to stderr rather than dropping the event.
                    match file.try_clone() {
                        Ok(clone) => Box::new(clone),
                        Err(_) => Box::new(io::stderr()),
                    }
                })
                .with_ansi(false)
                .init();
            tracing::info!("logging to {}", path.display());
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(io::stderr)
                .init();
            tracing::warn!("log file unavailable ({:#}), logging to stderr", e);
        }
    }
}
