//! CLI for the htx transfer engine. The command loop here plays the host
//! role: it pumps the foreground mailbox and reads the progress board
//! while the engine's worker drives the transfers.

use anyhow::Result;
use clap::{Parser, Subcommand};
use htx_core::config::{self, HtxConfig};
use htx_core::{HttpClient, HttpOption};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Top-level CLI for the htx transfer engine.
#[derive(Debug, Parser)]
#[command(name = "htx")]
#[command(about = "htx: parallel HTTP transfers with resumable downloads", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download a URL into a local file in parallel chunks, resuming any
    /// earlier interrupted attempt.
    Download {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Destination file path.
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
        /// Chunk size in MiB (default from config).
        #[arg(long, value_name = "MB")]
        block_size: Option<usize>,
        /// Start over instead of resuming a previous attempt.
        #[arg(long)]
        no_resume: bool,
        /// Total connection cap (default from config).
        #[arg(long, value_name = "N")]
        connections: Option<usize>,
    },

    /// Perform a GET request and print the response body.
    Get {
        /// URL to fetch.
        url: String,
    },

    /// Perform a POST request with the given body and print the response.
    Post {
        /// URL to post to.
        url: String,
        /// Request body, sent as-is.
        body: String,
    },

    /// Delete leftover temp/log files of an interrupted download.
    Clear {
        /// Destination path the download was submitted with.
        path: PathBuf,
    },
}

impl CliCommand {
    pub fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Download { url, output, block_size, no_resume, connections } => {
                run_download(&cfg, &url, output, block_size, no_resume, connections)
            }
            CliCommand::Get { url } => run_request(&cfg, &url, None),
            CliCommand::Post { url, body } => run_request(&cfg, &url, Some(body)),
            CliCommand::Clear { path } => {
                htx_core::storage::clear_files(&path)?;
                println!("cleared temp/log files for {}", path.display());
                Ok(())
            }
        }
    }
}

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

fn run_download(
    cfg: &HtxConfig,
    url: &str,
    output: PathBuf,
    block_size: Option<usize>,
    no_resume: bool,
    connections: Option<usize>,
) -> Result<()> {
    let client = HttpClient::start_up(connections.unwrap_or(cfg.max_connects))?;
    let mut options = HttpOption::for_url(url);
    options.agent = cfg.user_agent.clone();

    let (tx, rx) = mpsc::channel();
    client.push_download_with(
        url,
        &output,
        options,
        block_size.unwrap_or(cfg.block_size_mb),
        !no_resume,
        move |ok, path| {
            let _ = tx.send((ok, path));
        },
    );

    let mut last_print = Instant::now();
    let ok = loop {
        client.pump();
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok((ok, _)) => break ok,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                anyhow::bail!("engine dropped the download")
            }
        }
        if last_print.elapsed() >= PROGRESS_INTERVAL {
            let (speed, bytes) = client.download_speed_and_size(&output);
            print!(
                "\r  {:.1} MiB  {:.2} MiB/s   ",
                bytes as f64 / 1_048_576.0,
                speed / 1_048_576.0
            );
            let _ = std::io::stdout().flush();
            last_print = Instant::now();
        }
    };
    println!();

    if ok {
        println!("saved {}", output.display());
        Ok(())
    } else {
        anyhow::bail!("download failed: {} (temp/log kept for resume)", output.display())
    }
}

fn run_request(cfg: &HtxConfig, url: &str, post_body: Option<String>) -> Result<()> {
    let client = HttpClient::start_up(cfg.max_connects)?;
    let mut options = HttpOption::for_url(url);
    options.agent = cfg.user_agent.clone();

    let (tx, rx) = mpsc::channel();
    let callback = move |code, body| {
        let _ = tx.send((code, body));
    };
    match post_body {
        Some(body) => client.request_post_with(url, body, options, callback),
        None => client.request_get_with(url, options, callback),
    };

    let (code, body) = loop {
        client.pump();
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(response) => break response,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => anyhow::bail!("engine dropped the request"),
        }
    };

    if code == 0 {
        anyhow::bail!("request to {} failed (no response)", url);
    }
    eprintln!("HTTP {}", code);
    println!("{}", body);
    Ok(())
}
