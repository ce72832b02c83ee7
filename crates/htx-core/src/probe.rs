//! Resource size probe: a HEAD-style transfer that reads the content
//! length before a fresh download is partitioned into chunks.

use anyhow::{Context, Result};
use curl::easy::{Easy2, Handler, WriteError};

use crate::options::HttpOption;

/// Collects response header lines, restarting on each new status line so
/// redirect hops do not pollute the final response's set.
#[derive(Default)]
struct HeaderSink {
    lines: Vec<String>,
}

impl Handler for HeaderSink {
    fn header(&mut self, data: &[u8]) -> bool {
        if let Ok(s) = std::str::from_utf8(data) {
            let line = s.trim_end();
            if line.starts_with("HTTP/") {
                self.lines.clear();
            }
            self.lines.push(line.to_string());
        }
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        // A HEAD-style transfer carries no body; swallow anything anyway.
        Ok(data.len())
    }
}

/// Issues the probe and returns the resource size in bytes.
///
/// Follows redirects. Fails on a non-2xx final status or a missing
/// `Content-Length`, in which case the download cannot be planned.
pub fn probe_size(url: &str, options: &HttpOption) -> Result<u64> {
    let mut easy = Easy2::new(HeaderSink::default());
    easy.url(url).context("invalid URL")?;
    easy.nobody(true).context("configure probe")?;
    options.apply(&mut easy).context("apply transfer options")?;
    easy.perform().context("size probe failed")?;

    let code = easy.response_code().context("no response code")?;
    if !(200..300).contains(&code) {
        anyhow::bail!("size probe for {} returned HTTP {}", url, code);
    }

    content_length(&easy.get_ref().lines)
        .ok_or_else(|| anyhow::anyhow!("server did not send Content-Length for {}", url))
}

fn content_length(lines: &[String]) -> Option<u64> {
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse().ok();
            }
        }
    }
    None
}
