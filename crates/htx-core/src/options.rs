//! Per-transfer options and the query-string builder.

use std::collections::BTreeMap;
use std::path::PathBuf;

use curl::easy::{Easy2, Handler, HttpVersion};

/// User agent sent when the caller does not override it.
pub const DEFAULT_AGENT: &str = concat!("htx/", env!("CARGO_PKG_VERSION"));

/// Options applied to a single transfer.
///
/// `for_url` derives the defaults the engine uses when the caller does not
/// pass options explicitly: `https` URLs get TLS with full peer/host
/// verification and a preference for HTTP/2 multiplexing; everything else
/// is plain HTTP/1.1. Redirects are always followed with auto-referer.
#[derive(Debug, Clone)]
pub struct HttpOption {
    /// Ask the transfer primitive for verbose wire logging.
    pub verbose: bool,
    /// User-agent header value.
    pub agent: String,
    /// Enable TLS for this transfer.
    pub ssl_enable: bool,
    /// Verify the peer certificate chain.
    pub verify_peer: bool,
    /// Verify the certificate matches the host name.
    pub verify_host: bool,
    /// Trust-anchor (CA bundle) file, if the system default is not wanted.
    pub ca_file: Option<PathBuf>,
    /// Prefer HTTP/2 so chunks of one host share a multiplexed connection.
    pub prefer_http2: bool,
}

impl Default for HttpOption {
    fn default() -> Self {
        Self {
            verbose: false,
            agent: DEFAULT_AGENT.to_string(),
            ssl_enable: false,
            verify_peer: true,
            verify_host: true,
            ca_file: None,
            prefer_http2: false,
        }
    }
}

impl HttpOption {
    /// Scheme-derived defaults for `url`.
    pub fn for_url(url: &str) -> Self {
        let https = url::Url::parse(url)
            .map(|u| u.scheme() == "https")
            .unwrap_or_else(|_| url.starts_with("https"));
        Self {
            ssl_enable: https,
            prefer_http2: https,
            ..Self::default()
        }
    }

    /// Applies these options onto a transfer handle.
    pub(crate) fn apply<H: Handler>(&self, easy: &mut Easy2<H>) -> Result<(), curl::Error> {
        easy.verbose(self.verbose)?;
        easy.useragent(&self.agent)?;
        easy.follow_location(true)?;
        easy.autoreferer(true)?;
        if self.ssl_enable {
            easy.ssl_verify_peer(self.verify_peer)?;
            easy.ssl_verify_host(self.verify_host)?;
            if let Some(ca) = &self.ca_file {
                easy.cainfo(ca)?;
            }
            if self.prefer_http2 {
                easy.http_version(HttpVersion::V2TLS)?;
                easy.pipewait(true)?;
            }
        }
        Ok(())
    }
}

/// Query-string builder over a key-ordered map.
///
/// `to_query` joins `key=value` pairs with `&` in key order (insertion
/// order is not preserved). No percent-encoding is performed at this
/// layer; callers encode values themselves.
#[derive(Debug, Clone, Default)]
pub struct HttpParams {
    params: BTreeMap<String, String>,
}

impl HttpParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces one parameter.
    pub fn add(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.params.insert(key.into(), val.into());
    }

    /// Renders the `key=value&key=value` query string.
    pub fn to_query(&self) -> String {
        let mut out = String::new();
        for (key, val) in &self.params {
            if !out.is_empty() {
                out.push('&');
            }
            out.push_str(key);
            out.push('=');
            out.push_str(val);
        }
        out
    }
}

impl From<BTreeMap<String, String>> for HttpParams {
    fn from(params: BTreeMap<String, String>) -> Self {
        Self { params }
    }
}
