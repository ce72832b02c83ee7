//! Fire-and-forget GET/POST jobs and their in-memory response sink.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

use curl::easy::{Handler, WriteError};

use crate::options::HttpOption;

/// Callback invoked on the pumping thread with `(status, body)`.
pub type ResponseCallback = Box<dyn FnOnce(u32, String) + Send + 'static>;

/// Request method. A POST owns its body until the transfer completes.
pub enum Method {
    Get,
    Post(Vec<u8>),
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Hands out monotonically increasing ids, unique for the process
/// lifetime (across engine instances).
pub(crate) fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// One queued GET/POST request, created at submission and consumed when
/// its transfer is registered with the multiplex driver.
pub struct RequestJob {
    pub id: u64,
    pub url: String,
    pub method: Method,
    pub options: HttpOption,
    pub callback: Option<ResponseCallback>,
}

/// Write sink accumulating the response body in memory. The buffer is
/// materialized as a string exactly once, at completion.
pub struct RequestSink {
    pub(crate) id: u64,
    pub(crate) callback: Option<ResponseCallback>,
    buf: Vec<u8>,
}

impl RequestSink {
    pub(crate) fn new(id: u64, callback: Option<ResponseCallback>) -> Self {
        Self {
            id,
            callback,
            buf: Vec::new(),
        }
    }

    /// Takes the accumulated body out of the sink as a string.
    pub(crate) fn take_body(&mut self) -> String {
        String::from_utf8_lossy(&mem::take(&mut self.buf)).into_owned()
    }
}

impl Handler for RequestSink {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = next_request_id();
        let b = next_request_id();
        let c = next_request_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn sink_accumulates_and_drains_once() {
        let mut sink = RequestSink::new(1, None);
        assert_eq!(sink.write(b"hello ").unwrap(), 6);
        assert_eq!(sink.write(b"world").unwrap(), 5);
        assert_eq!(sink.take_body(), "hello world");
        assert_eq!(sink.take_body(), "");
    }

    #[test]
    fn sink_tolerates_non_utf8() {
        let mut sink = RequestSink::new(1, None);
        sink.write(&[0xff, 0xfe, b'o', b'k']).unwrap();
        let body = sink.take_body();
        assert!(body.ends_with("ok"));
    }
}
