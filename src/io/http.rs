use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use tracing::warn;

use super::ChannelInput;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRY: u32 = 10;

/// Read-only channel over an HTTP resource that honours `Range` requests.
///
/// Only the byte ranges the parser asks for are fetched, so listing a large
/// remote archive costs roughly the size of its central directory.
pub struct HttpRangeChannel {
    client: Client,
    url: String,
    size: u64,
    max_retry: u32,
    transferred: AtomicU64,
}

impl HttpRangeChannel {
    /// Probes `url` with a HEAD request for its length and range support.
    pub fn new(url: impl Into<String>) -> io::Result<Self> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> io::Result<Self> {
        let url = url.into();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(io::Error::other)?;

        let probe = client.head(&url).send().map_err(io::Error::other)?;
        if !probe.status().is_success() {
            return Err(io::Error::other(format!(
                "HEAD {url} answered {}",
                probe.status()
            )));
        }
        let ranges = header_str(&probe, ACCEPT_RANGES).unwrap_or_default();
        if !ranges.split(',').any(|unit| unit.trim() == "bytes") {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "remote server does not support Range requests",
            ));
        }
        let size = header_str(&probe, CONTENT_LENGTH)
            .and_then(|len| len.parse::<u64>().ok())
            .ok_or_else(|| io::Error::other("remote server did not return Content-Length"))?;

        Ok(Self {
            client,
            url,
            size,
            max_retry: DEFAULT_MAX_RETRY,
            transferred: AtomicU64::new(0),
        })
    }

    /// Give up after this many consecutive connection failures.
    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Payload bytes received so far, across all reads.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    /// One GET for the inclusive range `first..=last`, retrying transient
    /// connection failures with a linear backoff.
    fn fetch(&self, first: u64, last: u64) -> io::Result<Bytes> {
        let mut attempt = 0;
        loop {
            let sent = self
                .client
                .get(&self.url)
                .header(RANGE, format!("bytes={first}-{last}"))
                .send();
            let err = match sent {
                Ok(resp) if resp.status() == StatusCode::PARTIAL_CONTENT => {
                    return resp.bytes().map_err(io::Error::other);
                }
                Ok(resp) => {
                    return Err(io::Error::other(format!(
                        "range {first}-{last} answered {}",
                        resp.status()
                    )));
                }
                Err(e) if e.is_timeout() || e.is_connect() => e,
                Err(e) => return Err(io::Error::other(e)),
            };

            attempt += 1;
            if attempt >= self.max_retry {
                return Err(io::Error::new(io::ErrorKind::TimedOut, err));
            }
            warn!(
                url = %self.url,
                attempt,
                max = self.max_retry,
                error = %err,
                "range request failed, retrying"
            );
            std::thread::sleep(Duration::from_millis(500 * u64::from(attempt)));
        }
    }
}

fn header_str(resp: &Response, name: reqwest::header::HeaderName) -> Option<&str> {
    resp.headers().get(name).and_then(|v| v.to_str().ok())
}

impl ChannelInput for HttpRangeChannel {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }
        let wanted = buf.len().min((self.size - offset) as usize);
        let last = offset + wanted as u64 - 1;

        // Servers may answer with a shorter range than asked; keep asking for
        // the remainder.
        let mut filled = 0;
        while filled < wanted {
            let chunk = self.fetch(offset + filled as u64, last)?;
            if chunk.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server returned an empty range",
                ));
            }
            let take = chunk.len().min(wanted - filled);
            buf[filled..filled + take].copy_from_slice(&chunk[..take]);
            filled += take;
            self.transferred.fetch_add(take as u64, Ordering::Relaxed);
        }
        Ok(filled)
    }

    fn length(&self) -> u64 {
        self.size
    }
}
