//! Lazily opened, range-seekable HTTP byte stream over a resolved link.
//!
//! One stream per open file handle. The stream is positioned with a
//! `Range` header at open time; small forward gaps are bridged by
//! reading and discarding instead of reconnecting, backward movement
//! always means a fresh connection.

use bytes::Bytes;
use futures::stream::StreamExt;
use reqwest::{Client, StatusCode};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{DavError, DavResult};

/// Largest forward gap bridged by reading and discarding. Anything
/// larger reconnects with a new range request.
pub const MAX_FORWARD_SKIP: u64 = 8 * 1024 * 1024;

/// Yield to the runtime after discarding this many bytes in one skip.
const SKIP_YIELD_INTERVAL: u64 = 1024 * 1024;

/// How long one chunk may take to arrive before the stream is written off.
const CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

type ByteStream = Pin<Box<dyn futures::Stream<Item = reqwest::Result<Bytes>> + Send + Sync>>;

/// An open HTTP response body positioned at a known file offset.
pub struct HttpByteStream {
    stream: ByteStream,
    /// Absolute file offset the next read will return bytes from
    position: u64,
    is_valid: bool,
    /// Unconsumed tail of the last chunk
    pending: Option<Bytes>,
}

impl std::fmt::Debug for HttpByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpByteStream")
            .field("position", &self.position)
            .field("is_valid", &self.is_valid)
            .finish_non_exhaustive()
    }
}

impl HttpByteStream {
    /// Open the URL with a range request starting at `offset`. A server
    /// that ignores the range and answers with the full body is accepted;
    /// the gap up to `offset` is discarded.
    pub async fn open(client: &Client, url: &str, offset: u64) -> DavResult<Self> {
        trace!(offset, "Opening content stream");
        let response = client
            .get(url)
            .header("Range", format!("bytes={}-", offset))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::PARTIAL_CONTENT {
            return Err(match status.as_u16() {
                403 | 404 | 410 => DavError::LinkUnreachable(format!(
                    "content server answered {} for resolved link",
                    status
                )),
                code => DavError::ApiError {
                    status: code,
                    message: "content server rejected range request".to_string(),
                },
            });
        }

        let full_response = status == StatusCode::OK && offset > 0;
        let mut stream = Self {
            stream: Box::pin(response.bytes_stream()),
            position: if full_response { 0 } else { offset },
            is_valid: true,
            pending: None,
        };
        if full_response {
            debug!(offset, "Server ignored range header, discarding prefix");
            stream.skip(offset).await?;
        }
        Ok(stream)
    }

    /// Absolute file offset of the next byte this stream will yield.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether a read at `offset` can be served without reconnecting.
    pub fn can_serve(&self, offset: u64) -> bool {
        self.is_valid
            && offset >= self.position
            && offset - self.position <= MAX_FORWARD_SKIP
    }

    /// Read into `buf` from the current position. Returns 0 only at end
    /// of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> DavResult<usize> {
        if !self.is_valid {
            return Err(DavError::NetworkError("stream is no longer valid".to_string()));
        }

        let mut filled = 0;
        if let Some(pending) = self.pending.take() {
            let take = pending.len().min(buf.len());
            buf[..take].copy_from_slice(&pending[..take]);
            filled += take;
            self.position += take as u64;
            if take < pending.len() {
                self.pending = Some(pending.slice(take..));
                return Ok(filled);
            }
        }

        while filled < buf.len() {
            match self.next_chunk().await? {
                Some(chunk) => {
                    let take = chunk.len().min(buf.len() - filled);
                    buf[filled..filled + take].copy_from_slice(&chunk[..take]);
                    filled += take;
                    self.position += take as u64;
                    if take < chunk.len() {
                        self.pending = Some(chunk.slice(take..));
                        break;
                    }
                }
                None => break,
            }
        }
        Ok(filled)
    }

    /// Discard bytes until the stream is positioned `bytes` further on.
    /// Returns how many were actually discarded; fewer means the body
    /// ended early.
    pub async fn skip(&mut self, bytes: u64) -> DavResult<u64> {
        if !self.is_valid {
            return Err(DavError::NetworkError("stream is no longer valid".to_string()));
        }

        let mut skipped = 0u64;
        if let Some(pending) = self.pending.take() {
            let take = pending.len().min(bytes as usize);
            skipped += take as u64;
            self.position += take as u64;
            if take < pending.len() {
                self.pending = Some(pending.slice(take..));
                return Ok(skipped);
            }
        }

        let mut since_yield = 0u64;
        while skipped < bytes {
            match self.next_chunk().await? {
                Some(chunk) => {
                    let take = chunk.len().min((bytes - skipped) as usize);
                    skipped += take as u64;
                    self.position += take as u64;
                    since_yield += take as u64;
                    if take < chunk.len() {
                        self.pending = Some(chunk.slice(take..));
                        break;
                    }
                    if since_yield >= SKIP_YIELD_INTERVAL {
                        tokio::task::yield_now().await;
                        since_yield = 0;
                    }
                }
                None => break,
            }
        }
        Ok(skipped)
    }

    /// Pull the next chunk, bounding how long it may take to arrive. A
    /// timeout or transport error invalidates the stream.
    async fn next_chunk(&mut self) -> DavResult<Option<Bytes>> {
        match tokio::time::timeout(CHUNK_TIMEOUT, self.stream.next()).await {
            Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
            Ok(Some(Err(e))) => {
                self.is_valid = false;
                Err(DavError::NetworkError(format!("content stream failed: {}", e)))
            }
            Ok(None) => Ok(None),
            Err(_) => {
                self.is_valid = false;
                Err(DavError::TimedOut("content chunk did not arrive".to_string()))
            }
        }
    }
}
