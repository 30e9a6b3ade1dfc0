//! Splitters - carving byte streams into discrete records.
//!
//! A [`Splitter`] inspects a buffer and reports how many bytes the caller
//! may discard and, when a complete record was found, the payload with any
//! framing stripped. Splitters are stateless per call: all buffered bytes
//! belong to the owning [`SplitterRunner`], which also enforces the record
//! size limit and the `keep_truncated` policy.

mod framed;
mod regex;
mod token;

pub use framed::FramedSplitter;
pub use self::regex::RegexSplitter;
pub use token::TokenSplitter;

use crate::types::Result;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Outcome of one `find_record` call.
#[derive(Debug)]
pub struct Split<'a> {
    /// Bytes the caller may discard from the front of the buffer, whether
    /// or not a record was found (garbage skipped during resync counts).
    pub consumed: usize,

    /// Complete record payload, framing stripped. `None` with
    /// `consumed == 0` means more bytes are needed; `None` with
    /// `consumed > 0` means bytes were skipped or a record was dropped.
    pub payload: Option<&'a [u8]>,

    /// Authenticated origin, stamped by the framed splitter.
    pub signer: Option<String>,
}

impl<'a> Split<'a> {
    pub(crate) fn need_more(consumed: usize) -> Self {
        Self {
            consumed,
            payload: None,
            signer: None,
        }
    }

    pub(crate) fn skip(consumed: usize) -> Self {
        Self {
            consumed,
            payload: None,
            signer: None,
        }
    }

    pub(crate) fn record(consumed: usize, payload: &'a [u8]) -> Self {
        Self {
            consumed,
            payload: Some(payload),
            signer: None,
        }
    }
}

/// A record-splitting strategy. Implementations are pure: no internal
/// buffering, no side effects beyond counters.
pub trait Splitter: Send + Sync + std::fmt::Debug {
    fn find_record<'a>(&self, buf: &'a [u8]) -> Result<Split<'a>>;
}

/// Size limits and truncation policy for a splitter runner.
#[derive(Debug, Clone)]
pub struct SplitterConfig {
    /// A single record may not exceed this many bytes.
    pub max_record_size: usize,

    /// Deliver the leading `max_record_size` bytes of an overlong record
    /// instead of dropping it.
    pub keep_truncated: bool,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            max_record_size: crate::wire::MAX_MESSAGE_SIZE as usize,
            keep_truncated: false,
        }
    }
}

/// One record delivered by a splitter runner.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitterRecord {
    pub payload: Vec<u8>,
    pub signer: Option<String>,
    pub truncated: bool,
}

/// Owns the read buffer for one stream and drives a splitter over it.
#[derive(Debug)]
pub struct SplitterRunner {
    splitter: Box<dyn Splitter>,
    config: SplitterConfig,
    buf: BytesMut,
    discarding: bool,
}

impl SplitterRunner {
    pub fn new(splitter: Box<dyn Splitter>, config: SplitterConfig) -> Self {
        Self {
            splitter,
            config,
            buf: BytesMut::with_capacity(8 * 1024),
            discarding: false,
        }
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append incoming stream bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Read one chunk from an async source into the buffer. Returns the
    /// number of bytes read; 0 means EOF.
    pub async fn read_from<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> Result<usize> {
        Ok(reader.read_buf(&mut self.buf).await?)
    }

    /// Produce the next complete record, or `None` when more bytes are
    /// needed.
    pub fn next_record(&mut self) -> Result<Option<SplitterRecord>> {
        loop {
            if self.buf.is_empty() {
                return Ok(None);
            }

            let (consumed, payload, signer) = {
                let split = self.splitter.find_record(&self.buf)?;
                (
                    split.consumed,
                    split.payload.map(<[u8]>::to_vec),
                    split.signer,
                )
            };
            if consumed > 0 {
                self.buf.advance(consumed);
            }

            match payload {
                Some(payload) => {
                    if self.discarding {
                        // Tail of a record that already overflowed.
                        self.discarding = false;
                        continue;
                    }
                    if payload.len() > self.config.max_record_size {
                        if self.config.keep_truncated {
                            return Ok(Some(SplitterRecord {
                                payload: payload[..self.config.max_record_size].to_vec(),
                                signer,
                                truncated: true,
                            }));
                        }
                        tracing::debug!(
                            len = payload.len(),
                            max = self.config.max_record_size,
                            "dropping overlong record"
                        );
                        continue;
                    }
                    return Ok(Some(SplitterRecord {
                        payload,
                        signer,
                        truncated: false,
                    }));
                }
                None if consumed > 0 => continue, // skipped garbage, retry
                None => {
                    if self.buf.len() >= self.buffer_limit() {
                        return Ok(self.overflow());
                    }
                    return Ok(None);
                }
            }
        }
    }

    // Room for one record plus frame overhead before the buffer is
    // considered boundary-free.
    fn buffer_limit(&self) -> usize {
        self.config.max_record_size + crate::wire::MAX_HEADER_SIZE + 3
    }

    /// No record boundary inside a full buffer: deliver or drop the head
    /// and discard until the next boundary.
    fn overflow(&mut self) -> Option<SplitterRecord> {
        if self.config.keep_truncated && !self.discarding {
            let head = self.buf[..self.config.max_record_size].to_vec();
            self.buf.advance(self.config.max_record_size);
            self.discarding = true;
            return Some(SplitterRecord {
                payload: head,
                signer: None,
                truncated: true,
            });
        }
        tracing::debug!(
            buffered = self.buf.len(),
            "no record boundary within limit; discarding buffer"
        );
        self.buf.clear();
        self.discarding = true;
        None
    }
}
