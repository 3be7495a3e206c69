//! Character sources.
//!
//! The parser core consumes decoded characters through [`CharRead`] (or
//! [`AsyncCharRead`] on the suspendable surface). Byte-to-character
//! conversion belongs to the source: [`IoSource`] decodes UTF-8
//! incrementally, carrying partial code points between reads; invalid
//! UTF-8 is a fatal fault, not something the core recovers from.

use std::io::Read;

use anyhow::anyhow;
use async_trait::async_trait;
use rowflow_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Progress through a source, when it is knowable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    pub consumed: u64,
    pub total: u64,
}

impl SourcePosition {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.consumed as f64 / self.total as f64 * 100.0
        }
    }
}

/// A blocking character source. `read_chars` returns `0` at end of stream.
pub trait CharRead {
    fn read_chars(&mut self, buf: &mut [char]) -> Result<usize>;

    /// Consumed/total units, for progress percent. `None` when the source
    /// has no position to report.
    fn position(&self) -> Option<SourcePosition> {
        None
    }
}

/// A suspendable character source for the async reader surface.
#[async_trait]
pub trait AsyncCharRead: Send {
    async fn read_chars(&mut self, buf: &mut [char]) -> Result<usize>;

    fn position(&self) -> Option<SourcePosition> {
        None
    }
}

/// An in-memory source with a settable per-read character cap, which makes
/// chunk-boundary behavior easy to exercise.
#[derive(Debug, Clone)]
pub struct StrSource {
    chars: Vec<char>,
    pos: usize,
    max_per_read: usize,
}

impl StrSource {
    pub fn new(text: &str) -> Self {
        StrSource {
            chars: text.chars().collect(),
            pos: 0,
            max_per_read: usize::MAX,
        }
    }

    /// Cap every read at `chunk` characters.
    pub fn with_chunk_size(text: &str, chunk: usize) -> Self {
        StrSource {
            chars: text.chars().collect(),
            pos: 0,
            max_per_read: chunk.max(1),
        }
    }
}

impl CharRead for StrSource {
    fn read_chars(&mut self, buf: &mut [char]) -> Result<usize> {
        let remaining = self.chars.len() - self.pos;
        let n = remaining.min(buf.len()).min(self.max_per_read);
        buf[..n].copy_from_slice(&self.chars[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn position(&self) -> Option<SourcePosition> {
        Some(SourcePosition {
            consumed: self.pos as u64,
            total: self.chars.len() as u64,
        })
    }
}

#[async_trait]
impl AsyncCharRead for StrSource {
    async fn read_chars(&mut self, buf: &mut [char]) -> Result<usize> {
        CharRead::read_chars(self, buf)
    }

    fn position(&self) -> Option<SourcePosition> {
        CharRead::position(self)
    }
}

/// Incremental UTF-8 decoding shared by the sync and async byte sources.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn push_bytes(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Decode as many complete characters as fit in `buf`. Returns the
    /// number written. A partial code point stays pending for the next
    /// round of bytes.
    fn drain_into(&mut self, buf: &mut [char], at_eof: bool) -> Result<usize> {
        let (valid, incomplete) = match std::str::from_utf8(&self.pending) {
            Ok(s) => (s, false),
            Err(e) => {
                if e.error_len().is_some() {
                    return Err(Error::Other(anyhow!(
                        "invalid UTF-8 byte sequence in input"
                    )));
                }
                let valid = std::str::from_utf8(&self.pending[..e.valid_up_to()])
                    .map_err(|_| Error::Other(anyhow!("invalid UTF-8 byte sequence in input")))?;
                (valid, true)
            }
        };

        let mut written = 0usize;
        let mut consumed = 0usize;
        for c in valid.chars() {
            if written == buf.len() {
                break;
            }
            buf[written] = c;
            written += 1;
            consumed += c.len_utf8();
        }
        self.pending.drain(..consumed);

        if at_eof && written == 0 && incomplete && !self.pending.is_empty() {
            return Err(Error::Other(anyhow!(
                "input ended in the middle of a UTF-8 code point"
            )));
        }
        Ok(written)
    }
}

const BYTE_CHUNK: usize = 8 * 1024;

/// A source over any `std::io::Read`, decoding UTF-8 as it goes.
#[derive(Debug)]
pub struct IoSource<R> {
    inner: R,
    decoder: Utf8Decoder,
    consumed: u64,
    total: Option<u64>,
    eof: bool,
}

impl<R: Read> IoSource<R> {
    pub fn new(inner: R) -> Self {
        IoSource {
            inner,
            decoder: Utf8Decoder::default(),
            consumed: 0,
            total: None,
            eof: false,
        }
    }

    /// Declare the total byte length, enabling progress percent.
    pub fn with_total_bytes(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }
}

impl<R: Read> CharRead for IoSource<R> {
    fn read_chars(&mut self, buf: &mut [char]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.decoder.drain_into(buf, self.eof)?;
            if n > 0 {
                return Ok(n);
            }
            if self.eof {
                // A trailing partial code point already faulted above.
                return Ok(0);
            }
            let mut bytes = [0u8; BYTE_CHUNK];
            let read = self.inner.read(&mut bytes)?;
            if read == 0 {
                self.eof = true;
            } else {
                self.consumed += read as u64;
                self.decoder.push_bytes(&bytes[..read]);
            }
        }
    }

    fn position(&self) -> Option<SourcePosition> {
        self.total.map(|total| SourcePosition {
            consumed: self.consumed,
            total,
        })
    }
}

/// A source over any tokio `AsyncRead`, decoding UTF-8 as it goes.
#[derive(Debug)]
pub struct AsyncIoSource<R> {
    inner: R,
    decoder: Utf8Decoder,
    consumed: u64,
    total: Option<u64>,
    eof: bool,
}

impl<R: AsyncRead + Unpin + Send> AsyncIoSource<R> {
    pub fn new(inner: R) -> Self {
        AsyncIoSource {
            inner,
            decoder: Utf8Decoder::default(),
            consumed: 0,
            total: None,
            eof: false,
        }
    }

    pub fn with_total_bytes(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> AsyncCharRead for AsyncIoSource<R> {
    async fn read_chars(&mut self, buf: &mut [char]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.decoder.drain_into(buf, self.eof)?;
            if n > 0 {
                return Ok(n);
            }
            if self.eof {
                return Ok(0);
            }
            let mut bytes = [0u8; BYTE_CHUNK];
            let read = self.inner.read(&mut bytes).await?;
            if read == 0 {
                self.eof = true;
            } else {
                self.consumed += read as u64;
                self.decoder.push_bytes(&bytes[..read]);
            }
        }
    }

    fn position(&self) -> Option<SourcePosition> {
        self.total.map(|total| SourcePosition {
            consumed: self.consumed,
            total,
        })
    }
}
