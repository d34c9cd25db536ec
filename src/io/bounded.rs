//! Bounded Reader
//!
//! A byte source decorator that never yields more than a fixed number of
//! bytes, whatever the wrapped source has to offer. Every byte an upload
//! writes to disk passes through one of these views.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use tokio::io::AsyncRead;
use tokio_util::io::SyncIoBridge;

/// Buffer used by the default `skip` implementation
const SKIP_BUFFER_SIZE: usize = 2048;

// ============================================================================
// Byte Source
// ============================================================================

/// Minimal capability interface for a blocking byte input.
///
/// Sources that cannot skip cheaply, report availability, or rewind keep the
/// defaults: skipping reads and discards, nothing is reported available, and
/// mark/reset are unsupported.
pub trait ByteSource: Read {
    /// Skip up to `n` bytes, returning how many were actually skipped
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let mut buf = [0u8; SKIP_BUFFER_SIZE];
        let mut skipped = 0u64;

        while skipped < n {
            let want = (n - skipped).min(buf.len() as u64) as usize;
            match self.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(read) => skipped += read as u64,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(skipped)
    }

    /// Bytes that can be read without blocking
    fn available(&mut self) -> io::Result<u64> {
        Ok(0)
    }

    /// Release the source
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn mark_supported(&self) -> bool {
        false
    }

    /// Remember the current position. `read_limit` is a hint for how far the
    /// caller intends to read before calling [`ByteSource::reset`].
    fn mark(&mut self, _read_limit: usize) {}

    /// Return to the most recent mark
    fn reset(&mut self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "mark/reset not supported",
        ))
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        (**self).skip(n)
    }

    fn available(&mut self) -> io::Result<u64> {
        (**self).available()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }

    fn mark_supported(&self) -> bool {
        (**self).mark_supported()
    }

    fn mark(&mut self, read_limit: usize) {
        (**self).mark(read_limit)
    }

    fn reset(&mut self) -> io::Result<()> {
        (**self).reset()
    }
}

impl ByteSource for &[u8] {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let skipped = (n.min(self.len() as u64)) as usize;
        *self = &self[skipped..];
        Ok(skipped as u64)
    }

    fn available(&mut self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl ByteSource for File {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let position = self.stream_position()?;
        let len = self.metadata()?.len();
        let skipped = n.min(len.saturating_sub(position));
        self.seek(SeekFrom::Current(skipped as i64))?;
        Ok(skipped)
    }

    fn available(&mut self) -> io::Result<u64> {
        let position = self.stream_position()?;
        Ok(self.metadata()?.len().saturating_sub(position))
    }
}

/// Request bodies arrive through a sync bridge over the async stream
impl<T: AsyncRead + Unpin> ByteSource for SyncIoBridge<T> {}

// ============================================================================
// Memory Source
// ============================================================================

/// An owned in-memory source supporting mark/reset and explicit close
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
    mark: usize,
    closed: bool,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            mark: 0,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "source is closed"));
        }
        Ok(())
    }
}

impl Read for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let rest = &self.data[self.pos..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl ByteSource for MemorySource {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        self.ensure_open()?;
        let skipped = n.min((self.data.len() - self.pos) as u64);
        self.pos += skipped as usize;
        Ok(skipped)
    }

    fn available(&mut self) -> io::Result<u64> {
        self.ensure_open()?;
        Ok((self.data.len() - self.pos) as u64)
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }

    fn mark_supported(&self) -> bool {
        true
    }

    fn mark(&mut self, _read_limit: usize) {
        self.mark = self.pos;
    }

    fn reset(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        self.pos = self.mark;
        Ok(())
    }
}

// ============================================================================
// Overrun
// ============================================================================

/// What a bounded view does once its limit has been reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrunPolicy {
    /// Report end of stream
    #[default]
    Truncate,
    /// Fail the read with [`OverrunError`]
    Fail,
}

/// A read was attempted past the limit of a fail-policy bounded view
#[derive(Debug, thiserror::Error)]
#[error("more than {limit} bytes were requested from a bounded source")]
pub struct OverrunError {
    pub limit: u64,
}

impl OverrunError {
    /// Check whether an I/O error carries an overrun
    pub fn is_overrun(error: &io::Error) -> bool {
        error
            .get_ref()
            .is_some_and(|inner| inner.is::<OverrunError>())
    }
}

impl From<OverrunError> for io::Error {
    fn from(err: OverrunError) -> Self {
        io::Error::other(err)
    }
}

// ============================================================================
// Bounded Reader
// ============================================================================

/// A view over `S` limited to `limit` bytes.
///
/// Single-use: the consumed counter is only reset through mark/reset, never
/// by reusing the view for a new stream.
#[derive(Debug)]
pub struct BoundedReader<S> {
    inner: S,
    limit: Option<u64>,
    consumed: u64,
    mark: Option<u64>,
    policy: OverrunPolicy,
    propagate_close: bool,
}

impl<S: ByteSource> BoundedReader<S> {
    /// Bound `inner` to `limit` bytes, truncating at the limit
    pub fn new(inner: S, limit: u64) -> Self {
        Self::with_policy(inner, limit, OverrunPolicy::Truncate)
    }

    pub fn with_policy(inner: S, limit: u64, policy: OverrunPolicy) -> Self {
        Self {
            inner,
            limit: Some(limit),
            consumed: 0,
            mark: None,
            policy,
            propagate_close: true,
        }
    }

    /// Wrap `inner` without a limit
    pub fn unbounded(inner: S) -> Self {
        Self {
            inner,
            limit: None,
            consumed: 0,
            mark: None,
            policy: OverrunPolicy::Truncate,
            propagate_close: true,
        }
    }

    /// Whether [`ByteSource::close`] is forwarded to the wrapped source.
    ///
    /// Disable it to take several bounded views over one source.
    pub fn set_propagate_close(&mut self, propagate: bool) {
        self.propagate_close = propagate;
    }

    pub fn propagate_close(&self) -> bool {
        self.propagate_close
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Bytes yielded (or skipped) so far
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Bytes left before the limit; `None` when unbounded
    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.consumed))
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Read a single byte; `None` at end of stream or at the limit
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.at_limit() {
            return self.limit_reached().map(|_| None);
        }

        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.consumed += 1;
                    return Ok(Some(byte[0]));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn at_limit(&self) -> bool {
        self.limit.is_some_and(|limit| self.consumed >= limit)
    }

    /// Outcome of a read attempted at the limit: `Ok(0)` or an overrun
    fn limit_reached(&self) -> io::Result<usize> {
        match self.policy {
            OverrunPolicy::Truncate => Ok(0),
            OverrunPolicy::Fail => Err(OverrunError {
                limit: self.limit.unwrap_or_default(),
            }
            .into()),
        }
    }
}

impl<S: ByteSource> Read for BoundedReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.at_limit() {
            return self.limit_reached();
        }

        let len = match self.remaining() {
            Some(remaining) => (buf.len() as u64).min(remaining) as usize,
            None => buf.len(),
        };

        let read = self.inner.read(&mut buf[..len])?;
        self.consumed += read as u64;
        Ok(read)
    }
}

impl<S: ByteSource> ByteSource for BoundedReader<S> {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let to_skip = match self.remaining() {
            Some(remaining) => n.min(remaining),
            None => n,
        };

        let skipped = self.inner.skip(to_skip)?;
        self.consumed += skipped;
        Ok(skipped)
    }

    fn available(&mut self) -> io::Result<u64> {
        if self.at_limit() {
            return Ok(0);
        }
        self.inner.available()
    }

    fn close(&mut self) -> io::Result<()> {
        if self.propagate_close {
            self.inner.close()?;
        }
        Ok(())
    }

    fn mark_supported(&self) -> bool {
        self.inner.mark_supported()
    }

    fn mark(&mut self, read_limit: usize) {
        self.inner.mark(read_limit);
        self.mark = Some(self.consumed);
    }

    fn reset(&mut self) -> io::Result<()> {
        self.inner.reset()?;
        self.consumed = self.mark.unwrap_or(0);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
