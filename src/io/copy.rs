//! Stream Copier
//!
//! Drains a bounded source into a staging file opened for append.

use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::path::Path;

use super::bounded::{BoundedReader, ByteSource};

/// Default intermediate buffer: 2KB
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 2048;

/// Copies request bodies to disk through a fixed-size buffer.
///
/// The buffer bounds peak memory per request; throughput is secondary.
#[derive(Debug, Clone, Copy)]
pub struct StreamCopier {
    buffer_size: usize,
}

impl StreamCopier {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Append at most `max_size` bytes of `source` to `destination`.
    ///
    /// Creates the file if it is absent. Returns the bytes written by this
    /// call, not the resulting file length. On error the file keeps whatever
    /// was written before the failure.
    pub fn copy<S: ByteSource>(
        &self,
        destination: &Path,
        source: S,
        max_size: u64,
    ) -> io::Result<u64> {
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(destination)?;
        let mut bounded = BoundedReader::new(source, max_size);
        let mut buffer = vec![0u8; self.buffer_size];
        let mut written = 0u64;

        loop {
            let read = match bounded.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            out.write_all(&buffer[..read])?;
            written += read as u64;
        }

        out.flush()?;
        bounded.close()?;

        Ok(written)
    }
}

impl Default for StreamCopier {
    fn default() -> Self {
        Self::new(DEFAULT_COPY_BUFFER_SIZE)
    }
}

// ============================================================================
// Tests
// ============================================================================
