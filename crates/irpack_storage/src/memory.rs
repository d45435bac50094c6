//! In-memory sink.

use crate::error::{StorageError, StorageResult};
use crate::sink::ByteSink;
use std::io::{self, Read, Write};

/// An in-memory sink.
///
/// Used for stacks when disk buffering is off, and in tests. Content is
/// lost with the process.
///
/// # Example
///
/// ```rust
/// use irpack_storage::{ByteSink, MemorySink};
/// use std::io::Write;
///
/// let mut sink = MemorySink::new();
/// sink.write_all(b"test data").unwrap();
/// assert_eq!(sink.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct MemorySink {
    data: Vec<u8>,
    position: usize,
}

impl MemorySink {
    /// Creates a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty sink with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            position: 0,
        }
    }

    /// Creates a sink holding pre-existing data.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }

    /// Returns all data held by the sink.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the sink and returns its data.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Read for MemorySink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.position.min(self.data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteSink for MemorySink {
    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn rewind(&mut self) -> StorageResult<()> {
        self.position = 0;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let size = self.data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncatePastEnd { new_size, size });
        }

        // new_size <= len, so it fits in usize
        self.data.truncate(new_size as usize);
        self.position = 0;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}
