//! Sink trait and the closed set of sink kinds.

use crate::error::StorageResult;
use crate::file::FileSink;
use crate::memory::MemorySink;
use std::io::{self, Read, Write};
use std::path::Path;

/// An append-only byte store that can be read back from the start.
///
/// # Invariants
///
/// - `write` always appends at the end, regardless of the read cursor
/// - `rewind` moves the read cursor to offset 0
/// - `truncate` never grows the sink
/// - `sync` makes every byte written so far durable (no-op in memory)
pub trait ByteSink: Read + Write + Send {
    /// Returns the number of bytes currently held.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Moves the read cursor back to the first byte.
    ///
    /// # Errors
    ///
    /// Returns an error if seeking fails.
    fn rewind(&mut self) -> StorageResult<()>;

    /// Shrinks the sink to `new_size` bytes and rewinds the read cursor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncatePastEnd`] if `new_size` is
    /// larger than the current size, or an I/O error.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Makes all written data durable.
    ///
    /// # Errors
    ///
    /// Returns an error if syncing fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Empties the sink.
    ///
    /// # Errors
    ///
    /// Same as [`ByteSink::truncate`].
    fn clear(&mut self) -> StorageResult<()> {
        self.truncate(0)
    }

    /// Returns `true` if the sink holds no bytes.
    ///
    /// # Errors
    ///
    /// Same as [`ByteSink::size`].
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.size()? == 0)
    }
}

/// A sink whose kind is chosen once, at construction.
///
/// Stacks may live in memory or on disk; bins only ever live on disk and
/// are held as [`FileSink`] directly.
#[derive(Debug)]
pub enum Sink {
    /// In-memory buffer.
    Memory(MemorySink),
    /// File on disk.
    File(FileSink),
}

impl Sink {
    /// Returns the backing file path, if this sink is file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Memory(_) => None,
            Self::File(file) => Some(file.path()),
        }
    }

    /// Returns `true` if this sink lives on disk.
    #[must_use]
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }

    /// Reads the whole content without disturbing the read cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub fn read_all(&mut self) -> StorageResult<Vec<u8>> {
        match self {
            Self::Memory(mem) => Ok(mem.data().to_vec()),
            Self::File(file) => file.read_all(),
        }
    }
}

impl From<MemorySink> for Sink {
    fn from(sink: MemorySink) -> Self {
        Self::Memory(sink)
    }
}

impl From<FileSink> for Sink {
    fn from(sink: FileSink) -> Self {
        Self::File(sink)
    }
}

impl Read for Sink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Memory(mem) => mem.read(buf),
            Self::File(file) => file.read(buf),
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Memory(mem) => mem.write(buf),
            Self::File(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Memory(mem) => mem.flush(),
            Self::File(file) => file.flush(),
        }
    }
}

impl ByteSink for Sink {
    fn size(&self) -> StorageResult<u64> {
        match self {
            Self::Memory(mem) => mem.size(),
            Self::File(file) => file.size(),
        }
    }

    fn rewind(&mut self) -> StorageResult<()> {
        match self {
            Self::Memory(mem) => mem.rewind(),
            Self::File(file) => file.rewind(),
        }
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        match self {
            Self::Memory(mem) => mem.truncate(new_size),
            Self::File(file) => file.truncate(new_size),
        }
    }

    fn sync(&mut self) -> StorageResult<()> {
        match self {
            Self::Memory(mem) => mem.sync(),
            Self::File(file) => file.sync(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn memory_variant_has_no_path() {
        let sink = Sink::from(MemorySink::new());
        assert!(sink.path().is_none());
        assert!(!sink.is_file());
    }

    #[test]
    fn file_variant_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stack");
        let sink = Sink::from(FileSink::open(&path).unwrap());
        assert_eq!(sink.path(), Some(path.as_path()));
        assert!(sink.is_file());
    }

    #[test]
    fn both_variants_behave_alike() {
        let dir = tempdir().unwrap();
        let sinks = vec![
            Sink::from(MemorySink::new()),
            Sink::from(FileSink::open(&dir.path().join("s")).unwrap()),
        ];

        for mut sink in sinks {
            sink.write_all(b"abc").unwrap();
            sink.write_all(b"def").unwrap();
            assert_eq!(sink.size().unwrap(), 6);

            sink.rewind().unwrap();
            let mut out = Vec::new();
            sink.read_to_end(&mut out).unwrap();
            assert_eq!(out, b"abcdef");

            sink.truncate(2).unwrap();
            assert_eq!(sink.read_all().unwrap(), b"ab");

            sink.clear().unwrap();
            assert!(sink.is_empty().unwrap());
        }
    }

    fn chunks() -> impl Strategy<Value = Vec<Vec<u8>>> {
        prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn appends_survive_truncate_and_append(
            written in chunks(),
            extra in chunks(),
            cut in any::<prop::sample::Index>(),
        ) {
            let dir = tempdir().unwrap();
            let sinks = vec![
                Sink::from(MemorySink::new()),
                Sink::from(FileSink::open(&dir.path().join("s")).unwrap()),
            ];

            let whole = written.concat();
            let keep = cut.index(whole.len() + 1);
            let mut expected = whole[..keep].to_vec();
            expected.extend(extra.concat());

            for mut sink in sinks {
                for chunk in &written {
                    sink.write_all(chunk).unwrap();
                }
                prop_assert_eq!(sink.read_all().unwrap(), whole.clone());

                sink.truncate(keep as u64).unwrap();
                for chunk in &extra {
                    sink.write_all(chunk).unwrap();
                }
                prop_assert_eq!(sink.size().unwrap(), expected.len() as u64);

                sink.rewind().unwrap();
                let mut out = Vec::new();
                sink.read_to_end(&mut out).unwrap();
                prop_assert_eq!(&out, &expected);
            }
        }
    }
}
