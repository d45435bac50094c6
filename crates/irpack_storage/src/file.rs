//! File-backed sink for disk buffering.

use crate::error::{StorageError, StorageResult};
use crate::sink::ByteSink;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A sink backed by a regular file.
///
/// Data survives process restarts, which is what makes disk-buffered bins
/// and stacks recoverable.
///
/// # Durability
///
/// - `flush()` pushes data to the OS
/// - `sync()` calls `File::sync_data()` so data is on disk
///
/// # Example
///
/// ```no_run
/// use irpack_storage::{ByteSink, FileSink};
/// use std::io::Write;
/// use std::path::Path;
///
/// let mut sink = FileSink::open(Path::new("stack/app.log")).unwrap();
/// sink.write_all(b"persistent data").unwrap();
/// sink.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
}

impl FileSink {
    /// Opens or creates a file sink at the given path.
    ///
    /// Existing content is kept; new writes are appended after it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StorageError::file(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Opens an existing file sink, failing if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StorageError::file(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Opens or creates a file sink, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::file(parent, e))?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole file, leaving the read cursor where it was.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub fn read_all(&mut self) -> StorageResult<Vec<u8>> {
        let position = self.file.stream_position()?;
        self.file.seek(SeekFrom::Start(0))?;

        let mut data = Vec::new();
        let result = self.file.read_to_end(&mut data);
        self.file.seek(SeekFrom::Start(position))?;
        result.map_err(|e| StorageError::file(&self.path, e))?;

        Ok(data)
    }
}

impl Read for FileSink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // Appends go to the end even if a reader moved the cursor.
        let position = self.file.stream_position()?;
        self.file.seek(SeekFrom::End(0))?;
        let written = self.file.write(buf);
        self.file.seek(SeekFrom::Start(position))?;
        written
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl ByteSink for FileSink {
    fn size(&self) -> StorageResult<u64> {
        let metadata = self
            .file
            .metadata()
            .map_err(|e| StorageError::file(&self.path, e))?;
        Ok(metadata.len())
    }

    fn rewind(&mut self) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let size = self.size()?;
        if new_size > size {
            return Err(StorageError::TruncatePastEnd { new_size, size });
        }

        self.file
            .set_len(new_size)
            .map_err(|e| StorageError::file(&self.path, e))?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        self.file
            .sync_data()
            .map_err(|e| StorageError::file(&self.path, e))?;
        Ok(())
    }
}
