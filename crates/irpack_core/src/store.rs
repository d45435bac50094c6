//! Disk buffer directory management.
//!
//! This module handles the file system layout of the disk buffer:
//!
//! ```text
//! <disk_buffer_path>/
//! ├─ LOCK              # Advisory lock for single-process ownership
//! ├─ bin/<tag>         # Uncompressed IR awaiting compaction
//! └─ stack/<tag>       # Concatenated zstd frames awaiting upload
//! ```
//!
//! A tag's bin and stack share the same file name, the tag itself. The
//! `bin/` and `stack/` directories are only created when the first tag
//! is, so a fresh buffer directory has nothing to recover.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use irpack_storage::FileSink;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const BIN_DIR: &str = "bin";
const STACK_DIR: &str = "stack";

/// Owns the disk buffer directory.
///
/// Holds an exclusive lock on the directory for as long as it lives, so
/// two processes never recover or append to the same files.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a buffer directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path exists but is not a directory
    /// - Another process holds the lock (returns `StoreLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> CoreResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the buffer directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding bin files.
    #[must_use]
    pub fn bin_dir(&self) -> PathBuf {
        self.path.join(BIN_DIR)
    }

    /// Directory holding stack files.
    #[must_use]
    pub fn stack_dir(&self) -> PathBuf {
        self.path.join(STACK_DIR)
    }

    /// Path of the bin file for `tag`.
    #[must_use]
    pub fn bin_path(&self, tag: &str) -> PathBuf {
        self.bin_dir().join(tag)
    }

    /// Path of the stack file for `tag`.
    #[must_use]
    pub fn stack_path(&self, tag: &str) -> PathBuf {
        self.stack_dir().join(tag)
    }

    /// Opens (creating if needed) the bin and stack files for `tag`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTag` for tags that are not plain file names, or an
    /// error if either file cannot be opened.
    pub fn open_pair(&self, tag: &str) -> CoreResult<(FileSink, FileSink)> {
        validate_tag(tag)?;
        let bin = FileSink::open_with_create_dirs(&self.bin_path(tag))?;
        let stack = FileSink::open_with_create_dirs(&self.stack_path(tag))?;
        self.sync_directories()?;
        Ok((bin, stack))
    }

    /// Removes the bin and stack files for `tag`, ignoring missing ones.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be removed.
    pub fn remove_pair(&self, tag: &str) -> CoreResult<()> {
        for path in [self.bin_path(tag), self.stack_path(tag)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.sync_directories()
    }

    /// Syncs the bin and stack directories so file creation and removal
    /// survive a crash.
    #[cfg(unix)]
    fn sync_directories(&self) -> CoreResult<()> {
        for dir in [self.bin_dir(), self.stack_dir()] {
            if dir.exists() {
                File::open(&dir)?.sync_all()?;
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directories(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// Checks that `tag` can be used directly as a file name.
///
/// # Errors
///
/// Returns `InvalidTag` for empty tags, `.`/`..`, and tags containing path
/// separators or NUL.
pub fn validate_tag(tag: &str) -> CoreResult<()> {
    let bad = tag.is_empty()
        || tag == "."
        || tag == ".."
        || tag.contains(['/', '\\', '\0'])
        || tag == LOCK_FILE;
    if bad {
        return Err(CoreError::InvalidTag {
            tag: tag.to_string(),
        });
    }
    Ok(())
}
