//! Error types for sink operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for sink operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during sink operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An I/O error occurred on a specific file.
    #[error("I/O error on {}: {source}", path.display())]
    File {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },

    /// Attempted to grow a sink through truncation.
    #[error("cannot truncate to {new_size} bytes, sink holds only {size}")]
    TruncatePastEnd {
        /// The requested size.
        new_size: u64,
        /// The current sink size.
        size: u64,
    },
}

impl StorageError {
    /// Wraps an I/O error with the path it happened on.
    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}

impl From<StorageError> for io::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) => e,
            StorageError::File { source, .. } => source,
            other => io::Error::new(io::ErrorKind::InvalidInput, other.to_string()),
        }
    }
}
