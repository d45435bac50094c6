//! Error types for irpack core.

use crate::flusher::FlushCode;
use crate::upload::UploadError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in irpack core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Sink error (bin or stack).
    #[error("storage error: {0}")]
    Storage(#[from] irpack_storage::StorageError),

    /// A record could not be encoded into IR.
    #[error("encoding error: {0}")]
    Codec(#[from] irpack_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The compressor failed to write, close or re-open a frame.
    #[error("compression error: {message}")]
    Compression {
        /// Description of the failure.
        message: String,
    },

    /// A reset was attempted while the bin still held uncompacted bytes.
    #[error("bin still holds {bytes} uncompacted bytes")]
    BinNotEmpty {
        /// Bytes left in the bin.
        bytes: u64,
    },

    /// The stream was already terminated and awaits upload.
    #[error("stream is finished; upload and reset before writing")]
    StreamFinished,

    /// The stream has not been terminated, so its stack cannot be read.
    #[error("stream is not finished")]
    StreamNotFinished,

    /// The configured single key is missing from a record.
    #[error("record has no key {key:?}")]
    MissingKey {
        /// The key that was looked for.
        key: String,
    },

    /// A record could not be parsed.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the problem.
        message: String,
    },

    /// A tag cannot be used as a file name.
    #[error("invalid tag {tag:?}")]
    InvalidTag {
        /// The rejected tag.
        tag: String,
    },

    /// Another process holds the buffer directory.
    #[error("buffer directory {} is locked by another process", path.display())]
    StoreLocked {
        /// The locked directory.
        path: PathBuf,
    },

    /// A recovery directory exists but cannot be listed.
    #[error(
        "cannot read buffer directory {}; removing it silences this error but destroys \
         unrecovered logs: {source}",
        path.display()
    )]
    RecoveryDirUnreadable {
        /// The unreadable directory.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },

    /// A recovered file does not hold a usable stream.
    #[error("cannot recover {}: {message}", path.display())]
    Unrecoverable {
        /// The offending file.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// The uploader rejected a stack.
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// Creates a compression error.
    pub fn compression(message: impl Into<String>) -> Self {
        Self::Compression {
            message: message.into(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Creates an unrecoverable file error.
    pub fn unrecoverable(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Unrecoverable {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if the tag's current stream can no longer be trusted
    /// and the tag must be torn down.
    #[must_use]
    pub fn is_fatal_to_tag(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Io(_) | Self::Compression { .. } | Self::BinNotEmpty { .. }
        )
    }

    /// Maps the error to the status reported back to the host.
    #[must_use]
    pub fn flush_code(&self) -> FlushCode {
        match self {
            Self::Codec(_)
            | Self::MissingKey { .. }
            | Self::InvalidRecord { .. }
            | Self::InvalidTag { .. }
            | Self::Config(_)
            | Self::Upload(UploadError::Fatal(_)) => FlushCode::Error,
            _ => FlushCode::Retry,
        }
    }
}

/// Errors produced while building a [`crate::Config`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// One or more options were rejected.
    #[error("{}", errors.join("; "))]
    Invalid {
        /// One message per rejected option.
        errors: Vec<String>,
    },

    /// A configuration file line could not be parsed.
    #[error("line {line}: {message}")]
    Syntax {
        /// 1-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_errors_are_not_retried() {
        let err = CoreError::MissingKey { key: "log".into() };
        assert_eq!(err.flush_code(), FlushCode::Error);
        assert!(!err.is_fatal_to_tag());
    }

    #[test]
    fn storage_errors_are_retried_and_fatal_to_tag() {
        let err = CoreError::from(io::Error::new(io::ErrorKind::Other, "disk gone"));
        assert_eq!(err.flush_code(), FlushCode::Retry);
        assert!(err.is_fatal_to_tag());
    }

    #[test]
    fn upload_errors_follow_their_class() {
        let retry = CoreError::from(UploadError::Retryable("timeout".into()));
        let fatal = CoreError::from(UploadError::Fatal("no such bucket".into()));
        assert_eq!(retry.flush_code(), FlushCode::Retry);
        assert_eq!(fatal.flush_code(), FlushCode::Error);
        assert!(!retry.is_fatal_to_tag());
    }

    #[test]
    fn config_errors_are_joined() {
        let err = ConfigError::Invalid {
            errors: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "a; b");
    }
}
