//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The timezone cannot be stored in a stream preamble.
    #[error("invalid timezone: {timezone:?}")]
    InvalidTimezone {
        /// The rejected timezone.
        timezone: String,
    },

    /// Timestamps before the Unix epoch are not representable.
    #[error("timestamp {timestamp} is out of range")]
    TimestampOutOfRange {
        /// The rejected timestamp in epoch milliseconds.
        timestamp: i64,
    },

    /// A message is longer than the length field allows.
    #[error("message of {len} bytes exceeds the maximum of {max}")]
    MessageTooLarge {
        /// Length of the rejected message.
        len: usize,
        /// Largest encodable length.
        max: usize,
    },

    /// Failed to encode stream metadata.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode stream bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// The stream does not start with the IR magic bytes.
    #[error("not an IR stream: bad magic {found:02x?}")]
    BadMagic {
        /// The bytes found instead.
        found: [u8; 4],
    },

    /// The stream was written by an unknown format version.
    #[error("unsupported IR format version {version}")]
    UnsupportedVersion {
        /// Version found in the preamble.
        version: u16,
    },

    /// Unknown item tag inside the stream.
    #[error("unknown item tag 0x{tag:02x} at offset {offset}")]
    UnknownTag {
        /// The tag byte.
        tag: u8,
        /// Offset of the tag byte.
        offset: usize,
    },

    /// Invalid UTF-8 in a message.
    #[error("invalid UTF-8 message at offset {offset}")]
    InvalidUtf8 {
        /// Offset of the message.
        offset: usize,
    },

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}
