//! Log events and stream metadata.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};

/// A single decoded log event: when it happened and what it said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Event time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// The log message.
    pub message: String,
}

impl LogEvent {
    /// Creates a new event.
    pub fn new(timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }
}

/// Metadata carried in the preamble of every IR stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    /// Version of the crate that wrote the stream.
    pub version: String,
    /// Time zone of the log source (IANA name).
    pub timezone: String,
    /// Base for the first timestamp delta, in epoch milliseconds.
    pub reference_timestamp: i64,
}

impl StreamMetadata {
    pub(crate) fn new(timezone: &str, reference_timestamp: i64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timezone: timezone.to_string(),
            reference_timestamp,
        }
    }

    pub(crate) fn to_cbor(&self) -> CodecResult<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        Ok(out)
    }

    pub(crate) fn from_cbor(bytes: &[u8]) -> CodecResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}

/// Checks that a timezone name can be stored in a preamble.
///
/// Names are not resolved against a tz database; anything non-empty without
/// whitespace or control characters is accepted.
pub fn validate_timezone(timezone: &str) -> CodecResult<()> {
    if timezone.is_empty()
        || timezone
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(CodecError::InvalidTimezone {
            timezone: timezone.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_cbor_preserves_fields() {
        let meta = StreamMetadata::new("America/Toronto", 1_700_000_000_000);
        let bytes = meta.to_cbor().unwrap();
        assert_eq!(StreamMetadata::from_cbor(&bytes).unwrap(), meta);
    }

    #[test]
    fn metadata_rejects_garbage() {
        assert!(StreamMetadata::from_cbor(&[0xff, 0x00]).is_err());
    }

    #[test]
    fn timezone_validation() {
        assert!(validate_timezone("UTC").is_ok());
        assert!(validate_timezone("America/Toronto").is_ok());
        assert!(validate_timezone("").is_err());
        assert!(validate_timezone("Europe/ Paris").is_err());
        assert!(validate_timezone("UTC\n").is_err());
    }
}
