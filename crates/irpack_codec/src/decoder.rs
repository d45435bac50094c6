//! IR stream reader.

use crate::error::{CodecError, CodecResult};
use crate::event::{LogEvent, StreamMetadata};
use crate::{EVENT_TAG, EOS_TAG, FORMAT_VERSION, MAGIC};

/// Size of the fixed part of an event: tag (1) + delta (8) + length (4).
const EVENT_HEADER_SIZE: usize = 13;

/// Maximum metadata size accepted from a preamble.
const MAX_METADATA_LEN: usize = 64 * 1024;

/// A fully decoded IR stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedStream {
    /// Preamble metadata, absent for headless decoding.
    pub metadata: Option<StreamMetadata>,
    /// Events in stream order.
    pub events: Vec<LogEvent>,
    /// Whether the end-of-stream marker was reached.
    pub terminated: bool,
}

/// Streaming reader over IR bytes.
///
/// A stream that simply runs out of bytes is not an error: it is reported
/// as unterminated. A stream that stops in the middle of an item is.
pub struct IrReader<'a> {
    data: &'a [u8],
    pos: usize,
    last_timestamp: i64,
    metadata: Option<StreamMetadata>,
    terminated: bool,
}

impl<'a> IrReader<'a> {
    /// Creates a reader and parses the stream preamble.
    ///
    /// # Errors
    ///
    /// Returns an error if the preamble is truncated, has bad magic, an
    /// unsupported version or undecodable metadata.
    pub fn new(data: &'a [u8]) -> CodecResult<Self> {
        let mut reader = Self::headless(data, 0);

        let magic = reader.read_array::<4>()?;
        if magic != MAGIC {
            return Err(CodecError::BadMagic { found: magic });
        }

        let version = u16::from_le_bytes(reader.read_array::<2>()?);
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion { version });
        }

        let len = u32::from_le_bytes(reader.read_array::<4>()?) as usize;
        if len > MAX_METADATA_LEN {
            return Err(CodecError::decoding_failed(format!(
                "metadata length {len} exceeds maximum {MAX_METADATA_LEN}"
            )));
        }
        let metadata = StreamMetadata::from_cbor(reader.read_slice(len)?)?;

        reader.last_timestamp = metadata.reference_timestamp;
        reader.metadata = Some(metadata);
        Ok(reader)
    }

    /// Creates a reader for stream bytes that follow an already-consumed
    /// preamble (or previous events).
    #[must_use]
    pub fn headless(data: &'a [u8], last_timestamp: i64) -> Self {
        Self {
            data,
            pos: 0,
            last_timestamp,
            metadata: None,
            terminated: false,
        }
    }

    /// Decodes a complete stream, preamble included.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is malformed or cut inside an item.
    pub fn decode_all(data: &'a [u8]) -> CodecResult<DecodedStream> {
        let mut reader = Self::new(data)?;
        let mut events = Vec::new();
        while let Some(event) = reader.next_event()? {
            events.push(event);
        }

        Ok(DecodedStream {
            metadata: reader.metadata.take(),
            events,
            terminated: reader.terminated,
        })
    }

    /// Returns the preamble metadata, if one was parsed.
    #[must_use]
    pub fn metadata(&self) -> Option<&StreamMetadata> {
        self.metadata.as_ref()
    }

    /// Returns `true` once the end-of-stream marker has been read.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Offset of the next unread byte.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Timestamp of the last decoded event.
    #[must_use]
    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    /// Decodes the next event.
    ///
    /// Returns `Ok(None)` at the end-of-stream marker or when the input is
    /// exhausted on an item boundary.
    ///
    /// # Errors
    ///
    /// Returns an error on an unknown tag, invalid UTF-8, or input that ends
    /// inside an event.
    pub fn next_event(&mut self) -> CodecResult<Option<LogEvent>> {
        if self.terminated || self.pos == self.data.len() {
            return Ok(None);
        }

        let offset = self.pos;
        match self.data[offset] {
            EOS_TAG => {
                self.pos += 1;
                self.terminated = true;
                Ok(None)
            }
            EVENT_TAG => {
                if self.data.len() - offset < EVENT_HEADER_SIZE {
                    return Err(CodecError::UnexpectedEof);
                }
                self.pos += 1;
                let delta = i64::from_le_bytes(self.read_array::<8>()?);
                let len = u32::from_le_bytes(self.read_array::<4>()?) as usize;
                let bytes = self.read_slice(len)?;
                let message = std::str::from_utf8(bytes)
                    .map_err(|_| CodecError::InvalidUtf8 { offset })?
                    .to_string();

                let timestamp = self
                    .last_timestamp
                    .checked_add(delta)
                    .ok_or_else(|| CodecError::decoding_failed("timestamp overflow"))?;
                self.last_timestamp = timestamp;

                Ok(Some(LogEvent { timestamp, message }))
            }
            tag => Err(CodecError::UnknownTag { tag, offset }),
        }
    }

    fn read_slice(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        if end > self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N)?);
        Ok(out)
    }
}

/// Returns the length of the longest prefix of `data` made only of whole
/// items.
///
/// With `with_preamble`, a prefix that does not even hold a complete
/// preamble has length 0. Decoding stops at the first item that is cut or
/// malformed; everything before it is kept.
#[must_use]
pub fn valid_prefix_len(data: &[u8], with_preamble: bool) -> usize {
    let mut reader = if with_preamble {
        match IrReader::new(data) {
            Ok(reader) => reader,
            Err(_) => return 0,
        }
    } else {
        IrReader::headless(data, 0)
    };

    let mut good = reader.position();
    loop {
        match reader.next_event() {
            Ok(Some(_)) => good = reader.position(),
            Ok(None) => return reader.position(),
            Err(_) => return good,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IrWriter;

    fn stream(events: &[LogEvent], close: bool) -> Vec<u8> {
        let mut writer = IrWriter::with_reference("UTC", 256, 1_000).unwrap();
        for event in events {
            writer.write(event).unwrap();
        }
        let mut out = Vec::new();
        if close {
            writer.close_to(&mut out).unwrap();
        } else {
            writer.flush_to(&mut out).unwrap();
        }
        out
    }

    fn sample() -> Vec<LogEvent> {
        vec![
            LogEvent::new(1_000, "first"),
            LogEvent::new(900, "clock went back"),
            LogEvent::new(5_000, ""),
        ]
    }

    #[test]
    fn decode_terminated_stream() {
        let decoded = IrReader::decode_all(&stream(&sample(), true)).unwrap();
        assert!(decoded.terminated);
        assert_eq!(decoded.events, sample());
        let metadata = decoded.metadata.unwrap();
        assert_eq!(metadata.timezone, "UTC");
        assert_eq!(metadata.reference_timestamp, 1_000);
    }

    #[test]
    fn decode_unterminated_stream() {
        let decoded = IrReader::decode_all(&stream(&sample(), false)).unwrap();
        assert!(!decoded.terminated);
        assert_eq!(decoded.events.len(), 3);
    }

    #[test]
    fn bytes_after_terminator_are_ignored() {
        let mut data = stream(&sample(), true);
        data.push(0xAB);
        let decoded = IrReader::decode_all(&data).unwrap();
        assert_eq!(decoded.events.len(), 3);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut data = stream(&sample(), true);
        data[0] = b'X';
        assert!(matches!(
            IrReader::decode_all(&data),
            Err(CodecError::BadMagic { .. })
        ));
    }

    #[test]
    fn truncated_event_is_an_error() {
        let data = stream(&sample(), false);
        let cut = &data[..data.len() - 2];
        assert_eq!(
            IrReader::decode_all(cut).unwrap_err(),
            CodecError::UnexpectedEof
        );
    }

    #[test]
    fn unknown_tag_reports_offset() {
        let mut reader = IrReader::headless(&[0x07], 0);
        assert_eq!(
            reader.next_event().unwrap_err(),
            CodecError::UnknownTag { tag: 7, offset: 0 }
        );
    }

    #[test]
    fn headless_reader_continues_deltas() {
        let full = stream(&sample(), true);
        let reader = IrReader::new(&full).unwrap();
        let body = &full[reader.position()..];
        let mut headless = IrReader::headless(body, 1_000);
        let mut events = Vec::new();
        while let Some(event) = headless.next_event().unwrap() {
            events.push(event);
        }
        assert_eq!(events, sample());
        assert!(headless.is_terminated());
    }

    #[test]
    fn valid_prefix_drops_torn_tail() {
        let data = stream(&sample(), false);
        assert_eq!(valid_prefix_len(&data, true), data.len());

        let torn = &data[..data.len() - 3];
        let keep = valid_prefix_len(torn, true);
        assert!(keep < torn.len());
        let decoded = IrReader::decode_all(&torn[..keep]).unwrap();
        assert_eq!(decoded.events, sample()[..2].to_vec());
    }

    #[test]
    fn valid_prefix_without_preamble() {
        let mut writer = IrWriter::resume("UTC", 64, 0).unwrap();
        writer.write(&LogEvent::new(1, "a")).unwrap();
        writer.write(&LogEvent::new(2, "b")).unwrap();
        let mut data = Vec::new();
        writer.flush_to(&mut data).unwrap();

        assert_eq!(valid_prefix_len(&data, false), data.len());
        assert_eq!(valid_prefix_len(&data[..data.len() - 1], false), 14);
        assert_eq!(valid_prefix_len(&[], false), 0);
    }
}
