//! IR stream writer.

use crate::error::{CodecError, CodecResult};
use crate::event::{validate_timezone, LogEvent, StreamMetadata};
use crate::{EVENT_TAG, EOS_TAG, FORMAT_VERSION, MAGIC, MAX_MESSAGE_LEN};
use bytes::{BufMut, BytesMut};
use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stateful encoder that turns [`LogEvent`]s into an IR stream.
///
/// Events are encoded into an internal buffer; the buffer leaves the writer
/// only through [`IrWriter::flush_to`] or [`IrWriter::close_to`]. A fresh
/// writer stages the stream preamble, so the first flush starts a new
/// stream. [`IrWriter::close_to`] consumes the writer: a closed stream
/// cannot be written to again.
///
/// ## Example
///
/// ```
/// use irpack_codec::{IrReader, IrWriter, LogEvent};
///
/// let mut writer = IrWriter::new("UTC", 1024).unwrap();
/// writer.write(&LogEvent::new(1_000, "started")).unwrap();
///
/// let mut stream = Vec::new();
/// writer.flush_to(&mut stream).unwrap();
/// writer.close_to(&mut stream).unwrap();
///
/// let decoded = IrReader::decode_all(&stream).unwrap();
/// assert_eq!(decoded.events[0].message, "started");
/// ```
#[derive(Debug)]
pub struct IrWriter {
    buffer: BytesMut,
    last_timestamp: i64,
}

impl IrWriter {
    /// Creates a writer for a new stream, using the current time as the
    /// reference timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidTimezone`] for an unusable timezone.
    pub fn new(timezone: &str, size_hint: usize) -> CodecResult<Self> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self::with_reference(timezone, size_hint, now)
    }

    /// Creates a writer for a new stream with an explicit reference timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the timezone is unusable or the metadata cannot be
    /// encoded.
    pub fn with_reference(
        timezone: &str,
        size_hint: usize,
        reference_timestamp: i64,
    ) -> CodecResult<Self> {
        validate_timezone(timezone)?;

        let metadata = StreamMetadata::new(timezone, reference_timestamp).to_cbor()?;
        let metadata_len = u32::try_from(metadata.len())
            .map_err(|_| CodecError::encoding_failed("stream metadata too large"))?;

        let mut buffer = BytesMut::with_capacity(size_hint.max(metadata.len() + 10));
        buffer.put_slice(&MAGIC);
        buffer.put_u16_le(FORMAT_VERSION);
        buffer.put_u32_le(metadata_len);
        buffer.put_slice(&metadata);

        Ok(Self {
            buffer,
            last_timestamp: reference_timestamp,
        })
    }

    /// Creates a writer that continues an existing stream.
    ///
    /// The preamble is not staged again; `last_timestamp` must be the
    /// timestamp of the last event already in the stream (or its reference
    /// timestamp if it has no events).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidTimezone`] for an unusable timezone.
    pub fn resume(timezone: &str, size_hint: usize, last_timestamp: i64) -> CodecResult<Self> {
        validate_timezone(timezone)?;
        Ok(Self {
            buffer: BytesMut::with_capacity(size_hint),
            last_timestamp,
        })
    }

    /// Encodes one event into the internal buffer.
    ///
    /// On error the buffer is left unchanged.
    ///
    /// # Errors
    ///
    /// - [`CodecError::TimestampOutOfRange`] for timestamps before the epoch
    /// - [`CodecError::MessageTooLarge`] if the message length does not fit
    pub fn write(&mut self, event: &LogEvent) -> CodecResult<()> {
        if event.timestamp < 0 {
            return Err(CodecError::TimestampOutOfRange {
                timestamp: event.timestamp,
            });
        }

        let message = event.message.as_bytes();
        let len = u32::try_from(message.len()).map_err(|_| CodecError::MessageTooLarge {
            len: message.len(),
            max: MAX_MESSAGE_LEN,
        })?;

        let delta = event
            .timestamp
            .checked_sub(self.last_timestamp)
            .ok_or(CodecError::TimestampOutOfRange {
                timestamp: event.timestamp,
            })?;

        self.buffer.reserve(1 + 8 + 4 + message.len());
        self.buffer.put_u8(EVENT_TAG);
        self.buffer.put_i64_le(delta);
        self.buffer.put_u32_le(len);
        self.buffer.put_slice(message);
        self.last_timestamp = event.timestamp;

        Ok(())
    }

    /// Encodes a batch of events, all or nothing.
    ///
    /// If any event fails, the events of this batch already encoded are
    /// dropped again and the writer is left as it was before the call.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`IrWriter::write`].
    pub fn write_batch(&mut self, events: &[LogEvent]) -> CodecResult<()> {
        let len = self.buffer.len();
        let last_timestamp = self.last_timestamp;
        for event in events {
            if let Err(e) = self.write(event) {
                self.buffer.truncate(len);
                self.last_timestamp = last_timestamp;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Number of encoded bytes waiting in the buffer.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Timestamp of the last encoded event.
    #[must_use]
    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    /// Moves all buffered bytes into `sink`.
    ///
    /// Returns the number of bytes written. The buffer is only cleared once
    /// the whole content was accepted by the sink.
    ///
    /// # Errors
    ///
    /// Returns any error from the sink.
    pub fn flush_to<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<u64> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        sink.write_all(&self.buffer)?;
        let written = self.buffer.len() as u64;
        self.buffer.clear();
        Ok(written)
    }

    /// Terminates the stream: flushes the buffer followed by the
    /// end-of-stream marker into `sink`.
    ///
    /// # Errors
    ///
    /// Returns any error from the sink.
    pub fn close_to<W: Write + ?Sized>(mut self, sink: &mut W) -> io::Result<u64> {
        self.buffer.put_u8(EOS_TAG);
        self.flush_to(sink)
    }
}
