//! Per-tag stream buffer: IR encoder, optional bin, compressed stack.
//!
//! ## Disk mode
//!
//! ```text
//! records ──► IrWriter ──► bin (uncompressed IR, durable)
//!                            │  compact() once bin >= threshold
//!                            ▼
//!                  FrameCompressor ──► stack (zstd frames, durable)
//! ```
//!
//! Everything the encoder emits lands in the bin first. Compaction copies the
//! whole bin into one new zstd frame, syncs the stack and only then empties
//! the bin, so every byte lives in the bin, the stack, or briefly both.
//!
//! ## Memory mode
//!
//! There is no bin. Encoded bytes go straight into the compressor and the
//! stack is an in-memory buffer that only gets a frame boundary at
//! [`StreamBuffer::finish`].

use crate::compressor::FrameCompressor;
use crate::error::{CoreError, CoreResult};
use irpack_codec::{IrWriter, LogEvent};
use irpack_storage::{ByteSink, FileSink, MemorySink, Sink};
use std::path::Path;
use tracing::{debug, trace};

/// Bin size at which a write triggers compaction.
pub const BIN_COMPACTION_THRESHOLD: u64 = 2 * 1024 * 1024;

/// Initial capacity of the encoder's staging buffer.
pub const DEFAULT_SIZE_HINT: usize = 4096;

/// Staging area for one tag's log stream.
#[derive(Debug)]
pub struct StreamBuffer {
    /// `None` once the stream has been terminated.
    encoder: Option<IrWriter>,
    compressor: FrameCompressor,
    /// Present iff the buffer is disk-backed.
    bin: Option<FileSink>,
    bin_bytes: u64,
    timezone: String,
    size_hint: usize,
    threshold: u64,
}

impl StreamBuffer {
    /// Creates a memory-backed buffer.
    ///
    /// # Errors
    ///
    /// Returns an encoding error for an unusable timezone.
    pub fn in_memory(timezone: &str, size_hint: usize) -> CoreResult<Self> {
        let encoder = IrWriter::new(timezone, size_hint)?;
        Ok(Self::assemble(
            Some(encoder),
            MemorySink::new().into(),
            None,
            0,
            timezone,
            size_hint,
        ))
    }

    /// Creates a disk-backed buffer over an empty bin and stack.
    ///
    /// # Errors
    ///
    /// Returns an encoding error for an unusable timezone, or a storage
    /// error if the bin is not empty.
    pub fn on_disk(
        bin: FileSink,
        stack: FileSink,
        timezone: &str,
        size_hint: usize,
    ) -> CoreResult<Self> {
        let bytes = bin.size()?;
        if bytes != 0 {
            return Err(CoreError::BinNotEmpty { bytes });
        }
        let encoder = IrWriter::new(timezone, size_hint)?;
        Ok(Self::assemble(
            Some(encoder),
            stack.into(),
            Some(bin),
            0,
            timezone,
            size_hint,
        ))
    }

    /// Rebuilds a disk-backed buffer around files left by a previous run.
    ///
    /// `resume_from` is the timestamp of the last event already in the
    /// stream, or `None` if the stream is already terminated. A resumed
    /// encoder never writes a second preamble. Existing bin bytes count
    /// towards the next compaction; for a terminated stream they must be
    /// compacted before the stack is read.
    ///
    /// # Errors
    ///
    /// Fails on an unusable timezone or if the bin size cannot be read.
    pub fn recovered(
        bin: FileSink,
        stack: FileSink,
        timezone: &str,
        size_hint: usize,
        resume_from: Option<i64>,
    ) -> CoreResult<Self> {
        let bin_bytes = bin.size()?;
        let encoder = resume_from
            .map(|last_timestamp| IrWriter::resume(timezone, size_hint, last_timestamp))
            .transpose()?;
        Ok(Self::assemble(
            encoder,
            stack.into(),
            Some(bin),
            bin_bytes,
            timezone,
            size_hint,
        ))
    }

    fn assemble(
        encoder: Option<IrWriter>,
        stack: Sink,
        bin: Option<FileSink>,
        bin_bytes: u64,
        timezone: &str,
        size_hint: usize,
    ) -> Self {
        Self {
            encoder,
            compressor: FrameCompressor::new(stack),
            bin,
            bin_bytes,
            timezone: timezone.to_string(),
            size_hint,
            threshold: BIN_COMPACTION_THRESHOLD,
        }
    }

    /// Overrides the bin size that triggers compaction.
    #[must_use]
    pub fn with_compaction_threshold(mut self, bytes: u64) -> Self {
        self.threshold = bytes.max(1);
        self
    }

    /// Returns `true` if the buffer keeps a bin on disk.
    #[must_use]
    pub fn uses_disk_buffer(&self) -> bool {
        self.bin.is_some()
    }

    /// Returns `true` once the stream has been terminated and awaits upload.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.encoder.is_none()
    }

    /// Uncompacted bytes currently in the bin.
    #[must_use]
    pub fn bin_byte_count(&self) -> u64 {
        self.bin_bytes
    }

    /// Zstd frames closed into the stack since the last reset.
    #[must_use]
    pub fn frames_closed(&self) -> u64 {
        self.compressor.frames_closed()
    }

    /// Timezone recorded in the stream preamble.
    #[must_use]
    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    /// Timestamp of the last event written, if the stream is still open.
    #[must_use]
    pub fn last_timestamp(&self) -> Option<i64> {
        self.encoder.as_ref().map(IrWriter::last_timestamp)
    }

    /// Path of the bin file, in disk mode.
    #[must_use]
    pub fn bin_path(&self) -> Option<&Path> {
        self.bin.as_ref().map(FileSink::path)
    }

    /// Path of the stack file, in disk mode.
    #[must_use]
    pub fn stack_path(&self) -> Option<&Path> {
        self.compressor.sink().ok().and_then(Sink::path)
    }

    /// Encodes `events` and moves the result into the bin (disk mode) or
    /// the compressor (memory mode). Compacts once the bin reaches the
    /// threshold.
    ///
    /// An encoding error aborts the call before anything reaches a sink.
    /// Events of the call encoded before the failing one stay staged in the
    /// encoder and go out with the next write.
    ///
    /// # Errors
    ///
    /// - [`CoreError::StreamFinished`] if the stream was terminated
    /// - [`CoreError::Codec`] if an event cannot be encoded
    /// - storage or compression errors, which are fatal to the tag
    pub fn write(&mut self, events: &[LogEvent]) -> CoreResult<()> {
        let encoder = self.encoder.as_mut().ok_or(CoreError::StreamFinished)?;
        for event in events {
            encoder.write(event)?;
        }

        match self.bin.as_mut() {
            Some(bin) => {
                let written = encoder.flush_to(bin)?;
                self.bin_bytes += written;
                trace!(written, bin_bytes = self.bin_bytes, "appended IR to bin");
            }
            None => {
                let frame = self.compressor.frame()?;
                encoder
                    .flush_to(frame)
                    .map_err(|e| CoreError::compression(format!("frame write failed: {e}")))?;
            }
        }

        if self.bin_bytes >= self.threshold {
            self.compact()?;
        }
        Ok(())
    }

    /// Moves the bin's content into one new zstd frame on the stack.
    ///
    /// The stack is synced before the bin is emptied. A no-op in memory mode
    /// or when the bin is empty.
    ///
    /// # Errors
    ///
    /// Returns storage or compression errors, which are fatal to the tag.
    pub fn compact(&mut self) -> CoreResult<()> {
        let Some(bin) = self.bin.as_mut() else {
            return Ok(());
        };
        if self.bin_bytes == 0 {
            return Ok(());
        }

        bin.rewind()?;
        let copied = self.compressor.copy_from(bin)?;
        self.compressor.close_frame()?;
        self.compressor.sync()?;
        bin.clear()?;
        self.bin_bytes = 0;

        debug!(
            bin = %bin.path().display(),
            bytes = copied,
            frames = self.compressor.frames_closed(),
            "compacted bin into stack"
        );
        Ok(())
    }

    /// Terminates the stream so the stack can be uploaded.
    ///
    /// In disk mode the end-of-stream marker is appended to the bin, which
    /// is then compacted, so the tail of the stream and its terminator share
    /// one frame. In memory mode the marker closes the open frame. Either
    /// way the stack is synced and rewound for reading.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StreamFinished`] if already terminated, or
    /// storage or compression errors.
    pub fn finish(&mut self) -> CoreResult<()> {
        let encoder = self.encoder.take().ok_or(CoreError::StreamFinished)?;

        match self.bin.as_mut() {
            Some(bin) => {
                self.bin_bytes += encoder.close_to(bin)?;
                self.compact()?;
            }
            None => {
                let frame = self.compressor.frame()?;
                encoder
                    .close_to(frame)
                    .map_err(|e| CoreError::compression(format!("frame write failed: {e}")))?;
                self.compressor.close_frame()?;
            }
        }

        self.compressor.sync()?;
        self.compressor.sink_mut()?.rewind()?;
        Ok(())
    }

    /// Returns the stack, rewound to its first byte, for upload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StreamNotFinished`] before [`StreamBuffer::finish`]
    /// and [`CoreError::BinNotEmpty`] while the bin still holds the tail of
    /// a terminated stream.
    pub fn stack_reader(&mut self) -> CoreResult<&mut Sink> {
        if !self.is_finished() {
            return Err(CoreError::StreamNotFinished);
        }
        if self.bin_bytes != 0 {
            return Err(CoreError::BinNotEmpty {
                bytes: self.bin_bytes,
            });
        }
        let stack = self.compressor.sink_mut()?;
        stack.rewind()?;
        Ok(stack)
    }

    /// Starts a fresh stream after a successful upload.
    ///
    /// Empties the stack and installs a new encoder that will write a new
    /// preamble.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BinNotEmpty`] without touching the stack if the
    /// bin still holds data; otherwise storage errors.
    pub fn reset(&mut self) -> CoreResult<()> {
        if let Some(bin) = &self.bin {
            let bytes = self.bin_bytes.max(bin.size()?);
            if bytes != 0 {
                return Err(CoreError::BinNotEmpty { bytes });
            }
        }

        let encoder = IrWriter::new(&self.timezone, self.size_hint)?;
        self.compressor.clear()?;
        self.compressor.sync()?;
        self.encoder = Some(encoder);
        Ok(())
    }

    /// Bytes held by the stack: the file size in disk mode, the buffer
    /// length in memory mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be stat'ed.
    pub fn size_on_disk(&self) -> CoreResult<u64> {
        Ok(self.compressor.sink()?.size()?)
    }

    /// Returns `true` if nothing has been written since the last reset.
    ///
    /// # Errors
    ///
    /// Returns an error if a sink cannot be stat'ed.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.bin_bytes == 0 && !self.compressor.is_open() && self.size_on_disk()? == 0)
    }

    /// Releases the buffer, returning the stack sink.
    ///
    /// # Errors
    ///
    /// Fails if an open frame cannot be closed.
    pub fn into_stack(self) -> CoreResult<Sink> {
        self.compressor.into_sink()
    }
}
