//! zstd frame compressor writing into a stack sink.
//!
//! The compressor owns the stack. A frame is opened lazily by the first
//! write after construction or after [`FrameCompressor::close_frame`], so
//! a stack is always a concatenation of complete zstd frames plus at most
//! one frame still being written.

use crate::error::{CoreError, CoreResult};
use irpack_storage::{ByteSink, Sink};
use std::io::{self, Read, Write};
use std::mem;
use tracing::trace;
use zstd::stream::write::Encoder;

/// zstd compression level used for every frame.
pub const COMPRESSION_LEVEL: i32 = 3;

enum FrameState {
    Open(Encoder<'static, Sink>),
    Closed(Sink),
    /// The sink was lost while finishing a frame.
    Poisoned,
}

/// Writes data into a stack as a sequence of checksummed zstd frames.
pub struct FrameCompressor {
    state: FrameState,
    frames_closed: u64,
}

impl FrameCompressor {
    /// Creates a compressor over `stack`. No frame is opened yet.
    #[must_use]
    pub fn new(stack: Sink) -> Self {
        Self {
            state: FrameState::Closed(stack),
            frames_closed: 0,
        }
    }

    /// Returns `true` while a frame is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.state, FrameState::Open(_))
    }

    /// Number of frames closed since construction or the last [`clear`].
    ///
    /// [`clear`]: FrameCompressor::clear
    #[must_use]
    pub fn frames_closed(&self) -> u64 {
        self.frames_closed
    }

    /// Returns the stack sink.
    ///
    /// # Errors
    ///
    /// Fails if the sink was lost by an earlier failed frame close.
    pub fn sink(&self) -> CoreResult<&Sink> {
        match &self.state {
            FrameState::Open(encoder) => Ok(encoder.get_ref()),
            FrameState::Closed(sink) => Ok(sink),
            FrameState::Poisoned => Err(lost_sink()),
        }
    }

    /// Returns the stack sink mutably.
    ///
    /// Writing through it while a frame is open corrupts the stack; callers
    /// only read or rewind it after [`FrameCompressor::close_frame`].
    ///
    /// # Errors
    ///
    /// Fails if the sink was lost by an earlier failed frame close.
    pub fn sink_mut(&mut self) -> CoreResult<&mut Sink> {
        match &mut self.state {
            FrameState::Open(encoder) => Ok(encoder.get_mut()),
            FrameState::Closed(sink) => Ok(sink),
            FrameState::Poisoned => Err(lost_sink()),
        }
    }

    /// Returns the writer for the current frame, opening one if needed.
    ///
    /// # Errors
    ///
    /// Fails if a new frame cannot be started.
    pub fn frame(&mut self) -> CoreResult<&mut Encoder<'static, Sink>> {
        if let FrameState::Closed(_) = self.state {
            if let FrameState::Closed(sink) = mem::replace(&mut self.state, FrameState::Poisoned) {
                self.state = FrameState::Open(open_frame(sink)?);
            }
        }

        match &mut self.state {
            FrameState::Open(encoder) => Ok(encoder),
            _ => Err(lost_sink()),
        }
    }

    /// Compresses `data` into the current frame.
    ///
    /// # Errors
    ///
    /// Fails if the frame cannot be opened or written.
    pub fn write_all(&mut self, data: &[u8]) -> CoreResult<()> {
        self.frame()?
            .write_all(data)
            .map_err(|e| CoreError::compression(format!("frame write failed: {e}")))
    }

    /// Compresses everything `reader` yields into the current frame.
    ///
    /// # Errors
    ///
    /// Fails if reading, opening or writing the frame fails.
    pub fn copy_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> CoreResult<u64> {
        let frame = self.frame()?;
        Ok(io::copy(reader, frame)?)
    }

    /// Ends the current frame, leaving the stack positioned for the next one.
    ///
    /// Returns `false` if no frame was open.
    ///
    /// # Errors
    ///
    /// If finishing the frame fails the stack sink is lost and every later
    /// call fails; the tag owning this compressor must be torn down.
    pub fn close_frame(&mut self) -> CoreResult<bool> {
        match mem::replace(&mut self.state, FrameState::Poisoned) {
            FrameState::Open(encoder) => {
                let mut sink = encoder
                    .finish()
                    .map_err(|e| CoreError::compression(format!("frame close failed: {e}")))?;
                sink.flush()?;
                self.state = FrameState::Closed(sink);
                self.frames_closed += 1;
                trace!(frames = self.frames_closed, "closed zstd frame");
                Ok(true)
            }
            FrameState::Closed(sink) => {
                self.state = FrameState::Closed(sink);
                Ok(false)
            }
            FrameState::Poisoned => Err(lost_sink()),
        }
    }

    /// Makes the stack durable.
    ///
    /// # Errors
    ///
    /// Fails if the sink cannot be synced.
    pub fn sync(&mut self) -> CoreResult<()> {
        Ok(self.sink_mut()?.sync()?)
    }

    /// Empties the stack and forgets any frame in progress.
    ///
    /// # Errors
    ///
    /// Fails if the sink cannot be truncated.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.close_frame()?;
        self.sink_mut()?.clear()?;
        self.frames_closed = 0;
        Ok(())
    }

    /// Returns the stack sink, closing any open frame first.
    ///
    /// # Errors
    ///
    /// Fails if the open frame cannot be closed.
    pub fn into_sink(mut self) -> CoreResult<Sink> {
        self.close_frame()?;
        match self.state {
            FrameState::Closed(sink) => Ok(sink),
            _ => Err(lost_sink()),
        }
    }
}

impl std::fmt::Debug for FrameCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            FrameState::Open(_) => "open",
            FrameState::Closed(_) => "closed",
            FrameState::Poisoned => "poisoned",
        };
        f.debug_struct("FrameCompressor")
            .field("state", &state)
            .field("frames_closed", &self.frames_closed)
            .finish()
    }
}

fn open_frame(sink: Sink) -> CoreResult<Encoder<'static, Sink>> {
    let mut encoder = Encoder::new(sink, COMPRESSION_LEVEL)
        .map_err(|e| CoreError::compression(format!("cannot start frame: {e}")))?;
    encoder
        .include_checksum(true)
        .map_err(|e| CoreError::compression(format!("cannot enable checksums: {e}")))?;
    Ok(encoder)
}

fn lost_sink() -> CoreError {
    CoreError::compression("stack sink lost after a failed frame close")
}

/// Splits compressed stack bytes into whole frames.
///
/// Returns the length of every complete frame in order, and the length of
/// the prefix they cover. Anything after that prefix is a torn frame.
#[must_use]
pub fn frame_lengths(data: &[u8]) -> (Vec<usize>, usize) {
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        match zstd::zstd_safe::find_frame_compressed_size(&data[offset..]) {
            Ok(len) if len > 0 && offset + len <= data.len() => {
                frames.push(len);
                offset += len;
            }
            _ => break,
        }
    }
    (frames, offset)
}

/// Decompresses a sequence of whole frames back into IR bytes.
///
/// # Errors
///
/// Fails if any frame is corrupt or fails its checksum.
pub fn decompress_frames(data: &[u8]) -> CoreResult<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    zstd::stream::decode_all(data)
        .map_err(|e| CoreError::compression(format!("cannot decompress stack: {e}")))
}
