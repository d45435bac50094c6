//! Crash simulation.
//!
//! Builds the on-disk state a process leaves behind when it dies at an
//! arbitrary point: bins holding encoded but uncompacted events, stacks
//! holding some frames, and either file cut short mid-write.

use irpack_core::{FrameCompressor, IrWriter, LogEvent, MemorySink};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Encodes `events` as a stream with a preamble, as a fresh bin holds it.
pub fn encode_stream(events: &[LogEvent], terminated: bool) -> Vec<u8> {
    let mut writer = IrWriter::new("UTC", 256).expect("Failed to create writer");
    writer.write_batch(events).expect("Failed to encode events");
    let mut out = Vec::new();
    if terminated {
        writer.close_to(&mut out).expect("Failed to close stream");
    } else {
        writer.flush_to(&mut out).expect("Failed to flush stream");
    }
    out
}

/// Encodes `events` as one stream cut after the first `at` events, as a
/// bin holds it before and after a compaction. The first part carries the
/// preamble, the second is headless.
pub fn encode_split(events: &[LogEvent], at: usize) -> (Vec<u8>, Vec<u8>) {
    let (first, second) = events.split_at(at);
    let mut writer = IrWriter::new("UTC", 256).expect("Failed to create writer");
    let mut head = Vec::new();
    writer.write_batch(first).expect("Failed to encode events");
    writer.flush_to(&mut head).expect("Failed to flush stream");
    let mut tail = Vec::new();
    writer.write_batch(second).expect("Failed to encode events");
    writer.flush_to(&mut tail).expect("Failed to flush stream");
    (head, tail)
}

/// Compresses `ir` into one zstd frame per chunk.
pub fn compress_chunks(chunks: &[&[u8]]) -> Vec<u8> {
    let mut compressor = FrameCompressor::new(MemorySink::new().into());
    for chunk in chunks {
        compressor.write_all(chunk).expect("Failed to compress chunk");
        compressor.close_frame().expect("Failed to close frame");
    }
    compressor
        .into_sink()
        .and_then(|mut sink| Ok(sink.read_all()?))
        .expect("Failed to read compressed chunks")
}

/// Splits `ir` at `at` and compresses each part into its own frame.
pub fn compress_split(ir: &[u8], at: usize) -> Vec<u8> {
    let (head, tail) = ir.split_at(at);
    compress_chunks(&[head, tail])
}

/// Writes `data` to `path`, creating parent directories.
pub fn write_file(path: &Path, data: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create directory");
    }
    fs::write(path, data).expect("Failed to write file");
}

/// Appends `data` to the file at `path`.
pub fn append_file(path: &Path, data: &[u8]) {
    OpenOptions::new()
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(data))
        .expect("Failed to append to file");
}

/// Cuts the last `bytes` bytes off the file at `path`.
pub fn tear_tail(path: &Path, bytes: u64) {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .expect("Failed to open file");
    let len = file.metadata().expect("Failed to stat file").len();
    file.set_len(len.saturating_sub(bytes))
        .expect("Failed to truncate file");
}

/// The first half of a frame holding `data`, as a write interrupted by a
/// crash leaves it.
pub fn partial_frame(data: &[u8]) -> Vec<u8> {
    let mut frame = compress_chunks(&[data]);
    frame.truncate(frame.len() / 2);
    frame
}

/// Size of the file at `path`, or `None` if it does not exist.
pub fn file_len(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}
