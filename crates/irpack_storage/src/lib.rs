//! # irpack Storage
//!
//! Byte sinks that back the per-tag bins and stacks of irpack.
//!
//! Sinks are **opaque byte stores**. They do not know anything about IR or
//! zstd frames; they only append, read back from the start, truncate and
//! sync.
//!
//! ## Design Principles
//!
//! - Writes always append at the end of the sink
//! - Reads start wherever the last [`ByteSink::rewind`] left the cursor
//! - The kind of sink is fixed when it is built: [`Sink`] is a closed enum,
//!   so callers never have to guess what they are holding
//!
//! ## Available Sinks
//!
//! - [`MemorySink`] - Growable in-memory buffer
//! - [`FileSink`] - Regular file on disk, survives process restarts
//!
//! ## Example
//!
//! ```rust
//! use irpack_storage::{ByteSink, MemorySink};
//! use std::io::{Read, Write};
//!
//! let mut sink = MemorySink::new();
//! sink.write_all(b"hello world").unwrap();
//! sink.rewind().unwrap();
//!
//! let mut out = String::new();
//! sink.read_to_string(&mut out).unwrap();
//! assert_eq!(out, "hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod sink;

pub use error::{StorageError, StorageResult};
pub use file::FileSink;
pub use memory::MemorySink;
pub use sink::{ByteSink, Sink};
