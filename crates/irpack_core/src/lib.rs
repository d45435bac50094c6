//! # irpack Core
//!
//! Per-tag buffering, compaction and crash recovery for shipping logs as
//! compressed IR streams.
//!
//! This crate provides:
//! - [`StreamBuffer`]: IR encoder, durable bin and zstd stack for one tag
//! - [`TagRegistry`]: concurrent map from tag to stream state
//! - [`Recovery`]: startup reconciliation of streams left on disk
//! - [`Flusher`]: the orchestrator a log shipper drives
//! - [`Uploader`]: the seam to object storage
//!
//! ## Example
//!
//! ```no_run
//! use irpack_core::{Config, DirectoryUploader, FlushCode, Flusher, Record};
//! use std::sync::Arc;
//!
//! let config = Config::new()
//!     .s3_bucket("logs")
//!     .disk_buffer_path("/var/lib/irpack");
//! let uploader = Arc::new(DirectoryUploader::new("/srv/objects"));
//!
//! let (flusher, report) = Flusher::start(config, uploader)?;
//! println!("recovered {} streams", report.recovered.len());
//!
//! let batch = vec![Record::with_message(1_700_000_000_000, "log", "hello")];
//! assert_eq!(flusher.flush("app", &batch), FlushCode::Ok);
//!
//! flusher.shutdown();
//! # Ok::<(), irpack_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod buffer;
mod compressor;
mod config;
mod error;
mod flusher;
mod record;
mod recovery;
mod registry;
mod store;
mod upload;

pub use buffer::{StreamBuffer, BIN_COMPACTION_THRESHOLD, DEFAULT_SIZE_HINT};
pub use compressor::{decompress_frames, frame_lengths, FrameCompressor, COMPRESSION_LEVEL};
pub use config::Config;
pub use error::{ConfigError, CoreError, CoreResult};
pub use flusher::{FlushCode, FlushOutcome, Flusher, ShutdownReport};
pub use record::{Record, TIMESTAMP_FIELD};
pub use recovery::{Recovery, RecoveryFailure, RecoveryReport};
pub use registry::{SharedEntry, TagEntry, TagRegistry};
pub use store::{validate_tag, StoreDir};
pub use upload::{
    epoch_millis, object_key, DirectoryUploader, UploadError, UploadMetadata, Uploader,
    OBJECT_SUFFIX,
};

// Re-export the lower layers for convenience.
pub use irpack_codec::{IrReader, IrWriter, LogEvent};
pub use irpack_storage::{ByteSink, FileSink, MemorySink, Sink};
