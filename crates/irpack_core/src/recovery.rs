//! Startup recovery of disk-buffered streams.
//!
//! A previous process may have stopped at any point, leaving behind:
//!
//! - bin files with IR that was never compacted, possibly ending in a
//!   half-written event
//! - stack files ending in a half-written zstd frame (crash during
//!   compaction)
//! - bins that were already compacted into the stack but not yet
//!   truncated
//! - stacks that were already terminated but never uploaded
//! - empty files
//!
//! Recovery repairs each pair, terminates the stream with a resumed
//! encoder so the object holds exactly one preamble, and uploads it.
//! Problems with one pair are collected in the [`RecoveryReport`]; only an
//! unreadable directory stops the scan.

use crate::buffer::{StreamBuffer, DEFAULT_SIZE_HINT};
use crate::compressor::{decompress_frames, frame_lengths};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::flusher::ship;
use crate::registry::{TagEntry, TagRegistry};
use crate::store::{validate_tag, StoreDir};
use crate::upload::Uploader;
use irpack_codec::{valid_prefix_len, CodecError, IrReader};
use irpack_storage::{ByteSink, FileSink};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Magic number opening every zstd frame.
const ZSTD_MAGIC: u32 = 0xFD2F_B528;

/// A pair that could not be recovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryFailure {
    /// File that triggered the failure.
    pub path: PathBuf,
    /// What went wrong.
    pub error: String,
}

/// Outcome of a recovery scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Tags whose streams were rebuilt and registered.
    pub recovered: Vec<String>,
    /// Object keys uploaded during recovery.
    pub uploaded: Vec<String>,
    /// Files removed because they held nothing.
    pub deleted: Vec<PathBuf>,
    /// Pairs left on disk because of an error.
    pub failures: Vec<RecoveryFailure>,
}

impl RecoveryReport {
    /// Returns `true` if every pair was recovered and uploaded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, path: impl Into<PathBuf>, error: impl ToString) {
        let path = path.into();
        let error = error.to_string();
        warn!(path = %path.display(), %error, "recovery failed");
        self.failures.push(RecoveryFailure { path, error });
    }
}

/// What was found on disk for one tag.
pub(crate) enum RestoredPair {
    /// Neither file holds any usable data; both are now empty.
    Empty {
        /// The bin.
        bin: FileSink,
        /// The stack.
        stack: FileSink,
    },
    /// A stream to continue, terminated if the previous run finished it.
    Resumed(StreamBuffer),
}

/// Opens a tag's files and rebuilds the stream they hold.
///
/// Repairs are applied in place: a torn trailing frame is cut from the
/// stack, a bin whose bytes already form the stack's last frame is
/// emptied, and a torn trailing event is cut from the bin. The bin carries
/// the stream preamble only when the stack holds nothing.
pub(crate) fn restore_pair(store: &StoreDir, tag: &str, config: &Config) -> CoreResult<RestoredPair> {
    let (mut bin, mut stack) = store.open_pair(tag)?;

    let mut compressed = stack.read_all()?;
    let (frames, valid) = frame_lengths(&compressed);
    if valid < compressed.len() {
        if !is_torn_frame(&compressed[valid..]) {
            return Err(CoreError::unrecoverable(
                stack.path(),
                format!("no zstd frame at offset {valid}"),
            ));
        }
        warn!(
            tag,
            torn = compressed.len() - valid,
            frames = frames.len(),
            "cutting torn frame from stack"
        );
        stack.truncate(valid as u64)?;
        stack.sync()?;
        compressed.truncate(valid);
    }

    let mut ir = decompress_frames(&compressed)
        .map_err(|e| CoreError::unrecoverable(stack.path(), e.to_string()))?;

    let mut staged = bin.read_all()?;
    if !staged.is_empty() && is_last_frame(&compressed, &frames, &staged) {
        // Crash between the stack sync and the bin truncation of a compaction.
        warn!(tag, bytes = staged.len(), "bin already compacted, discarding it");
        bin.truncate(0)?;
        bin.sync()?;
        staged.clear();
    }

    let with_preamble = ir.is_empty();
    let keep = valid_prefix_len(&staged, with_preamble);
    if keep < staged.len() {
        if !is_torn_event(&staged, keep, with_preamble) {
            return Err(CoreError::unrecoverable(
                bin.path(),
                format!("malformed IR at offset {keep}"),
            ));
        }
        warn!(tag, torn = staged.len() - keep, "cutting torn event from bin");
        bin.truncate(keep as u64)?;
        bin.sync()?;
    }
    ir.extend_from_slice(&staged[..keep]);

    if ir.is_empty() {
        return Ok(RestoredPair::Empty { bin, stack });
    }

    let mut reader = IrReader::new(&ir).map_err(|e| CoreError::unrecoverable(stack.path(), e.to_string()))?;
    let mut events = 0u64;
    while reader
        .next_event()
        .map_err(|e| CoreError::unrecoverable(stack.path(), e.to_string()))?
        .is_some()
    {
        events += 1;
    }

    let timezone = reader
        .metadata()
        .map_or_else(|| config.time_zone.clone(), |m| m.timezone.clone());
    let resume_from = (!reader.is_terminated()).then(|| reader.last_timestamp());
    debug!(
        tag,
        events,
        frames = frames.len(),
        bin_bytes = keep,
        terminated = reader.is_terminated(),
        "restored stream"
    );

    let buffer = StreamBuffer::recovered(bin, stack, &timezone, DEFAULT_SIZE_HINT, resume_from)?;
    Ok(RestoredPair::Resumed(buffer))
}

/// Returns `true` if the last complete frame of `compressed` holds exactly
/// `staged`.
fn is_last_frame(compressed: &[u8], frames: &[usize], staged: &[u8]) -> bool {
    let Some(&last) = frames.last() else {
        return false;
    };
    let end: usize = frames.iter().sum();
    decompress_frames(&compressed[end - last..end]).is_ok_and(|ir| ir == staged)
}

/// Returns `true` if `tail` looks like the start of a zstd frame that was
/// cut short, rather than foreign data.
fn is_torn_frame(tail: &[u8]) -> bool {
    let magic = ZSTD_MAGIC.to_le_bytes();
    let n = tail.len().min(magic.len());
    tail[..n] == magic[..n]
}

/// Returns `true` if the bytes of `staged` from `keep` on are one item that
/// was cut short, rather than malformed data.
fn is_torn_event(staged: &[u8], keep: usize, with_preamble: bool) -> bool {
    if with_preamble && keep == 0 {
        return matches!(IrReader::new(staged), Err(CodecError::UnexpectedEof));
    }
    matches!(
        IrReader::headless(&staged[keep..], 0).next_event(),
        Err(CodecError::UnexpectedEof)
    )
}

/// Recovers every stream left in a buffer directory.
pub struct Recovery<'a> {
    store: &'a StoreDir,
    registry: &'a TagRegistry,
    config: &'a Config,
    uploader: &'a dyn Uploader,
}

impl<'a> Recovery<'a> {
    /// Creates a recovery pass. Recovered entries are added to `registry`.
    pub fn new(
        store: &'a StoreDir,
        registry: &'a TagRegistry,
        config: &'a Config,
        uploader: &'a dyn Uploader,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            uploader,
        }
    }

    /// Runs the scan.
    ///
    /// Non-empty bins are visited first, each with its stack; then the
    /// remaining stacks. Empty files are deleted. A missing bin directory
    /// means there is nothing to recover.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecoveryDirUnreadable`] if a directory exists but
    /// cannot be listed. Everything else is reported per pair.
    pub fn run(&self) -> CoreResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let Some(bins) = list_files(&self.store.bin_dir(), &mut report)? else {
            debug!(path = %self.store.path().display(), "nothing to recover");
            return Ok(report);
        };

        let mut handled = HashSet::new();
        for (tag, path, len) in bins {
            if len == 0 {
                remove_empty(&path, &mut report);
                continue;
            }
            handled.insert(tag.clone());
            self.recover_tag(&tag, &path, &mut report);
        }

        if let Some(stacks) = list_files(&self.store.stack_dir(), &mut report)? {
            for (tag, path, len) in stacks {
                if handled.contains(&tag) {
                    continue;
                }
                if len == 0 {
                    remove_empty(&path, &mut report);
                    continue;
                }
                self.recover_tag(&tag, &path, &mut report);
            }
        }

        info!(
            recovered = report.recovered.len(),
            uploaded = report.uploaded.len(),
            deleted = report.deleted.len(),
            failed = report.failures.len(),
            "recovery complete"
        );
        Ok(report)
    }

    fn recover_tag(&self, tag: &str, path: &Path, report: &mut RecoveryReport) {
        if let Err(e) = validate_tag(tag) {
            report.fail(path, e);
            return;
        }

        let buffer = match restore_pair(self.store, tag, self.config) {
            Ok(RestoredPair::Resumed(buffer)) => buffer,
            Ok(RestoredPair::Empty { bin, stack }) => {
                drop((bin, stack));
                match self.store.remove_pair(tag) {
                    Ok(()) => {
                        report.deleted.push(self.store.bin_path(tag));
                        report.deleted.push(self.store.stack_path(tag));
                    }
                    Err(e) => report.fail(path, e),
                }
                return;
            }
            Err(e) => {
                report.fail(path, e);
                return;
            }
        };

        let started = fs::metadata(self.store.stack_path(tag))
            .and_then(|m| m.created().or_else(|_| m.modified()))
            .unwrap_or_else(|_| SystemTime::now());
        let entry = TagEntry::new(tag, self.registry.next_index(), buffer).started_at(started);
        let shared = self.registry.insert(entry);
        report.recovered.push(tag.to_string());

        let mut entry = shared.lock();
        match ship(&mut entry, self.config, self.uploader, self.registry) {
            Ok(key) => {
                info!(tag, key = %key, "uploaded recovered stream");
                report.uploaded.push(key);
            }
            Err(e) => {
                if e.is_fatal_to_tag() {
                    self.registry.remove_entry(tag, &shared);
                }
                report.fail(path, e);
            }
        }
    }
}

/// Lists the regular files of `dir` as `(name, path, len)`, sorted by name.
///
/// Returns `None` if the directory does not exist.
fn list_files(
    dir: &Path,
    report: &mut RecoveryReport,
) -> CoreResult<Option<Vec<(String, PathBuf, u64)>>> {
    let unreadable = |source: io::Error| CoreError::RecoveryDirUnreadable {
        path: dir.to_path_buf(),
        source,
    };

    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(unreadable(e)),
    };

    let mut files = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                report.fail(&path, e);
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => files.push((name, path, metadata.len())),
            Err(_) => report.fail(&path, "file name is not valid UTF-8"),
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(Some(files))
}

fn remove_empty(path: &Path, report: &mut RecoveryReport) {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed empty buffer file");
            report.deleted.push(path.to_path_buf());
        }
        Err(e) => report.fail(path, e),
    }
}
