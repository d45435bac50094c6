//! Flusher fixtures.
//!
//! A [`TestFlusher`] owns a temporary buffer directory and a
//! [`MemoryUploader`], and can simulate a crash by dropping the flusher
//! without shutting it down.

use crate::uploader::MemoryUploader;
use irpack_core::{Config, FlushCode, Flusher, Record, RecoveryReport, ShutdownReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Configuration writing to a disk buffer under `root`.
pub fn disk_config(root: &Path) -> Config {
    Config::new()
        .id("testkit")
        .s3_bucket("bucket")
        .time_zone("UTC")
        .disk_buffer_path(root.join("buffer"))
        .upload_size_mb(1)
}

/// Configuration buffering in memory.
pub fn memory_config() -> Config {
    Config::new()
        .id("testkit")
        .s3_bucket("bucket")
        .time_zone("UTC")
        .use_disk_buffer(false)
}

/// A flusher over a temporary directory.
pub struct TestFlusher {
    flusher: Option<Flusher>,
    config: Config,
    /// Objects uploaded by every incarnation of the flusher.
    pub uploader: Arc<MemoryUploader>,
    /// Report of the most recent start.
    pub last_recovery: RecoveryReport,
    _temp_dir: TempDir,
}

impl TestFlusher {
    /// Starts a disk-buffered flusher.
    pub fn disk() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = disk_config(temp_dir.path());
        Self::start(config, temp_dir)
    }

    /// Starts a memory-buffered flusher.
    pub fn memory() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = memory_config().disk_buffer_path(temp_dir.path().join("buffer"));
        Self::start(config, temp_dir)
    }

    /// Starts a flusher with `config`, which should point into `temp_dir`.
    pub fn start(config: Config, temp_dir: TempDir) -> Self {
        let uploader = Arc::new(MemoryUploader::new());
        let (flusher, report) =
            Flusher::start(config.clone(), uploader.clone()).expect("Failed to start flusher");
        Self {
            flusher: Some(flusher),
            config,
            uploader,
            last_recovery: report,
            _temp_dir: temp_dir,
        }
    }

    /// Root of the disk buffer.
    pub fn buffer_path(&self) -> PathBuf {
        self.config.disk_buffer_path.clone()
    }

    /// Path of `tag`'s bin file.
    pub fn bin_path(&self, tag: &str) -> PathBuf {
        self.buffer_path().join("bin").join(tag)
    }

    /// Path of `tag`'s stack file.
    pub fn stack_path(&self, tag: &str) -> PathBuf {
        self.buffer_path().join("stack").join(tag)
    }

    /// The running flusher.
    ///
    /// # Panics
    ///
    /// Panics after [`TestFlusher::crash`] until the next restart.
    pub fn flusher(&self) -> &Flusher {
        self.flusher.as_ref().expect("flusher is not running")
    }

    /// Flushes `records` for `tag`.
    pub fn flush(&self, tag: &str, records: &[Record]) -> FlushCode {
        self.flusher().flush(tag, records)
    }

    /// Drops the flusher without shutting it down.
    pub fn crash(&mut self) {
        self.flusher = None;
    }

    /// Shuts the flusher down.
    pub fn shutdown(&mut self) -> ShutdownReport {
        self.flusher
            .take()
            .expect("flusher is not running")
            .shutdown()
    }

    /// Starts a new flusher over the same directory and uploader, stopping
    /// the current one first if it is still running.
    pub fn restart(&mut self) -> &RecoveryReport {
        if self.flusher.is_some() {
            self.crash();
        }
        let (flusher, report) = Flusher::start(self.config.clone(), self.uploader.clone())
            .expect("Failed to restart flusher");
        self.flusher = Some(flusher);
        self.last_recovery = report;
        &self.last_recovery
    }
}

/// Runs `f` against a disk-buffered flusher.
pub fn with_disk_flusher<F, R>(f: F) -> R
where
    F: FnOnce(&mut TestFlusher) -> R,
{
    let mut flusher = TestFlusher::disk();
    f(&mut flusher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::records;

    #[test]
    fn crash_and_restart_recovers_buffered_records() {
        with_disk_flusher(|t| {
            assert_eq!(t.flush("app", &records(4)), FlushCode::Ok);
            assert!(t.uploader.is_empty());

            t.crash();
            let report = t.restart();
            assert_eq!(report.recovered, ["app"]);
            assert_eq!(t.uploader.messages_for("app").len(), 4);
        });
    }

    #[test]
    fn memory_flusher_has_no_files() {
        let t = TestFlusher::memory();
        assert_eq!(t.flush("app", &records(1)), FlushCode::Ok);
        assert!(!t.bin_path("app").exists());
        assert!(!t.stack_path("app").exists());
    }
}
