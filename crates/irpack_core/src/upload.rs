//! Object storage seam.
//!
//! The buffering engine hands every finished stack to an [`Uploader`]. The
//! real object store client lives outside this crate; [`DirectoryUploader`]
//! stores objects as files, which is enough for the CLI and for tests.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// Suffix of every uploaded object.
pub const OBJECT_SUFFIX: &str = ".clp.zst";

/// Why an upload failed, and whether trying again can help.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    /// Transient failure (network, throttling). The stack is kept and the
    /// upload is retried.
    #[error("retryable: {0}")]
    Retryable(String),
    /// Permanent failure (bad credentials, missing bucket).
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<io::Error> for UploadError {
    fn from(e: io::Error) -> Self {
        Self::Retryable(e.to_string())
    }
}

/// Descriptive metadata sent along with an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    /// Tag the stream belongs to.
    pub tag: String,
    /// Creation index of the stream.
    pub index: u64,
    /// Stream start, epoch milliseconds.
    pub start_time_ms: i64,
    /// Last write to the stream, epoch milliseconds.
    pub end_time_ms: i64,
    /// Plugin instance id.
    pub source_id: String,
}

/// Uploads a finished stack to object storage.
pub trait Uploader: Send + Sync {
    /// Stores `body` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Retryable`] or [`UploadError::Fatal`].
    fn upload(
        &self,
        key: &str,
        body: &mut dyn Read,
        metadata: &UploadMetadata,
    ) -> Result<(), UploadError>;
}

/// Builds the object key for a stream.
///
/// Format: `{prefix}{tag}_{index}_{start_ms}_{id}.clp.zst`.
#[must_use]
pub fn object_key(prefix: &str, metadata: &UploadMetadata) -> String {
    format!(
        "{prefix}{}_{}_{}_{}{OBJECT_SUFFIX}",
        metadata.tag, metadata.index, metadata.start_time_ms, metadata.source_id
    )
}

/// Converts a point in time to epoch milliseconds, clamping pre-epoch times
/// to 0.
#[must_use]
pub fn epoch_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Stores objects as files below a root directory.
///
/// Keys may contain `/`, which become subdirectories. Each object is written
/// to a temporary file, synced and renamed into place, so a reader never
/// sees a partial object. The metadata is written next to it as
/// `<key>.meta.json`.
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    root: PathBuf,
}

impl DirectoryUploader {
    /// Creates an uploader writing below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `key` below the root, rejecting keys that would escape it.
    fn object_path(&self, key: &str) -> Result<PathBuf, UploadError> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|part| part.is_empty() || part == "..")
        {
            return Err(UploadError::Fatal(format!("invalid object key {key:?}")));
        }
        Ok(self.root.join(key))
    }
}

impl Uploader for DirectoryUploader {
    fn upload(
        &self,
        key: &str,
        body: &mut dyn Read,
        metadata: &UploadMetadata,
    ) -> Result<(), UploadError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp = path.with_extension("tmp");
        let mut file = File::create(&temp)?;
        let bytes = io::copy(body, &mut file)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, &path)?;

        let meta = serde_json::to_vec_pretty(metadata)
            .map_err(|e| UploadError::Fatal(format!("cannot encode metadata: {e}")))?;
        let mut meta_path = path.clone().into_os_string();
        meta_path.push(".meta.json");
        File::create(meta_path)?.write_all(&meta)?;

        debug!(key, bytes, "stored object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn metadata() -> UploadMetadata {
        UploadMetadata {
            tag: "app".into(),
            index: 3,
            start_time_ms: 1_700_000_000_000,
            end_time_ms: 1_700_000_100_000,
            source_id: "node-1".into(),
        }
    }

    #[test]
    fn key_format() {
        assert_eq!(
            object_key("logs/", &metadata()),
            "logs/app_3_1700000000000_node-1.clp.zst"
        );
        assert_eq!(
            object_key("", &metadata()),
            "app_3_1700000000000_node-1.clp.zst"
        );
    }

    #[test]
    fn directory_uploader_writes_object_and_metadata() {
        let temp = tempdir().unwrap();
        let uploader = DirectoryUploader::new(temp.path());
        let key = object_key("logs/", &metadata());

        let mut body: &[u8] = b"compressed";
        uploader.upload(&key, &mut body, &metadata()).unwrap();

        let path = temp.path().join(&key);
        assert_eq!(fs::read(&path).unwrap(), b"compressed");
        let meta: UploadMetadata = serde_json::from_slice(
            &fs::read(temp.path().join(format!("{key}.meta.json"))).unwrap(),
        )
        .unwrap();
        assert_eq!(meta, metadata());
    }

    #[test]
    fn keys_cannot_escape_root() {
        let temp = tempdir().unwrap();
        let uploader = DirectoryUploader::new(temp.path());
        for key in ["", "/abs", "../up", "a//b"] {
            let mut body: &[u8] = b"x";
            assert!(matches!(
                uploader.upload(key, &mut body, &metadata()),
                Err(UploadError::Fatal(_))
            ));
        }
    }

    #[test]
    fn pre_epoch_times_clamp_to_zero() {
        assert_eq!(epoch_millis(UNIX_EPOCH), 0);
        let before = UNIX_EPOCH - std::time::Duration::from_secs(1);
        assert_eq!(epoch_millis(before), 0);
    }
}
