//! Flush orchestration.
//!
//! The [`Flusher`] is the entry point a log shipper drives: it is started
//! once (recovering whatever a previous run left on disk), receives batches
//! of records per tag, decides when a stream is uploaded, and is shut down
//! at the end.
//!
//! ## Error policy
//!
//! | failure                  | tag state                        | code    |
//! |--------------------------|----------------------------------|---------|
//! | record cannot be encoded | unchanged                        | `Error` |
//! | bin, stack or compressor | torn down, files kept on disk    | `Retry` |
//! | upload, retryable        | stream terminated, stack kept    | `Retry` |
//! | upload, fatal            | stream terminated, stack kept    | `Error` |
//!
//! A terminated stream whose upload failed is uploaded again by the next
//! flush to its tag before any new record is accepted. A torn-down tag is
//! rebuilt from its files on the next flush, the same way startup recovery
//! rebuilds it.

use crate::buffer::{StreamBuffer, DEFAULT_SIZE_HINT};
use crate::config::Config;
use crate::error::CoreResult;
use crate::record::Record;
use crate::recovery::{restore_pair, Recovery, RecoveryReport, RestoredPair};
use crate::registry::{TagEntry, TagRegistry};
use crate::store::{validate_tag, StoreDir};
use crate::upload::Uploader;
use irpack_codec::LogEvent;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Status of a flush, as reported back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushCode {
    /// Records accepted.
    Ok,
    /// Transient failure; the host should deliver the batch again.
    Retry,
    /// Permanent failure; the batch is dropped.
    Error,
}

/// Result of a successful flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Keys of the objects uploaded while handling the batch.
    pub uploaded: Vec<String>,
}

/// Result of [`Flusher::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Keys uploaded during shutdown (memory mode).
    pub uploaded: Vec<String>,
    /// Tags left for the next start's recovery (disk mode).
    pub retained: Vec<String>,
    /// Tags that failed, with the error.
    pub failures: Vec<(String, String)>,
}

/// Buffers records per tag and ships finished streams.
pub struct Flusher {
    config: Config,
    store: Option<StoreDir>,
    registry: TagRegistry,
    uploader: Arc<dyn Uploader>,
}

impl Flusher {
    /// Starts the flusher.
    ///
    /// In disk mode this locks the buffer directory and recovers every
    /// stream left in it before returning.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration, a locked buffer
    /// directory, or an unreadable recovery directory.
    pub fn start(config: Config, uploader: Arc<dyn Uploader>) -> CoreResult<(Self, RecoveryReport)> {
        config.validate()?;

        let registry = TagRegistry::new();
        let (store, report) = if config.use_disk_buffer {
            let store = StoreDir::open(&config.disk_buffer_path)?;
            let report = Recovery::new(&store, &registry, &config, uploader.as_ref()).run()?;
            (Some(store), report)
        } else {
            (None, RecoveryReport::default())
        };

        info!(
            id = %config.id,
            disk_buffer = config.use_disk_buffer,
            recovered = report.recovered.len(),
            "flusher started"
        );

        Ok((
            Self {
                config,
                store,
                registry,
                uploader,
            },
            report,
        ))
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the tag registry.
    #[must_use]
    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    /// Returns the buffer directory, in disk mode.
    #[must_use]
    pub fn store(&self) -> Option<&StoreDir> {
        self.store.as_ref()
    }

    /// Buffers `records` for `tag`, uploading if the stream is due.
    ///
    /// Errors are logged and mapped to a [`FlushCode`].
    pub fn flush(&self, tag: &str, records: &[Record]) -> FlushCode {
        match self.try_flush(tag, records) {
            Ok(_) => FlushCode::Ok,
            Err(e) => {
                let code = e.flush_code();
                match code {
                    FlushCode::Retry => warn!(tag, error = %e, "flush failed, will retry"),
                    _ => error!(tag, error = %e, "flush failed"),
                }
                code
            }
        }
    }

    /// Like [`Flusher::flush`], returning the error itself.
    ///
    /// # Errors
    ///
    /// See the module documentation for how each failure leaves the tag.
    pub fn try_flush(&self, tag: &str, records: &[Record]) -> CoreResult<FlushOutcome> {
        validate_tag(tag)?;
        let events = records
            .iter()
            .map(|record| record.to_event(&self.config))
            .collect::<CoreResult<Vec<_>>>()?;

        loop {
            let shared = self.registry.get_or_create(tag, || self.open_buffer(tag))?;
            let mut entry = shared.lock();
            if !self.registry.is_current(tag, &shared) {
                // Torn down while we waited for the lock.
                continue;
            }

            let result = self.write_entry(&mut entry, &events);
            if let Err(e) = &result {
                if e.is_fatal_to_tag() && self.registry.remove_entry(tag, &shared) {
                    warn!(tag, error = %e, "tore down tag after storage failure");
                }
            }
            return result;
        }
    }

    fn write_entry(&self, entry: &mut TagEntry, events: &[LogEvent]) -> CoreResult<FlushOutcome> {
        let mut outcome = FlushOutcome::default();

        if entry.buffer.is_finished() {
            debug!(tag = entry.name(), "retrying upload of finished stream");
            outcome.uploaded.push(self.ship(entry)?);
        }

        entry.buffer.write(events)?;
        entry.touch();

        if self.upload_due(&entry.buffer, events)? {
            outcome.uploaded.push(self.ship(entry)?);
        }
        Ok(outcome)
    }

    fn upload_due(&self, buffer: &StreamBuffer, events: &[LogEvent]) -> CoreResult<bool> {
        if !buffer.uses_disk_buffer() {
            return Ok(!events.is_empty());
        }
        Ok(buffer.size_on_disk()? >= self.config.upload_size_bytes())
    }

    fn ship(&self, entry: &mut TagEntry) -> CoreResult<String> {
        ship(entry, &self.config, self.uploader.as_ref(), &self.registry)
    }

    fn open_buffer(&self, tag: &str) -> CoreResult<StreamBuffer> {
        let Some(store) = &self.store else {
            return StreamBuffer::in_memory(&self.config.time_zone, DEFAULT_SIZE_HINT);
        };

        match restore_pair(store, tag, &self.config)? {
            RestoredPair::Resumed(buffer) => {
                info!(tag, "resumed stream from disk");
                Ok(buffer)
            }
            RestoredPair::Empty { bin, stack } => {
                StreamBuffer::on_disk(bin, stack, &self.config.time_zone, DEFAULT_SIZE_HINT)
            }
        }
    }

    /// Stops the flusher, best effort.
    ///
    /// Disk mode compacts every bin and closes the files, leaving the
    /// streams for the next start's recovery. Memory mode terminates and
    /// uploads every non-empty stream. A failure is logged and the pass
    /// moves on to the next tag.
    pub fn shutdown(self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        for (tag, shared) in self.registry.entries() {
            let mut entry = shared.lock();
            let result = if entry.buffer.uses_disk_buffer() {
                entry
                    .buffer
                    .compact()
                    .map(|()| report.retained.push(tag.clone()))
            } else {
                match entry.buffer.is_empty() {
                    Ok(true) if !entry.buffer.is_finished() => Ok(()),
                    Ok(_) => self.ship(&mut entry).map(|key| report.uploaded.push(key)),
                    Err(e) => Err(e),
                }
            };

            if let Err(e) = result {
                warn!(tag = %tag, error = %e, "shutdown of tag failed");
                report.failures.push((tag.clone(), e.to_string()));
            }
            drop(entry);
            self.registry.remove(&tag);
        }

        info!(
            uploaded = report.uploaded.len(),
            retained = report.retained.len(),
            failed = report.failures.len(),
            "flusher stopped"
        );
        report
    }
}

/// Terminates `entry`'s stream if needed, uploads its stack and starts a
/// new stream.
///
/// A stream found terminated may still have its tail in the bin; that is
/// compacted first. On upload failure the stream stays terminated with its
/// stack intact, so calling this again retries the same object.
pub(crate) fn ship(
    entry: &mut TagEntry,
    config: &Config,
    uploader: &dyn Uploader,
    registry: &TagRegistry,
) -> CoreResult<String> {
    if entry.buffer.is_finished() {
        entry.buffer.compact()?;
    } else {
        entry.buffer.finish()?;
    }

    let metadata = entry.upload_metadata(&config.id);
    let key = entry.object_key(&config.s3_bucket_prefix, &config.id);
    let bytes = entry.buffer.size_on_disk()?;
    uploader.upload(&key, entry.buffer.stack_reader()?, &metadata)?;
    info!(tag = entry.name(), key = %key, bytes, "uploaded stream");

    entry.buffer.reset()?;
    entry.restart(registry.next_index());
    Ok(key)
}
