//! Concurrent flush load.
//!
//! Several threads flush to overlapping tags through one flusher; the
//! totals let a test check that no record was lost or duplicated.

use crate::generators::records_from;
use irpack_core::{FlushCode, Flusher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Flushes attempted.
    pub total_ops: usize,
    /// Flushes answered with [`FlushCode::Ok`].
    pub successful_ops: usize,
    /// Flushes answered otherwise.
    pub failed_ops: usize,
    /// Records accepted.
    pub records: usize,
    /// Wall time of the run.
    pub duration: Duration,
}

impl StressTestResult {
    /// Flushes per second.
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total_ops as f64 / secs
        } else {
            0.0
        }
    }
}

/// Shape of a stress run.
#[derive(Debug, Clone, Copy)]
pub struct StressConfig {
    /// Writer threads.
    pub threads: usize,
    /// Distinct tags, shared by all threads.
    pub tags: usize,
    /// Flushes per thread.
    pub flushes: usize,
    /// Records per flush.
    pub batch: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            tags: 3,
            flushes: 50,
            batch: 8,
        }
    }
}

impl StressConfig {
    /// Tag thread `thread` uses for its `flush`-th batch.
    pub fn tag(&self, thread: usize, flush: usize) -> String {
        format!("tag{}", (thread + flush) % self.tags.max(1))
    }

    /// Records every run must deliver.
    pub fn expected_records(&self) -> usize {
        self.threads * self.flushes * self.batch
    }
}

/// Flushes from `config.threads` threads at once.
///
/// Every record message is unique across the run, so the uploaded objects
/// can be checked for loss and duplication.
pub fn run_concurrent_flushes(flusher: &Flusher, config: StressConfig) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let accepted = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for thread in 0..config.threads {
            let (successful, failed, accepted) = (&successful, &failed, &accepted);
            scope.spawn(move || {
                for flush in 0..config.flushes {
                    let first = (thread * config.flushes + flush) * config.batch;
                    let batch = records_from(first, config.batch);
                    match flusher.flush(&config.tag(thread, flush), &batch) {
                        FlushCode::Ok => {
                            successful.fetch_add(1, Ordering::Relaxed);
                            accepted.fetch_add(batch.len(), Ordering::Relaxed);
                        }
                        _ => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    });

    let successful_ops = successful.load(Ordering::Relaxed);
    let failed_ops = failed.load(Ordering::Relaxed);
    StressTestResult {
        total_ops: successful_ops + failed_ops,
        successful_ops,
        failed_ops,
        records: accepted.load(Ordering::Relaxed),
        duration: start.elapsed(),
    }
}
