//! Ingest command implementation.

use irpack_core::{Config, DirectoryUploader, FlushCode, Flusher, Record};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// How often a batch is re-flushed after a `Retry`.
const MAX_RETRIES: usize = 3;

/// Runs the ingest command.
pub fn run(
    config: Config,
    tag: &str,
    input: &Path,
    out: &Path,
    batch_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let reader: Box<dyn BufRead> = if input == Path::new("-") {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(File::open(input)?))
    };

    let uploader = Arc::new(DirectoryUploader::new(out));
    let (flusher, report) = Flusher::start(config, uploader)?;
    if !report.recovered.is_empty() {
        println!("Recovered {} stream(s) before ingesting", report.recovered.len());
    }

    let mut batch = Vec::with_capacity(batch_size.max(1));
    let mut accepted = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match Record::from_json_line(&line) {
            Ok(record) => batch.push(record),
            Err(e) => {
                warn!(line = number + 1, error = %e, "skipping record");
                skipped += 1;
                continue;
            }
        }

        if batch.len() >= batch_size.max(1) {
            let n = batch.len();
            if flush_with_retry(&flusher, tag, &batch) {
                accepted += n;
            } else {
                failed += n;
            }
            batch.clear();
        }
    }

    if !batch.is_empty() {
        let n = batch.len();
        if flush_with_retry(&flusher, tag, &batch) {
            accepted += n;
        } else {
            failed += n;
        }
    }

    let shutdown = flusher.shutdown();

    println!("Ingested {accepted} record(s) into tag {tag}");
    if skipped > 0 {
        println!("Skipped {skipped} malformed line(s)");
    }
    for key in &shutdown.uploaded {
        println!("Uploaded {key}");
    }
    if !shutdown.retained.is_empty() {
        println!(
            "{} stream(s) left in the disk buffer for the next run",
            shutdown.retained.len()
        );
    }

    if failed > 0 || !shutdown.failures.is_empty() {
        return Err(format!("{failed} record(s) could not be buffered").into());
    }
    Ok(())
}

fn flush_with_retry(flusher: &Flusher, tag: &str, batch: &[Record]) -> bool {
    for _ in 0..=MAX_RETRIES {
        match flusher.flush(tag, batch) {
            FlushCode::Ok => return true,
            FlushCode::Retry => continue,
            FlushCode::Error => return false,
        }
    }
    false
}
