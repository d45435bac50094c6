//! Recover command implementation.

use irpack_core::{Config, DirectoryUploader, Flusher};
use std::path::Path;
use std::sync::Arc;

/// Runs the recover command.
pub fn run(config: Config, out: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !config.use_disk_buffer {
        return Err("Recovery needs use_disk_buffer = true".into());
    }

    let uploader = Arc::new(DirectoryUploader::new(out));
    let (flusher, report) = Flusher::start(config, uploader)?;
    flusher.shutdown();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            println!("Recovery Report");
            println!("===============");
            println!();
            println!("Recovered tags: {}", report.recovered.len());
            for tag in &report.recovered {
                println!("  {tag}");
            }
            println!("Uploaded objects: {}", report.uploaded.len());
            for key in &report.uploaded {
                println!("  {key}");
            }
            println!("Deleted empty files: {}", report.deleted.len());
            if !report.failures.is_empty() {
                println!();
                println!("Failures:");
                for failure in &report.failures {
                    println!("  {}: {}", failure.path.display(), failure.error);
                }
            }
        }
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(format!("{} file(s) could not be recovered", report.failures.len()).into())
    }
}
