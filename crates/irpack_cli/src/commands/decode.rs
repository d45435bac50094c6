//! Decode command implementation.

use irpack_core::{decompress_frames, IrReader};
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Serialize)]
struct EventLine<'a> {
    timestamp: i64,
    message: &'a str,
}

/// Runs the decode command.
pub fn run(input: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let compressed = fs::read(input)?;
    let ir = decompress_frames(&compressed)?;
    let stream = IrReader::decode_all(&ir)?;

    match format {
        "json" => {
            for event in &stream.events {
                let line = EventLine {
                    timestamp: event.timestamp,
                    message: &event.message,
                };
                println!("{}", serde_json::to_string(&line)?);
            }
        }
        _ => {
            if let Some(metadata) = &stream.metadata {
                println!(
                    "# timezone {} written by irpack {}",
                    metadata.timezone, metadata.version
                );
            }
            for event in &stream.events {
                println!("{} {}", event.timestamp, event.message);
            }
            if !stream.terminated {
                println!("# stream is not terminated");
            }
        }
    }
    Ok(())
}
