//! Inspect command implementation.
//!
//! Reads the buffer directory without locking it, so it can be pointed at
//! the buffer of a running process.

use super::format_size;
use irpack_core::frame_lengths;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;

/// Buffer inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Buffer directory.
    pub path: String,
    /// One entry per tag found in `bin/` or `stack/`.
    pub tags: Vec<TagFiles>,
}

/// Files of a single tag.
#[derive(Debug, Serialize)]
pub struct TagFiles {
    /// Tag (file name).
    pub tag: String,
    /// Bin size in bytes, if the bin exists.
    pub bin_size: Option<u64>,
    /// Stack size in bytes, if the stack exists.
    pub stack_size: Option<u64>,
    /// Complete zstd frames in the stack.
    pub frames: usize,
    /// Bytes after the last complete frame.
    pub torn_bytes: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No disk buffer found at {}", path.display()).into());
    }

    let mut names = list(&path.join("bin"))?;
    names.extend(list(&path.join("stack"))?);
    names.sort();
    names.dedup();

    let mut tags = Vec::with_capacity(names.len());
    for tag in names {
        let bin_size = size_of(&path.join("bin").join(&tag))?;
        let stack_path = path.join("stack").join(&tag);
        let stack_size = size_of(&stack_path)?;
        let (frames, torn_bytes) = match stack_size {
            Some(_) => {
                let data = fs::read(&stack_path)?;
                let (frames, valid) = frame_lengths(&data);
                (frames.len(), (data.len() - valid) as u64)
            }
            None => (0, 0),
        };
        tags.push(TagFiles {
            tag,
            bin_size,
            stack_size,
            frames,
            torn_bytes,
        });
    }

    let result = InspectResult {
        path: path.display().to_string(),
        tags,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn list(dir: &Path) -> io::Result<Vec<String>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
    }
    Ok(names)
}

fn size_of(path: &Path) -> io::Result<Option<u64>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.len())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn print_text_output(result: &InspectResult) {
    println!("irpack Buffer Inspection");
    println!("========================");
    println!();
    println!("Path: {}", result.path);
    println!();

    if result.tags.is_empty() {
        println!("No buffered streams.");
        return;
    }

    for tag in &result.tags {
        let size = |s: Option<u64>| s.map_or_else(|| "-".to_string(), format_size);
        print!(
            "  {:<32} bin {:>10}  stack {:>10}  {} frame(s)",
            tag.tag,
            size(tag.bin_size),
            size(tag.stack_size),
            tag.frames
        );
        if tag.torn_bytes > 0 {
            print!("  ({} torn bytes)", tag.torn_bytes);
        }
        println!();
    }
}
