//! CLI command implementations.

pub mod decode;
pub mod ingest;
pub mod inspect;
pub mod recover;

use irpack_core::Config;
use std::fs;
use std::path::Path;

/// Loads the configuration file given with `--config`.
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = path.ok_or("Configuration file required (--config)")?;
    let text = fs::read_to_string(path)
        .map_err(|e| format!("Cannot read configuration {}: {e}", path.display()))?;
    Ok(Config::parse_str(&text)?)
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_scaled() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(16 * 1024 * 1024), "16.0 MB");
    }

    #[test]
    fn config_path_is_required() {
        assert!(load_config(None).is_err());
    }
}
