//! Output configuration.
//!
//! A [`Config`] is either built programmatically with the builder methods or
//! parsed from `key value` pairs, the form in which a log shipper hands
//! plugin options over. Parsing goes through a table of known options and
//! collects every problem instead of stopping at the first one.

use crate::error::ConfigError;
use irpack_codec::validate_timezone;
use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;

/// Configuration of one output instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Instance id, part of every object key.
    pub id: String,

    /// Take the message from a single record field.
    pub use_single_key: bool,

    /// Fall back to the whole record when the single key is missing.
    pub allow_missing_key: bool,

    /// Field holding the message.
    pub single_key: String,

    /// Timezone recorded in stream preambles.
    pub time_zone: String,

    /// Destination bucket.
    pub s3_bucket: String,

    /// Prefix for object keys.
    pub s3_bucket_prefix: String,

    /// Bucket region.
    pub s3_region: String,

    /// Role to assume for uploads.
    pub role_arn: Option<String>,

    /// Buffer streams on disk instead of in memory.
    pub use_disk_buffer: bool,

    /// Root of the disk buffer.
    pub disk_buffer_path: PathBuf,

    /// Stack size, in MiB, at which a disk-buffered stream is uploaded.
    pub upload_size_mb: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            use_single_key: true,
            allow_missing_key: true,
            single_key: "log".to_string(),
            time_zone: "America/Toronto".to_string(),
            s3_bucket: String::new(),
            s3_bucket_prefix: "logs/".to_string(),
            s3_region: "us-east-1".to_string(),
            role_arn: None,
            use_disk_buffer: true,
            disk_buffer_path: PathBuf::from("tmp/out_clp_s3/"),
            upload_size_mb: 16,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets whether the message comes from a single field.
    #[must_use]
    pub const fn use_single_key(mut self, value: bool) -> Self {
        self.use_single_key = value;
        self
    }

    /// Sets whether a missing single key falls back to the whole record.
    #[must_use]
    pub const fn allow_missing_key(mut self, value: bool) -> Self {
        self.allow_missing_key = value;
        self
    }

    /// Sets the field holding the message.
    #[must_use]
    pub fn single_key(mut self, key: impl Into<String>) -> Self {
        self.single_key = key.into();
        self
    }

    /// Sets the timezone.
    #[must_use]
    pub fn time_zone(mut self, tz: impl Into<String>) -> Self {
        self.time_zone = tz.into();
        self
    }

    /// Sets the bucket.
    #[must_use]
    pub fn s3_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.s3_bucket = bucket.into();
        self
    }

    /// Sets the object key prefix.
    #[must_use]
    pub fn s3_bucket_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.s3_bucket_prefix = prefix.into();
        self
    }

    /// Enables or disables the disk buffer.
    #[must_use]
    pub const fn use_disk_buffer(mut self, value: bool) -> Self {
        self.use_disk_buffer = value;
        self
    }

    /// Sets the disk buffer root.
    #[must_use]
    pub fn disk_buffer_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_buffer_path = path.into();
        self
    }

    /// Sets the upload threshold in MiB.
    #[must_use]
    pub const fn upload_size_mb(mut self, size: u64) -> Self {
        self.upload_size_mb = size;
        self
    }

    /// Upload threshold in bytes.
    #[must_use]
    pub fn upload_size_bytes(&self) -> u64 {
        self.upload_size_mb.saturating_mul(MIB)
    }

    /// Builds a configuration from `(key, value)` pairs on top of the
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing every unknown key, bad value
    /// and failed validation.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        let mut errors = Vec::new();

        for (key, value) in pairs {
            let (key, value) = (key.as_ref().trim(), value.as_ref().trim());
            match OPTIONS.iter().find(|option| option.key.eq_ignore_ascii_case(key)) {
                Some(option) => {
                    if let Err(e) = (option.apply)(&mut config, value) {
                        errors.push(format!("option {key}={value}: {e}"));
                    }
                }
                None => errors.push(format!("unknown option {key}")),
            }
        }

        if let Err(ConfigError::Invalid { errors: invalid }) = config.validate() {
            errors.extend(invalid);
        }

        if errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid { errors })
        }
    }

    /// Parses a configuration file.
    ///
    /// Each non-blank line is `key value` or `key = value`. Lines starting
    /// with `#` and `[section]` headers are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Syntax`] for a key without a value, otherwise
    /// the same errors as [`Config::from_pairs`].
    pub fn parse_str(text: &str) -> Result<Self, ConfigError> {
        let mut pairs = Vec::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
                continue;
            }

            let (key, rest) = line
                .split_once(|c: char| c == '=' || c.is_whitespace())
                .unwrap_or((line, ""));
            let value = rest.trim_start();
            let value = value.strip_prefix('=').unwrap_or(value).trim();
            match (key, value) {
                (key, value) if !key.is_empty() && !value.is_empty() => {
                    pairs.push((key.to_string(), value.to_string()));
                }
                _ => {
                    return Err(ConfigError::Syntax {
                        line: number + 1,
                        message: format!("expected `key value`, got {line:?}"),
                    })
                }
            }
        }
        Self::from_pairs(pairs)
    }

    /// Checks the cross-option rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing every failed rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.id.is_empty() {
            errors.push("id must not be empty".to_string());
        }
        if self.use_single_key && self.single_key.is_empty() {
            errors.push("single_key is required when use_single_key is true".to_string());
        }
        if let Err(e) = validate_timezone(&self.time_zone) {
            errors.push(format!("time_zone: {e}"));
        }
        if self.s3_bucket.is_empty() {
            errors.push("s3_bucket is required".to_string());
        }
        if self.s3_region.is_empty() {
            errors.push("s3_region is required".to_string());
        }
        if let Some(arn) = &self.role_arn {
            if !arn.starts_with("arn:aws:iam") {
                errors.push(format!("role_arn {arn:?} must start with arn:aws:iam"));
            }
        }
        if self.use_disk_buffer && self.disk_buffer_path.as_os_str().is_empty() {
            errors.push("disk_buffer_path is required when use_disk_buffer is true".to_string());
        }
        if self.upload_size_mb == 0 {
            errors.push("upload_size_mb must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { errors })
        }
    }
}

struct ConfigOption {
    key: &'static str,
    apply: fn(&mut Config, &str) -> Result<(), String>,
}

static OPTIONS: &[ConfigOption] = &[
    ConfigOption { key: "id", apply: set_id },
    ConfigOption { key: "use_single_key", apply: set_use_single_key },
    ConfigOption { key: "allow_missing_key", apply: set_allow_missing_key },
    ConfigOption { key: "single_key", apply: set_single_key },
    ConfigOption { key: "time_zone", apply: set_time_zone },
    ConfigOption { key: "s3_bucket", apply: set_s3_bucket },
    ConfigOption { key: "s3_bucket_prefix", apply: set_s3_bucket_prefix },
    ConfigOption { key: "s3_region", apply: set_s3_region },
    ConfigOption { key: "role_arn", apply: set_role_arn },
    ConfigOption { key: "use_disk_buffer", apply: set_use_disk_buffer },
    ConfigOption { key: "disk_buffer_path", apply: set_disk_buffer_path },
    ConfigOption { key: "upload_size_mb", apply: set_upload_size_mb },
];

fn set_id(c: &mut Config, v: &str) -> Result<(), String> {
    c.id = v.to_string();
    Ok(())
}

fn set_use_single_key(c: &mut Config, v: &str) -> Result<(), String> {
    c.use_single_key = parse_bool(v)?;
    Ok(())
}

fn set_allow_missing_key(c: &mut Config, v: &str) -> Result<(), String> {
    c.allow_missing_key = parse_bool(v)?;
    Ok(())
}

fn set_single_key(c: &mut Config, v: &str) -> Result<(), String> {
    c.single_key = v.to_string();
    Ok(())
}

fn set_time_zone(c: &mut Config, v: &str) -> Result<(), String> {
    c.time_zone = v.to_string();
    Ok(())
}

fn set_s3_bucket(c: &mut Config, v: &str) -> Result<(), String> {
    c.s3_bucket = v.to_string();
    Ok(())
}

fn set_s3_bucket_prefix(c: &mut Config, v: &str) -> Result<(), String> {
    c.s3_bucket_prefix = v.to_string();
    Ok(())
}

fn set_s3_region(c: &mut Config, v: &str) -> Result<(), String> {
    c.s3_region = v.to_string();
    Ok(())
}

fn set_role_arn(c: &mut Config, v: &str) -> Result<(), String> {
    c.role_arn = (!v.is_empty()).then(|| v.to_string());
    Ok(())
}

fn set_use_disk_buffer(c: &mut Config, v: &str) -> Result<(), String> {
    c.use_disk_buffer = parse_bool(v)?;
    Ok(())
}

fn set_disk_buffer_path(c: &mut Config, v: &str) -> Result<(), String> {
    c.disk_buffer_path = PathBuf::from(v);
    Ok(())
}

fn set_upload_size_mb(c: &mut Config, v: &str) -> Result<(), String> {
    c.upload_size_mb = v
        .parse()
        .map_err(|_| format!("{v:?} is not a whole number of MiB"))?;
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(format!("{value:?} is not a boolean")),
    }
}
