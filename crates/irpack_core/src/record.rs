//! Structured log records and their conversion to IR events.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::upload::epoch_millis;
use irpack_codec::LogEvent;
use serde_json::{Map, Value};
use std::time::SystemTime;

/// Field holding the timestamp in newline-delimited JSON input.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// A log record as delivered by the host: a timestamp and a map of fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Event time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Record fields.
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates a record.
    #[must_use]
    pub fn new(timestamp_ms: i64, fields: Map<String, Value>) -> Self {
        Self {
            timestamp_ms,
            fields,
        }
    }

    /// Creates a record with a single `key: message` string field.
    #[must_use]
    pub fn with_message(timestamp_ms: i64, key: &str, message: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(key.to_string(), Value::String(message.into()));
        Self::new(timestamp_ms, fields)
    }

    /// Parses one line of newline-delimited JSON.
    ///
    /// The line must be an object. A numeric `timestamp` field is taken as
    /// the event time in milliseconds and removed from the fields; without
    /// one, the current time is used.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRecord`] for malformed JSON, non-objects,
    /// or a `timestamp` that is not an integer.
    pub fn from_json_line(line: &str) -> CoreResult<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| CoreError::invalid_record(format!("bad JSON: {e}")))?;
        let Value::Object(mut fields) = value else {
            return Err(CoreError::invalid_record("record is not a JSON object"));
        };

        let timestamp_ms = match fields.remove(TIMESTAMP_FIELD) {
            None => epoch_millis(SystemTime::now()),
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| CoreError::invalid_record(format!("timestamp {n} is not an integer")))?,
            Some(other) => {
                return Err(CoreError::invalid_record(format!(
                    "timestamp must be a number, got {other}"
                )))
            }
        };

        Ok(Self::new(timestamp_ms, fields))
    }

    /// Converts the record to an IR event according to the single-key
    /// settings of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingKey`] if the single key is absent and
    /// missing keys are not allowed.
    pub fn to_event(&self, config: &Config) -> CoreResult<LogEvent> {
        if !config.use_single_key {
            return Ok(LogEvent::new(self.timestamp_ms, self.fields_json()));
        }

        match self.fields.get(&config.single_key) {
            Some(Value::String(message)) => Ok(LogEvent::new(self.timestamp_ms, message.clone())),
            Some(other) => Ok(LogEvent::new(self.timestamp_ms, other.to_string())),
            None if config.allow_missing_key => {
                Ok(LogEvent::new(self.timestamp_ms, self.fields_json()))
            }
            None => Err(CoreError::MissingKey {
                key: config.single_key.clone(),
            }),
        }
    }

    fn fields_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }
}
