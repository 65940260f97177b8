//! Append-only audit trail
//!
//! Every component records what it proposed, executed, cancelled or failed
//! as one JSON line per event. Configured fields are masked before the
//! record leaves the process. Loggers created with [`EventLogger::scoped`]
//! share the file and the write lock of their parent, so components can
//! each mask their own fields while appending to one trail.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use omnigate_config::Config;

/// Replacement written in place of masked string values
pub const MASK_PLACEHOLDER: &str = "[MASKED]";

/// Data fields a timeline row takes its target from, in priority order
const TARGET_FIELDS: &[&str] = &[
    "abs_path",
    "file",
    "target",
    "script_path",
    "project_path",
    "backup_path",
];

/// Data fields a timeline row takes its summary from, in priority order
const SUMMARY_FIELDS: &[&str] = &[
    "summary",
    "action",
    "status",
    "cmd",
    "commit_msg",
    "stdout_excerpt",
    "error",
];

/// One line of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// UTC timestamp, ISO-8601
    pub ts: String,
    pub event_type: String,
    pub system_version: String,
    pub tagging_version: String,
    pub data: Map<String, Value>,
}

/// Display row for the action timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineRow {
    pub timestamp: String,
    pub action: String,
    pub target: String,
    pub summary: String,
}

struct Sink {
    path: PathBuf,
    system_version: String,
    tagging_version: String,
    write_lock: Mutex<()>,
}

/// Thread-safe, PII-masking event logger
#[derive(Clone)]
pub struct EventLogger {
    sink: Arc<Sink>,
    mask_fields: Arc<HashSet<String>>,
}

impl std::fmt::Debug for EventLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogger")
            .field("path", &self.sink.path)
            .field("mask_fields", &self.mask_fields)
            .finish()
    }
}

impl EventLogger {
    /// Create a logger appending to `path` with default versions and no masking
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_versions(path, "1.0.0", "1.0.0")
    }

    pub fn with_versions(
        path: impl AsRef<Path>,
        system_version: impl Into<String>,
        tagging_version: impl Into<String>,
    ) -> Self {
        Self {
            sink: Arc::new(Sink {
                path: path.as_ref().to_path_buf(),
                system_version: system_version.into(),
                tagging_version: tagging_version.into(),
                write_lock: Mutex::new(()),
            }),
            mask_fields: Arc::new(HashSet::new()),
        }
    }

    /// Create the root logger described by the `logging` config section
    pub fn from_config(config: &Config) -> Self {
        Self::with_versions(
            config.log_path(),
            config.logging.system_version.clone(),
            config.logging.tagging_version.clone(),
        )
    }

    /// Sibling logger sharing this logger's file and lock, masking `fields`
    pub fn scoped<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sink: Arc::clone(&self.sink),
            mask_fields: Arc::new(fields.into_iter().map(Into::into).collect()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.sink.path
    }

    pub fn system_version(&self) -> &str {
        &self.sink.system_version
    }

    pub fn tagging_version(&self) -> &str {
        &self.sink.tagging_version
    }

    pub fn masks(&self, field: &str) -> bool {
        self.mask_fields.contains(field)
    }

    /// Build the record that `log` would write, masking configured fields
    pub fn record(&self, event_type: &str, data: Value) -> EventRecord {
        let mut data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        for (key, value) in data.iter_mut() {
            if self.mask_fields.contains(key) {
                *value = mask_value(value);
            }
        }
        EventRecord {
            ts: utc_now_iso(),
            event_type: event_type.to_string(),
            system_version: self.sink.system_version.clone(),
            tagging_version: self.sink.tagging_version.clone(),
            data,
        }
    }

    /// Append an event. Write failures are reported through tracing only.
    pub fn log(&self, event_type: &str, data: Value) {
        if let Err(e) = self.try_log(event_type, data) {
            warn!(
                "failed to append event {} to {:?}: {}",
                event_type, self.sink.path, e
            );
        }
    }

    /// Append an event, returning the written record
    pub fn try_log(&self, event_type: &str, data: Value) -> std::io::Result<EventRecord> {
        let record = self.record(event_type, data);
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self
            .sink
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.sink.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.sink.path)?;
        // One write per record keeps lines whole under O_APPEND
        file.write_all(line.as_bytes())?;
        debug!("event {}", record.event_type);
        Ok(record)
    }

    /// Rename the current log to `<log>.<YYYYMMDD_HHMMSS>`.
    ///
    /// Returns the rotated path, or `None` when there was nothing to rotate.
    pub fn rotate(&self) -> std::io::Result<Option<PathBuf>> {
        let _guard = self
            .sink
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.sink.path.exists() {
            return Ok(None);
        }
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let mut rotated = self.sink.path.clone().into_os_string();
        rotated.push(format!(".{}", stamp));
        let rotated = PathBuf::from(rotated);
        std::fs::rename(&self.sink.path, &rotated)?;
        Ok(Some(rotated))
    }

    /// Read every parseable record, skipping malformed lines
    pub fn read_records(&self) -> std::io::Result<Vec<EventRecord>> {
        if !self.sink.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.sink.path)?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if let Ok(record) = serde_json::from_str::<EventRecord>(&line) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// The last `max_rows` events as display rows
    pub fn read_timeline(&self, max_rows: usize) -> std::io::Result<Vec<TimelineRow>> {
        let records = self.read_records()?;
        let skip = records.len().saturating_sub(max_rows);
        Ok(records.iter().skip(skip).map(TimelineRow::from).collect())
    }
}

impl From<&EventRecord> for TimelineRow {
    fn from(record: &EventRecord) -> Self {
        Self {
            timestamp: record.ts.clone(),
            action: record.event_type.clone(),
            target: first_display_field(&record.data, TARGET_FIELDS),
            summary: first_display_field(&record.data, SUMMARY_FIELDS),
        }
    }
}

fn first_display_field(data: &Map<String, Value>, fields: &[&str]) -> String {
    fields
        .iter()
        .filter_map(|f| data.get(*f))
        .find_map(|v| match v {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
        .unwrap_or_default()
}

/// Mask a value: strings become the placeholder, containers are masked
/// element-wise, anything else becomes null.
pub fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(_) => Value::String(MASK_PLACEHOLDER.to_string()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), mask_value(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(mask_value).collect()),
        _ => Value::Null,
    }
}

/// Current UTC time as ISO-8601 with a `+00:00` offset
pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_display_field_priority() {
        let data = json!({"file": "b.txt", "abs_path": "/a.txt", "error": "boom"});
        let map = data.as_object().unwrap();
        assert_eq!(first_display_field(map, TARGET_FIELDS), "/a.txt");
        assert_eq!(first_display_field(map, SUMMARY_FIELDS), "boom");
    }

    #[test]
    fn test_first_display_field_skips_null_and_empty() {
        let data = json!({"abs_path": null, "file": "", "target": "t"});
        assert_eq!(
            first_display_field(data.as_object().unwrap(), TARGET_FIELDS),
            "t"
        );
    }

    #[test]
    fn test_first_display_field_stringifies_numbers() {
        let data = json!({"status": 404});
        assert_eq!(
            first_display_field(data.as_object().unwrap(), SUMMARY_FIELDS),
            "404"
        );
    }

    #[test]
    fn test_utc_now_iso_has_utc_offset() {
        assert!(utc_now_iso().ends_with("+00:00"));
    }
}
