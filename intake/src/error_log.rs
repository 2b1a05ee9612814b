//! Structured skip log for records that cannot be ingested.
//!
//! Each handled error is one JSON object per line. Malformed records never
//! reach queries; this file is the only place they survive.

use observability_deps::tracing::warn;
use serde_json::{json, Value};
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use vault_time::TimeProvider;

/// Errors while writing or reading the error log itself.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Cannot write error log {}: {}", path, source))]
    WriteLog {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Cannot read error log {}: {}", path, source))]
    ReadLog {
        path: String,
        source: std::io::Error,
    },
}

/// Result with an error-log [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Taxonomy of per-record ingestion failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorKind {
    /// The line was not valid JSON.
    Parse,
    /// The record violated a value rule (bad or non-positive timestamp,
    /// uncoercible numeric field).
    Validation,
    /// The record is missing required fields.
    Schema,
}

impl ErrorKind {
    /// The wire name used in log entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse => "parse_error",
            Self::Validation => "validation_error",
            Self::Schema => "schema_error",
        }
    }
}

/// Maximum raw-data preview stored per parse error.
const RAW_PREVIEW_CHARS: usize = 500;

/// Append-only JSON-lines log of skipped records.
#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    time_provider: Arc<dyn TimeProvider>,
}

impl ErrorLog {
    /// Bind a log to `path`; the file and its parent directory are created
    /// on first write.
    pub fn new(path: impl Into<PathBuf>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            path: path.into(),
            time_provider,
        }
    }

    /// Record a line that failed to parse as JSON.
    pub fn parse_error(
        &self,
        raw: &str,
        error: impl std::fmt::Display,
        line_number: Option<u64>,
    ) -> Result<()> {
        let preview: String = raw.chars().take(RAW_PREVIEW_CHARS).collect();
        warn!(
            line_number,
            error=%error,
            "parse error: line skipped",
        );
        self.append(json!({
            "error_type": ErrorKind::Parse.as_str(),
            "error_message": error.to_string(),
            "line_number": line_number,
            "raw_data": preview,
            "timestamp": self.time_provider.now().to_rfc3339(),
        }))
    }

    /// Record a record dropped for violating a value rule.
    pub fn validation_error(
        &self,
        record: &Value,
        reason: impl std::fmt::Display,
        record_id: Option<&str>,
    ) -> Result<()> {
        warn!(record_id, reason=%reason, "validation error: record skipped");
        self.append(json!({
            "error_type": ErrorKind::Validation.as_str(),
            "error_message": reason.to_string(),
            "record_id": record_id,
            "record": record,
            "timestamp": self.time_provider.now().to_rfc3339(),
        }))
    }

    /// Record a record dropped for missing required fields.
    pub fn schema_error(&self, record: &Value, missing_fields: &[&str]) -> Result<()> {
        warn!(?missing_fields, "schema error: record skipped");
        self.append(json!({
            "error_type": ErrorKind::Schema.as_str(),
            "error_message": format!("missing required fields: {}", missing_fields.join(", ")),
            "missing_fields": missing_fields,
            "record": record,
            "timestamp": self.time_provider.now().to_rfc3339(),
        }))
    }

    /// Total number of logged errors.
    pub fn count(&self) -> Result<u64> {
        if !self.path.exists() {
            return Ok(0);
        }
        let file = std::fs::File::open(&self.path).context(ReadLogSnafu {
            path: self.path.display().to_string(),
        })?;
        let mut count = 0;
        for line in BufReader::new(file).lines() {
            line.context(ReadLogSnafu {
                path: self.path.display().to_string(),
            })?;
            count += 1;
        }
        Ok(count)
    }

    /// Error counts keyed by taxonomy kind. Unparseable entries are skipped.
    pub fn count_by_kind(&self) -> Result<BTreeMap<String, u64>> {
        let mut counts = BTreeMap::new();
        if !self.path.exists() {
            return Ok(counts);
        }

        let file = std::fs::File::open(&self.path).context(ReadLogSnafu {
            path: self.path.display().to_string(),
        })?;
        for line in BufReader::new(file).lines() {
            let line = line.context(ReadLogSnafu {
                path: self.path.display().to_string(),
            })?;
            let Ok(entry) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let kind = entry
                .get("error_type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            *counts.entry(kind).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn append(&self, entry: Value) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context(WriteLogSnafu {
                path: parent.display().to_string(),
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context(WriteLogSnafu {
                path: self.path.display().to_string(),
            })?;
        let line = serde_json::to_string(&entry).expect("JSON value serializes");
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .context(WriteLogSnafu {
                path: self.path.display().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_time::{MockProvider, Time};

    fn error_log(dir: &std::path::Path) -> ErrorLog {
        ErrorLog::new(
            dir.join("errors/skipped.jsonl"),
            Arc::new(MockProvider::new(Time::from_timestamp(1737590400).unwrap())),
        )
    }

    #[test]
    fn entries_carry_taxonomy_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let log = error_log(dir.path());

        log.parse_error("not json", "expected value", Some(2)).unwrap();
        log.validation_error(&json!({"record_id": "m1"}), "event_time <= 0", Some("m1"))
            .unwrap();
        log.schema_error(&json!({}), &["record_id"]).unwrap();

        assert_eq!(log.count().unwrap(), 3);
        let by_kind = log.count_by_kind().unwrap();
        assert_eq!(by_kind.get("parse_error"), Some(&1));
        assert_eq!(by_kind.get("validation_error"), Some(&1));
        assert_eq!(by_kind.get("schema_error"), Some(&1));

        let content = std::fs::read_to_string(dir.path().join("errors/skipped.jsonl")).unwrap();
        for line in content.lines() {
            let entry: Value = serde_json::from_str(line).unwrap();
            assert_eq!(entry["timestamp"], "2025-01-23T00:00:00Z");
        }
    }

    #[test]
    fn raw_preview_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let log = error_log(dir.path());

        let long = "x".repeat(2000);
        log.parse_error(&long, "nope", None).unwrap();

        let content = std::fs::read_to_string(dir.path().join("errors/skipped.jsonl")).unwrap();
        let entry: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(entry["raw_data"].as_str().unwrap().len(), 500);
    }

    #[test]
    fn counts_on_missing_log_are_zero() {
        let dir = tempfile::tempdir().unwrap();
        let log = error_log(dir.path());
        assert_eq!(log.count().unwrap(), 0);
        assert!(log.count_by_kind().unwrap().is_empty());
    }
}
