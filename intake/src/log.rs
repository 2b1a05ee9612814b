//! Appending records to an intake file.
//!
//! One JSON object per line, UTF-8, `\n`-terminated, written in append mode
//! while the sibling `.lock` is held. No schema checks happen here;
//! anything malformed is caught (and logged) at ingestion.

use file_util::FileLock;
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Errors while appending to an intake file.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Cannot lock intake file {}: {}", path, source))]
    Lock {
        path: String,
        source: file_util::lock::Error,
    },

    #[snafu(display("Cannot create intake directory {}: {}", path, source))]
    CreateDir {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Cannot append to intake file {}: {}", path, source))]
    Append {
        path: String,
        source: std::io::Error,
    },
}

/// Result with an append [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The sibling lock path guarding `intake_path`.
pub fn lock_path(intake_path: &Path) -> PathBuf {
    let mut path = intake_path.as_os_str().to_owned();
    path.push(".lock");
    PathBuf::from(path)
}

/// Append one record as a single JSON line.
pub fn append_record(record: &Value, intake_path: &Path) -> Result<()> {
    append_records(std::slice::from_ref(record), intake_path)
}

/// Append several records under one held lock, one line each.
pub fn append_records(records: &[Value], intake_path: &Path) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let display = intake_path.display().to_string();

    let _lock = FileLock::acquire(&lock_path(intake_path)).context(LockSnafu {
        path: display.clone(),
    })?;

    if let Some(parent) = intake_path.parent() {
        std::fs::create_dir_all(parent).context(CreateDirSnafu {
            path: parent.display().to_string(),
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(intake_path)
        .context(AppendSnafu {
            path: display.clone(),
        })?;

    for record in records {
        // Value serialization cannot fail; compact one-line form.
        let line = serde_json::to_string(record).expect("JSON value serializes");
        file.write_all(line.as_bytes()).context(AppendSnafu {
            path: display.clone(),
        })?;
        file.write_all(b"\n").context(AppendSnafu {
            path: display.clone(),
        })?;
    }
    file.flush().context(AppendSnafu { path: display })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2026-01-23.jsonl");

        append_record(&json!({"record_id": "m1"}), &path).unwrap();
        append_record(&json!({"record_id": "m2"}), &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("m1"));
        assert!(lines[1].contains("m2"));
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn batch_append_writes_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intake/2026-01-23.jsonl");

        let records: Vec<_> = (0..5).map(|i| json!({"record_id": format!("m{i}")})).collect();
        append_records(&records, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 5);
    }

    #[test]
    fn lock_file_sits_next_to_the_intake_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2026-01-23.jsonl");

        append_record(&json!({}), &path).unwrap();
        assert!(dir.path().join("2026-01-23.jsonl.lock").exists());
    }
}
