//! Cleanup of intake files that have outlived their retention window.
//!
//! An intake file is only ever deleted when its date is older than the
//! retention cutoff AND the matching partition is durable (exists and holds
//! parquet data) AND nobody is holding the file open. Everything else is
//! skipped with its reason counted, so the report says exactly what
//! happened.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use chrono::{Duration, NaiveDate};
use data_types::PartitionKey;
use observability_deps::tracing::{error, info, warn};
use parquet_file::dataset::list_parquet_files;
use snafu::{ResultExt, Snafu};
use std::fs::OpenOptions;
use std::path::Path;
use vault_time::TimeProvider;

/// Errors for cleanup invocations.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Intake directory not found: {}", path))]
    IntakeDirNotFound { path: String },

    #[snafu(display("Dataset root not found: {}", path))]
    RootNotFound { path: String },

    #[snafu(display("Cannot list intake directory {}: {}", path, source))]
    ListDir {
        path: String,
        source: std::io::Error,
    },
}

/// A specialized `Result` for cleanup errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Outcome of one [`cleanup_intake`] run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CleanupReport {
    /// Intake files inspected.
    pub total_scanned: u64,
    /// Files actually deleted (always 0 under `dry_run`).
    pub deleted: u64,
    /// Old files kept because their partition is absent or empty.
    pub skipped_no_partition: u64,
    /// Old files kept because something holds them open.
    pub skipped_in_use: u64,
    /// Paths deleted, or that would be deleted under `dry_run`.
    pub deleted_files: Vec<String>,
}

/// Delete intake files older than `retention_days` whose partitions are
/// durable.
///
/// The date in the file name (`YYYY-MM-DD.jsonl`) is the retention bucket;
/// files newer than the cutoff are skipped silently, unparseable names are
/// logged and skipped. With `dry_run` nothing is removed and the candidate
/// paths are only reported.
pub fn cleanup_intake(
    intake_dir: &Path,
    partitioned_root: &Path,
    retention_days: u32,
    dry_run: bool,
    time_provider: &dyn TimeProvider,
) -> Result<CleanupReport> {
    if !intake_dir.is_dir() {
        return IntakeDirNotFoundSnafu {
            path: intake_dir.display().to_string(),
        }
        .fail();
    }
    if !partitioned_root.is_dir() {
        return RootNotFoundSnafu {
            path: partitioned_root.display().to_string(),
        }
        .fail();
    }

    let threshold = time_provider.now().date_time() - Duration::days(retention_days as i64);
    let mut report = CleanupReport::default();

    let mut entries: Vec<_> = std::fs::read_dir(intake_dir)
        .context(ListDirSnafu {
            path: intake_dir.display().to_string(),
        })?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "jsonl"))
        .collect();
    entries.sort();

    for intake_file in entries {
        report.total_scanned += 1;
        let name = intake_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let stem = intake_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_date = match NaiveDate::parse_from_str(&stem, "%Y-%m-%d") {
            Ok(date) => date,
            Err(_) => {
                warn!(file=%name, "cannot parse date from intake file name, skipping");
                continue;
            }
        };

        // Still within the retention window.
        let file_midnight = file_date.and_hms_opt(0, 0, 0).expect("midnight exists").and_utc();
        if file_midnight >= threshold {
            continue;
        }

        // The partition must be durable before its intake source may go.
        let key = PartitionKey {
            year: chrono::Datelike::year(&file_date),
            month: chrono::Datelike::month(&file_date),
            day: chrono::Datelike::day(&file_date),
        };
        let partition_dir = key.path_under(partitioned_root);
        let has_parquet = partition_dir.is_dir()
            && !list_parquet_files(&partition_dir)
                .map(|files| files.is_empty())
                .unwrap_or(true);
        if !has_parquet {
            report.skipped_no_partition += 1;
            warn!(file=%name, partition=%key.to_string(), "intake kept: partition not durable");
            continue;
        }

        // A writer still holding the file keeps it alive.
        if OpenOptions::new()
            .read(true)
            .write(true)
            .open(&intake_file)
            .is_err()
        {
            report.skipped_in_use += 1;
            warn!(file=%name, "intake kept: file is in use");
            continue;
        }

        if dry_run {
            report.deleted_files.push(intake_file.display().to_string());
            info!(file=%name, dry_run, "intake would be deleted");
            continue;
        }

        match std::fs::remove_file(&intake_file) {
            Ok(()) => {
                report.deleted += 1;
                report.deleted_files.push(intake_file.display().to_string());
                info!(file=%name, "intake deleted");
            }
            Err(e) => {
                error!(file=%name, error=%e, "intake delete failed");
            }
        }
    }

    info!(
        total_scanned = report.total_scanned,
        deleted = report.deleted,
        skipped_no_partition = report.skipped_no_partition,
        skipped_in_use = report.skipped_in_use,
        dry_run,
        "cleanup finished",
    );
    Ok(report)
}
