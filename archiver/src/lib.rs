//! Tier-down archival.
//!
//! Partitions past the age threshold are re-encoded file by file with a
//! stronger codec into a mirrored tree under the archive root. A source
//! partition is only removed after its archived files are verified, so a
//! failure mid-partition leaves the source intact; re-running overwrites
//! the partially-written archive files and completes the move.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use chrono::Duration;
use observability_deps::tracing::info;
use parquet_file::dataset::{list_parquet_files, scan_partition_dirs};
use parquet_file::reader::{concat_aligned, read_file};
use parquet_file::writer::write_batch;
use parquet_file::Codec;
use snafu::{ResultExt, Snafu};
use std::path::Path;
use vault_time::TimeProvider;

/// The archive tier's default codec.
pub const DEFAULT_ARCHIVE_CODEC: Codec = Codec::Zstd { level: 19 };

/// Errors for archival invocations.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Dataset root not found: {}", path))]
    RootNotFound { path: String },

    #[snafu(display("Cannot scan dataset: {}", source))]
    Scan {
        source: parquet_file::dataset::Error,
    },

    #[snafu(display("Cannot read partition file: {}", source))]
    ReadFile {
        source: parquet_file::reader::Error,
    },

    #[snafu(display("Cannot write archive file: {}", source))]
    WriteArchive {
        source: parquet_file::writer::Error,
    },

    #[snafu(display("Archive verification failed for {}", path))]
    VerifyArchive { path: String },

    #[snafu(display("Cannot remove archived source partition {}: {}", path, source))]
    RemoveSource {
        path: String,
        source: std::io::Error,
    },
}

/// A specialized `Result` for archival errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Outcome of one [`archive_partitions`] run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ArchiveReport {
    /// Partitions moved into the archive tier.
    pub archived_partitions: u64,
    /// Source bytes, in MiB.
    pub size_before_mb: f64,
    /// Archived bytes, in MiB.
    pub size_after_mb: f64,
    /// `size_before / size_after`; 0 when nothing was archived.
    pub compression_ratio: f64,
}

/// Move every partition strictly older than `older_than_days` into
/// `archive_root`, re-encoding each file with `codec`.
pub fn archive_partitions(
    partitioned_root: &Path,
    archive_root: &Path,
    older_than_days: u32,
    codec: Codec,
    time_provider: &dyn TimeProvider,
) -> Result<ArchiveReport> {
    if !partitioned_root.is_dir() {
        return RootNotFoundSnafu {
            path: partitioned_root.display().to_string(),
        }
        .fail();
    }

    let threshold = time_provider.now().date_time() - Duration::days(older_than_days as i64);
    let mut report = ArchiveReport::default();
    let mut size_before: u64 = 0;
    let mut size_after: u64 = 0;

    for partition in scan_partition_dirs(partitioned_root).context(ScanSnafu)? {
        let old_enough = partition
            .key
            .naive_date()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc() < threshold)
            .unwrap_or(false);
        if !old_enough {
            continue;
        }

        let files = list_parquet_files(&partition.path).context(ScanSnafu)?;
        if files.is_empty() {
            continue;
        }

        let partition_before: u64 = files
            .iter()
            .map(|f| f.metadata().map(|m| m.len()).unwrap_or(0))
            .sum();

        let archive_dir = partition.key.path_under(archive_root);
        for file in &files {
            let batches = read_file(file).context(ReadFileSnafu)?;
            let schema = batches
                .first()
                .map(|b| b.schema())
                .unwrap_or_else(|| arrow_schema_of(file));
            let combined = concat_aligned(&schema, &batches).context(ReadFileSnafu)?;

            let target = archive_dir.join(file.file_name().expect("parquet files have names"));
            write_batch(&target, &combined, codec).context(WriteArchiveSnafu)?;
        }

        // Only drop the source once every archived file is really there.
        let archived = list_parquet_files(&archive_dir).context(ScanSnafu)?;
        if archived.len() < files.len() {
            return VerifyArchiveSnafu {
                path: archive_dir.display().to_string(),
            }
            .fail();
        }
        let partition_after: u64 = archived
            .iter()
            .map(|f| f.metadata().map(|m| m.len()).unwrap_or(0))
            .sum();

        std::fs::remove_dir_all(&partition.path).context(RemoveSourceSnafu {
            path: partition.path.display().to_string(),
        })?;

        size_before += partition_before;
        size_after += partition_after;
        report.archived_partitions += 1;
        info!(
            partition=%partition.key.to_string(),
            size_before=partition_before,
            size_after=partition_after,
            "partition archived",
        );
    }

    report.size_before_mb = size_before as f64 / 1024.0 / 1024.0;
    report.size_after_mb = size_after as f64 / 1024.0 / 1024.0;
    report.compression_ratio = if size_after > 0 {
        size_before as f64 / size_after as f64
    } else {
        0.0
    };

    info!(
        archived_partitions = report.archived_partitions,
        compression_ratio = report.compression_ratio,
        "archive run finished",
    );
    Ok(report)
}

// Fallback for a file that decodes to zero batches: keep its schema.
fn arrow_schema_of(file: &Path) -> arrow::datatypes::SchemaRef {
    parquet_file::metadata::read_arrow_schema(file)
        .unwrap_or_else(|_| schema_of_nothing())
}

fn schema_of_nothing() -> arrow::datatypes::SchemaRef {
    std::sync::Arc::new(arrow::datatypes::Schema::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::PartitionKey;
    use std::sync::Arc;
    use test_helpers::{maybe_start_logging, tmp_dir};
    use vault_time::{MockProvider, Time};

    struct Fixture {
        _guard: tempfile::TempDir,
        root: std::path::PathBuf,
        archive: std::path::PathBuf,
        // Clock pinned at 2024-06-01T00:00:00Z.
        time_provider: Arc<MockProvider>,
    }

    impl Fixture {
        fn new() -> Self {
            maybe_start_logging();
            let guard = tmp_dir();
            let root = guard.path().join("parquet");
            std::fs::create_dir_all(&root).unwrap();
            Self {
                archive: guard.path().join("archive"),
                _guard: guard,
                root,
                time_provider: Arc::new(MockProvider::new(
                    Time::from_timestamp(1717200000).unwrap(),
                )),
            }
        }

        /// A partition full of repetitive rows, so the stronger codec has
        /// something to chew on.
        fn add_partition(&self, year: i32, month: u32, day: u32, event_time: i64) {
            let key = PartitionKey { year, month, day };
            let records: Vec<_> = (0..500)
                .map(|i| {
                    let mut r = test_helpers::cleaned_record(&format!("m{i}"), event_time);
                    // Unique per row (defeats dictionary encoding) but
                    // internally repetitive, so the stronger codec wins.
                    r.content = format!(
                        "{i} {}",
                        "the quick brown fox jumps over the lazy dog ".repeat(20)
                    );
                    r
                })
                .collect();
            let batch = parquet_file::writer::records_to_batch(
                &records,
                &schema::message_schema(),
            )
            .unwrap();
            parquet_file::writer::write_batch(
                &key.path_under(&self.root).join("part-0.parquet"),
                &batch,
                Codec::Snappy,
            )
            .unwrap();
        }

        fn run(&self, older_than_days: u32) -> ArchiveReport {
            archive_partitions(
                &self.root,
                &self.archive,
                older_than_days,
                DEFAULT_ARCHIVE_CODEC,
                self.time_provider.as_ref(),
            )
            .unwrap()
        }
    }

    #[test]
    fn old_partition_moves_and_recompresses() {
        let fx = Fixture::new();
        // 2024-01-01 is well past 90 days before 2024-06-01.
        fx.add_partition(2024, 1, 1, 1704067200);

        let report = fx.run(90);
        assert_eq!(report.archived_partitions, 1);
        assert!(report.size_before_mb > 0.0);
        assert!(
            report.compression_ratio > 1.0,
            "zstd-19 must beat snappy here, got {}",
            report.compression_ratio
        );

        let archived = fx.archive.join("year=2024/month=01/day=01/part-0.parquet");
        assert!(archived.exists());
        assert!(!fx.root.join("year=2024/month=01/day=01").exists());

        // The data survives the recompression byte-for-row.
        let batches = read_file(&archived).unwrap();
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 500);
    }

    #[test]
    fn recent_partitions_stay_put() {
        let fx = Fixture::new();
        // 2024-05-20 is newer than the 90-day threshold.
        fx.add_partition(2024, 5, 20, 1716163200);

        let report = fx.run(90);
        assert_eq!(report.archived_partitions, 0);
        assert!(fx.root.join("year=2024/month=05/day=20").exists());
        assert!(!fx.archive.exists());
    }

    #[test]
    fn second_run_is_a_no_op() {
        let fx = Fixture::new();
        fx.add_partition(2024, 1, 1, 1704067200);

        let first = fx.run(90);
        assert_eq!(first.archived_partitions, 1);

        let second = fx.run(90);
        assert_eq!(second.archived_partitions, 0);
        assert_eq!(second.compression_ratio, 0.0);

        // Still exactly one archived copy.
        let archived = fx.archive.join("year=2024/month=01/day=01");
        assert_eq!(list_parquet_files(&archived).unwrap().len(), 1);
    }

    #[test]
    fn missing_root_is_an_error() {
        let fx = Fixture::new();
        let err = archive_partitions(
            &fx.root.join("absent"),
            &fx.archive,
            90,
            DEFAULT_ARCHIVE_CODEC,
            fx.time_provider.as_ref(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::RootNotFound { .. }));
    }
}
