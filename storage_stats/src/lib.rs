//! Scan-based metadata about the partitioned dataset: partition inventory,
//! size and row totals, age buckets and compression accounting. Everything
//! here is derived from a walk over the tree plus parquet footers; nothing
//! decodes data pages.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use chrono::Duration;
use data_types::PartitionKey;
use observability_deps::tracing::warn;
use parquet_file::dataset::{list_parquet_files, scan_partition_dirs};
use parquet_file::metadata::file_stats;
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use vault_time::TimeProvider;

/// Errors for stats scans.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Cannot scan dataset: {}", source))]
    Scan {
        source: parquet_file::dataset::Error,
    },

    #[snafu(display("Cannot list intake directory {}: {}", path, source))]
    ListIntake {
        path: String,
        source: std::io::Error,
    },
}

/// A specialized `Result` for stats errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Inventory entry for one materialized partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePartition {
    /// The partition's date key.
    pub key: PartitionKey,
    /// Partition directory.
    pub path: PathBuf,
    /// Parquet files inside.
    pub file_count: u64,
    /// Bytes on disk.
    pub total_size_bytes: u64,
    /// Rows, from the parquet footers.
    pub row_count: u64,
}

impl StoragePartition {
    /// Size in MiB.
    pub fn size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / 1024.0 / 1024.0
    }
}

/// Inventory every partition under `root`, chronologically.
///
/// A missing root is an empty inventory. Files whose footers cannot be read
/// still count toward size, with a warning, just not toward rows.
pub fn scan_partitions(root: &Path) -> Result<Vec<StoragePartition>> {
    if !root.is_dir() {
        return Ok(vec![]);
    }

    let mut partitions = Vec::new();
    for dir in scan_partition_dirs(root).context(ScanSnafu)? {
        let files = list_parquet_files(&dir.path).context(ScanSnafu)?;
        if files.is_empty() {
            continue;
        }

        let mut partition = StoragePartition {
            key: dir.key,
            path: dir.path,
            file_count: files.len() as u64,
            total_size_bytes: 0,
            row_count: 0,
        };
        for file in &files {
            partition.total_size_bytes += file.metadata().map(|m| m.len()).unwrap_or(0);
            match file_stats(file) {
                Ok(stats) => partition.row_count += stats.rows as u64,
                Err(e) => warn!(file=%file.display(), error=%e, "unreadable footer in stats scan"),
            }
        }
        partitions.push(partition);
    }
    Ok(partitions)
}

/// Dataset-wide roll-up.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize)]
pub struct PartitionStats {
    /// Partitions holding data.
    pub total_partitions: u64,
    /// Parquet files across all partitions.
    pub total_files: u64,
    /// Rows across all partitions.
    pub total_rows: u64,
    /// Bytes on disk.
    pub total_size_bytes: u64,
    /// Size in MiB.
    pub total_size_mb: f64,
    /// Earliest partition key, `YYYY-MM-DD`.
    pub earliest_partition: Option<String>,
    /// Latest partition key, `YYYY-MM-DD`.
    pub latest_partition: Option<String>,
}

/// Aggregate the partition inventory of `root`.
pub fn get_partition_stats(root: &Path) -> Result<PartitionStats> {
    let partitions = scan_partitions(root)?;
    let mut stats = PartitionStats {
        total_partitions: partitions.len() as u64,
        earliest_partition: partitions.first().map(|p| p.key.to_string()),
        latest_partition: partitions.last().map(|p| p.key.to_string()),
        ..Default::default()
    };
    for partition in &partitions {
        stats.total_files += partition.file_count;
        stats.total_rows += partition.row_count;
        stats.total_size_bytes += partition.total_size_bytes;
    }
    stats.total_size_mb = stats.total_size_bytes as f64 / 1024.0 / 1024.0;
    Ok(stats)
}

/// Partition counts bucketed by age.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct AgeDistribution {
    /// Partitions considered.
    pub total_partitions: u64,
    /// Bucket label (`0-7_days`, `8-30_days`, ...) to partition count.
    pub age_distribution: BTreeMap<String, u64>,
}

const AGE_BUCKETS: [(&str, i64); 6] = [
    ("0-7_days", 7),
    ("8-30_days", 30),
    ("31-90_days", 90),
    ("91-180_days", 180),
    ("181-365_days", 365),
    ("over_365_days", i64::MAX),
];

/// Bucket partitions by their age relative to `time_provider`.
pub fn get_partition_age_distribution(
    root: &Path,
    time_provider: &dyn TimeProvider,
) -> Result<AgeDistribution> {
    let partitions = scan_partitions(root)?;
    let mut distribution = AgeDistribution {
        total_partitions: partitions.len() as u64,
        age_distribution: AGE_BUCKETS
            .iter()
            .map(|(label, _)| (label.to_string(), 0))
            .collect(),
    };

    let now = time_provider.now().date_time();
    for partition in &partitions {
        let Some(date) = partition.key.naive_date() else {
            continue;
        };
        let midnight = date.and_hms_opt(0, 0, 0).expect("midnight exists").and_utc();
        let age_days = (now - midnight).num_days().max(0);

        let bucket = AGE_BUCKETS
            .iter()
            .find(|(_, limit)| age_days <= *limit)
            .map(|(label, _)| *label)
            .expect("the last bucket is unbounded");
        *distribution
            .age_distribution
            .get_mut(bucket)
            .expect("buckets prepopulated") += 1;
    }
    Ok(distribution)
}

/// Compressed-vs-uncompressed accounting from parquet row-group metadata.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize)]
pub struct CompressionStats {
    /// Partitions considered.
    pub total_partitions: u64,
    /// Sum of compressed row-group bytes, MiB.
    pub total_compressed_size_mb: f64,
    /// Sum of uncompressed row-group bytes, MiB.
    pub total_uncompressed_size_mb: f64,
    /// `uncompressed / compressed`; 1.0 when there is nothing to measure.
    pub average_compression_ratio: f64,
}

/// Compute compression accounting for the whole dataset.
pub fn get_compression_stats(root: &Path) -> Result<CompressionStats> {
    let partitions = scan_partitions(root)?;
    let mut compressed: i64 = 0;
    let mut uncompressed: i64 = 0;

    for partition in &partitions {
        for file in list_parquet_files(&partition.path).context(ScanSnafu)? {
            match file_stats(&file) {
                Ok(stats) => {
                    compressed += stats.compressed_bytes;
                    uncompressed += stats.uncompressed_bytes;
                }
                Err(e) => {
                    warn!(file=%file.display(), error=%e, "unreadable footer in compression scan")
                }
            }
        }
    }

    Ok(CompressionStats {
        total_partitions: partitions.len() as u64,
        total_compressed_size_mb: compressed as f64 / 1024.0 / 1024.0,
        total_uncompressed_size_mb: uncompressed as f64 / 1024.0 / 1024.0,
        average_compression_ratio: if compressed > 0 {
            uncompressed as f64 / compressed as f64
        } else {
            1.0
        },
    })
}

/// Intake directory roll-up.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize)]
pub struct IntakeUsage {
    /// Intake files present.
    pub total_files: u64,
    /// Bytes on disk.
    pub total_size_bytes: u64,
    /// Size in MiB.
    pub total_size_mb: f64,
}

/// Combined storage usage across the live dataset, the archive tier and
/// the raw intake directory.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize)]
pub struct StorageUsage {
    /// The live dataset.
    pub dataset: PartitionStats,
    /// The archive tier, when an archive root was given and exists.
    pub archive: Option<PartitionStats>,
    /// The intake directory, when given and existing.
    pub intake: Option<IntakeUsage>,
    /// Grand total, MiB.
    pub total_size_mb: f64,
}

/// Roll up usage across all storage tiers.
pub fn get_storage_usage(
    root: &Path,
    archive_root: Option<&Path>,
    intake_dir: Option<&Path>,
) -> Result<StorageUsage> {
    let dataset = get_partition_stats(root)?;
    let mut usage = StorageUsage {
        total_size_mb: dataset.total_size_mb,
        dataset,
        archive: None,
        intake: None,
    };

    if let Some(archive_root) = archive_root {
        if archive_root.is_dir() {
            let archive = get_partition_stats(archive_root)?;
            usage.total_size_mb += archive.total_size_mb;
            usage.archive = Some(archive);
        }
    }

    if let Some(intake_dir) = intake_dir {
        if intake_dir.is_dir() {
            let mut intake = IntakeUsage::default();
            let entries = std::fs::read_dir(intake_dir).context(ListIntakeSnafu {
                path: intake_dir.display().to_string(),
            })?;
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "jsonl") && path.is_file() {
                    intake.total_files += 1;
                    intake.total_size_bytes += path.metadata().map(|m| m.len()).unwrap_or(0);
                }
            }
            intake.total_size_mb = intake.total_size_bytes as f64 / 1024.0 / 1024.0;
            usage.total_size_mb += intake.total_size_mb;
            usage.intake = Some(intake);
        }
    }

    Ok(usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use test_helpers::{cleaned_record, maybe_start_logging, tmp_dir};
    use vault_time::{MockProvider, Time};

    fn add_partition(root: &Path, year: i32, month: u32, day: u32, rows: usize) {
        let key = PartitionKey { year, month, day };
        let records: Vec<_> = (0..rows)
            .map(|i| cleaned_record(&format!("{year}-{month}-{day}-{i}"), 1704067200))
            .collect();
        let batch =
            parquet_file::writer::records_to_batch(&records, &schema::message_schema()).unwrap();
        parquet_file::writer::write_batch(
            &key.path_under(root).join("part-0.parquet"),
            &batch,
            parquet_file::Codec::Snappy,
        )
        .unwrap();
    }

    #[test]
    fn inventory_counts_files_rows_and_bytes() {
        maybe_start_logging();
        let dir = tmp_dir();
        let root = dir.path().join("parquet");
        add_partition(&root, 2024, 1, 1, 3);
        add_partition(&root, 2024, 1, 2, 5);

        let partitions = scan_partitions(&root).unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].key.to_string(), "2024-01-01");
        assert_eq!(partitions[0].row_count, 3);
        assert_eq!(partitions[1].row_count, 5);
        assert!(partitions.iter().all(|p| p.total_size_bytes > 0));

        let stats = get_partition_stats(&root).unwrap();
        assert_eq!(stats.total_partitions, 2);
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_rows, 8);
        assert_eq!(stats.earliest_partition.as_deref(), Some("2024-01-01"));
        assert_eq!(stats.latest_partition.as_deref(), Some("2024-01-02"));
    }

    #[test]
    fn missing_root_is_an_empty_inventory() {
        let dir = tmp_dir();
        assert!(scan_partitions(&dir.path().join("absent")).unwrap().is_empty());
        let stats = get_partition_stats(&dir.path().join("absent")).unwrap();
        assert_eq!(stats.total_partitions, 0);
    }

    #[test]
    fn age_buckets_follow_the_mock_clock() {
        let dir = tmp_dir();
        let root = dir.path().join("parquet");
        // Clock: 2024-06-01. Ages: 2 days, 60 days, ~2.4 years.
        add_partition(&root, 2024, 5, 30, 1);
        add_partition(&root, 2024, 4, 2, 1);
        add_partition(&root, 2022, 1, 1, 1);

        let provider = MockProvider::new(Time::from_timestamp(1717200000).unwrap());
        let distribution = get_partition_age_distribution(&root, &provider).unwrap();

        assert_eq!(distribution.total_partitions, 3);
        assert_eq!(distribution.age_distribution["0-7_days"], 1);
        assert_eq!(distribution.age_distribution["31-90_days"], 1);
        assert_eq!(distribution.age_distribution["over_365_days"], 1);
        assert_eq!(distribution.age_distribution["8-30_days"], 0);
    }

    #[test]
    fn compression_accounting_reads_footers() {
        let dir = tmp_dir();
        let root = dir.path().join("parquet");
        add_partition(&root, 2024, 1, 1, 50);

        let stats = get_compression_stats(&root).unwrap();
        assert_eq!(stats.total_partitions, 1);
        assert!(stats.total_compressed_size_mb > 0.0);
        assert!(stats.total_uncompressed_size_mb >= stats.total_compressed_size_mb * 0.1);
        assert!(stats.average_compression_ratio > 0.0);
    }

    #[test]
    fn storage_usage_rolls_up_all_tiers() {
        let dir = tmp_dir();
        let root = dir.path().join("parquet");
        let archive = dir.path().join("archive");
        let intake_dir = dir.path().join("intake");
        add_partition(&root, 2024, 5, 1, 2);
        add_partition(&archive, 2023, 1, 1, 2);
        std::fs::create_dir_all(&intake_dir).unwrap();
        std::fs::write(intake_dir.join("2024-05-01.jsonl"), "{}\n{}\n").unwrap();

        let usage = get_storage_usage(&root, Some(&archive), Some(&intake_dir)).unwrap();
        assert_eq!(usage.dataset.total_partitions, 1);
        assert_eq!(usage.archive.as_ref().unwrap().total_partitions, 1);
        assert_eq!(usage.intake.as_ref().unwrap().total_files, 1);
        assert!(usage.total_size_mb >= usage.dataset.total_size_mb);

        // Absent optional tiers are simply not reported.
        let usage = get_storage_usage(&root, Some(&dir.path().join("nope")), None).unwrap();
        assert!(usage.archive.is_none());
        assert!(usage.intake.is_none());
    }
}
