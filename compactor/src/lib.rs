//! Offline deduplication of the partitioned dataset.
//!
//! Ingestion only deduplicates within a batch; re-delivered batches after a
//! crash (and producers that repeat themselves) leave cross-file duplicates
//! behind. Compaction rewrites a partition keeping the first occurrence of
//! every `record_id`, which makes re-running ingest always safe.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use arrow::array::{Array, BooleanArray, StringArray};
use arrow::compute::{cast, filter_record_batch};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use observability_deps::tracing::info;
use parquet_file::dataset::list_parquet_files;
use parquet_file::reader::{align_to_schema, concat_aligned, read_file};
use parquet_file::writer::write_batch;
use parquet_file::Codec;
use snafu::{ResultExt, Snafu};
use std::collections::HashSet;
use std::path::Path;

/// Default id column for deduplication.
pub const DEFAULT_ID_COLUMN: &str = "record_id";

/// Errors for compaction.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Cannot scan partition: {}", source))]
    Scan {
        source: parquet_file::dataset::Error,
    },

    #[snafu(display("Cannot read partition file: {}", source))]
    ReadFile {
        source: parquet_file::reader::Error,
    },

    #[snafu(display("Id column {:?} not present in the data", column))]
    IdColumnMissing { column: String },

    #[snafu(display("Cannot evaluate dedup mask: {}", source))]
    DedupMask { source: arrow::error::ArrowError },

    #[snafu(display("Cannot write deduplicated file: {}", source))]
    WriteFile {
        source: parquet_file::writer::Error,
    },

    #[snafu(display("Cannot remove {}: {}", path, source))]
    RemoveFile {
        path: String,
        source: std::io::Error,
    },
}

/// A specialized `Result` for compaction errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Outcome of a single-file dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DedupReport {
    /// Rows read.
    pub total: u64,
    /// Rows kept.
    pub unique: u64,
    /// Rows dropped as duplicates.
    pub removed: u64,
}

/// Outcome of a partition dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionDedupReport {
    /// Rows read across all files.
    pub total: u64,
    /// Rows kept.
    pub unique: u64,
    /// Rows dropped as duplicates.
    pub removed: u64,
    /// Files read (and, in place, replaced).
    pub files_processed: u64,
}

/// Deduplicate one file into `output`, keeping the first occurrence per
/// `id_column` value.
pub fn dedup_file(input: &Path, output: &Path, id_column: &str) -> Result<DedupReport> {
    let batches = read_file(input).context(ReadFileSnafu)?;
    let combined = combine(batches)?;
    let (deduped, report) = keep_first(combined, id_column)?;

    write_batch(output, &deduped, Codec::Snappy).context(WriteFileSnafu)?;
    info!(
        input=%input.display(),
        output=%output.display(),
        removed=report.removed,
        "deduplicated file",
    );
    Ok(report)
}

/// Deduplicate a whole partition directory.
///
/// In place, the originals are dropped and replaced by a single
/// `part-0.parquet`; otherwise the result lands in a sibling
/// `<name>_dedup/` directory. Re-running is a no-op: one file, zero
/// removals.
pub fn dedup_partition(
    partition_dir: &Path,
    id_column: &str,
    in_place: bool,
) -> Result<PartitionDedupReport> {
    let files = list_parquet_files(partition_dir).context(ScanSnafu)?;
    if files.is_empty() {
        return Ok(PartitionDedupReport::default());
    }

    let mut batches = Vec::new();
    for file in &files {
        batches.extend(read_file(file).context(ReadFileSnafu)?);
    }
    let combined = combine(batches)?;
    let (deduped, file_report) = keep_first(combined, id_column)?;

    let output = if in_place {
        for file in &files {
            std::fs::remove_file(file).context(RemoveFileSnafu {
                path: file.display().to_string(),
            })?;
        }
        partition_dir.join("part-0.parquet")
    } else {
        let name = partition_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "partition".to_string());
        partition_dir
            .parent()
            .unwrap_or(partition_dir)
            .join(format!("{name}_dedup"))
            .join("part-0.parquet")
    };
    write_batch(&output, &deduped, Codec::Snappy).context(WriteFileSnafu)?;

    info!(
        partition=%partition_dir.display(),
        files=files.len(),
        removed=file_report.removed,
        in_place,
        "deduplicated partition",
    );
    Ok(PartitionDedupReport {
        total: file_report.total,
        unique: file_report.unique,
        removed: file_report.removed,
        files_processed: files.len() as u64,
    })
}

/// Merge possibly-divergent batches into one, widening schemas as needed.
fn combine(batches: Vec<RecordBatch>) -> Result<RecordBatch> {
    let logical: Vec<schema::Schema> = batches
        .iter()
        .map(|b| schema::Schema::from_arrow(&b.schema()))
        .collect();
    let merged = schema::merge_schemas(&logical)
        .unwrap_or_else(|_| schema::message_schema())
        .to_arrow();

    let aligned: Vec<RecordBatch> = batches
        .iter()
        .map(|b| align_to_schema(b, &merged))
        .collect::<std::result::Result<_, _>>()
        .context(ReadFileSnafu)?;
    concat_aligned(&merged, &aligned).context(ReadFileSnafu)
}

/// Keep-first filter on `id_column`.
fn keep_first(batch: RecordBatch, id_column: &str) -> Result<(RecordBatch, DedupReport)> {
    let column = batch
        .column_by_name(id_column)
        .ok_or_else(|| Error::IdColumnMissing {
            column: id_column.to_string(),
        })?;

    let ids = cast(column, &DataType::Utf8).context(DedupMaskSnafu)?;
    let ids = ids
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("cast to Utf8 yields StringArray");

    let mut seen: HashSet<String> = HashSet::new();
    let mask: Vec<bool> = (0..ids.len())
        .map(|i| {
            if ids.is_null(i) {
                // Null ids cannot collide; keep them.
                true
            } else {
                seen.insert(ids.value(i).to_string())
            }
        })
        .collect();

    let total = batch.num_rows() as u64;
    let deduped =
        filter_record_batch(&batch, &BooleanArray::from(mask)).context(DedupMaskSnafu)?;
    let unique = deduped.num_rows() as u64;

    Ok((
        deduped,
        DedupReport {
            total,
            unique,
            removed: total - unique,
        },
    ))
}
