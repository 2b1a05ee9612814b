//! Analytical queries over the partitioned message dataset.
//!
//! A query resolves its date range to partition directories first
//! (partition pruning), pushes an exact row predicate plus the caller's
//! equality filters into the parquet reader, projects only the requested
//! columns, merges divergent file schemas to a null-filled superset, and
//! re-checks `event_time` at row level on the way out.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use arrow::array::{BooleanArray, Int64Array};
use arrow::compute::{cast, filter_record_batch};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use observability_deps::tracing::{debug, info};
use parquet_file::dataset::{self, PartitionDir};
use parquet_file::reader::{align_to_schema, concat_aligned, read_file_filtered, Predicate};
use schema::{merge_schemas, message_schema, FieldType};
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::path::Path;

/// Errors for query invocations.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Invalid date {:?} (expected YYYY-MM-DD): {}", input, source))]
    InvalidDate {
        input: String,
        source: chrono::ParseError,
    },

    #[snafu(display("Dataset root not found: {}", path))]
    RootNotFound { path: String },

    #[snafu(display("Cannot scan dataset: {}", source))]
    Scan {
        source: parquet_file::dataset::Error,
    },

    #[snafu(display("Cannot read dataset file: {}", source))]
    ReadFile {
        source: parquet_file::reader::Error,
    },

    #[snafu(display("Cannot merge file schemas: {}", source))]
    MergeSchemas { source: schema::merge::Error },

    #[snafu(display("Cannot evaluate row filter: {}", source))]
    RowFilter { source: arrow::error::ArrowError },
}

/// A specialized `Result` for query errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An exact-match filter value for one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    /// Match a string column.
    Str(String),
    /// Match an integer (or timestamp) column.
    Int(i64),
}

/// Query records whose `event_time` falls within `[start_date, end_date]`
/// (inclusive, `YYYY-MM-DD`, UTC).
///
/// `filters` adds exact-match conditions per column; `columns` projects the
/// output (`None` keeps everything). An empty result is a success and
/// comes back as an empty batch with the expected schema.
pub fn query(
    start_date: &str,
    end_date: &str,
    root: &Path,
    filters: &BTreeMap<String, FilterValue>,
    columns: Option<&[String]>,
) -> Result<RecordBatch> {
    let start = parse_date(start_date)?;
    let end = parse_date(end_date)?;

    let partitions = prune_partitions(root, start, end)?;
    debug!(
        start_date,
        end_date,
        partitions = partitions.len(),
        "resolved partition set",
    );

    let start_epoch = start.and_hms_opt(0, 0, 0).expect("midnight exists").and_utc().timestamp();
    let end_epoch = end
        .and_hms_opt(23, 59, 59)
        .expect("end of day exists")
        .and_utc()
        .timestamp();

    let mut predicates = vec![Predicate::TimeRange {
        column: "event_time".to_string(),
        min: start_epoch,
        max: end_epoch,
    }];
    for (column, value) in filters {
        predicates.push(match value {
            FilterValue::Str(s) => Predicate::EqString {
                column: column.clone(),
                value: s.clone(),
            },
            FilterValue::Int(i) => Predicate::EqInt {
                column: column.clone(),
                value: *i,
            },
        });
    }

    let mut files = Vec::new();
    for partition in &partitions {
        files.extend(dataset::list_parquet_files(&partition.path).context(ScanSnafu)?);
    }

    let batch = read_and_merge(&files, columns, &predicates)?;
    let batch = refilter_event_time(batch, start_epoch, end_epoch)?;

    info!(
        start_date,
        end_date,
        rows = batch.num_rows(),
        "query completed",
    );
    Ok(batch)
}

/// Fetch records by id, scanning the whole dataset with a set-membership
/// predicate on `record_id`.
pub fn query_by_id(
    record_ids: &[String],
    root: &Path,
    columns: Option<&[String]>,
) -> Result<RecordBatch> {
    ensure_root(root)?;

    let files = dataset::walk_parquet_files(root).context(ScanSnafu)?;
    let predicates = vec![Predicate::InSet {
        column: "record_id".to_string(),
        values: record_ids.iter().cloned().collect(),
    }];

    let batch = read_and_merge(&files, columns, &predicates)?;
    info!(ids = record_ids.len(), rows = batch.num_rows(), "query by id completed");
    Ok(batch)
}

fn parse_date(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input, "%Y-%m-%d").context(InvalidDateSnafu { input })
}

fn ensure_root(root: &Path) -> Result<()> {
    if !root.is_dir() {
        return RootNotFoundSnafu {
            path: root.display().to_string(),
        }
        .fail();
    }
    Ok(())
}

fn prune_partitions(root: &Path, start: NaiveDate, end: NaiveDate) -> Result<Vec<PartitionDir>> {
    ensure_root(root)?;
    let all = match dataset::scan_partition_dirs(root) {
        Ok(all) => all,
        Err(parquet_file::dataset::Error::RootNotFound { path }) => {
            return RootNotFoundSnafu { path }.fail()
        }
        Err(source) => return Err(Error::Scan { source }),
    };

    Ok(all
        .into_iter()
        .filter(|p| {
            p.key
                .naive_date()
                .map(|d| d >= start && d <= end)
                .unwrap_or(false)
        })
        .collect())
}

/// Read every file with the same projection and predicates, then merge the
/// (possibly divergent) file schemas into a superset and concatenate with
/// null-fill.
fn read_and_merge(
    files: &[std::path::PathBuf],
    columns: Option<&[String]>,
    predicates: &[Predicate],
) -> Result<RecordBatch> {
    let mut batches = Vec::new();
    for file in files {
        batches.extend(read_file_filtered(file, columns, predicates).context(ReadFileSnafu)?);
    }
    let batches: Vec<RecordBatch> = batches.into_iter().filter(|b| b.num_rows() > 0).collect();

    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(empty_result_schema(columns)));
    }

    let logical: Vec<schema::Schema> = batches
        .iter()
        .map(|b| schema::Schema::from_arrow(&b.schema()))
        .collect();
    let merged = merge_schemas(&logical).context(MergeSchemasSnafu)?.to_arrow();

    let aligned: Vec<RecordBatch> = batches
        .iter()
        .map(|b| align_to_schema(b, &merged))
        .collect::<std::result::Result<_, _>>()
        .context(ReadFileSnafu)?;

    concat_aligned(&merged, &aligned).context(ReadFileSnafu)
}

/// The schema an empty result reports: the default message schema projected
/// onto the requested columns (unknown names read as string).
fn empty_result_schema(columns: Option<&[String]>) -> SchemaRef {
    let base = message_schema();
    match columns {
        None => base.to_arrow(),
        Some(names) => schema::Schema::new(
            names
                .iter()
                .map(|name| {
                    let field_type = base
                        .field(name)
                        .map(|f| f.field_type)
                        .unwrap_or(FieldType::String);
                    schema::Field::new(name, field_type)
                })
                .collect(),
        )
        .to_arrow(),
    }
}

/// Exact row-level `event_time` check after the pushed-down read; defends
/// the boundary days against any over-matching by partition pruning.
fn refilter_event_time(batch: RecordBatch, min: i64, max: i64) -> Result<RecordBatch> {
    let Some(column) = batch.column_by_name("event_time") else {
        return Ok(batch);
    };

    let ints = cast(column, &DataType::Int64).context(RowFilterSnafu)?;
    let ints = ints
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("cast to Int64 yields Int64Array");
    let mask: BooleanArray = ints
        .iter()
        .map(|v| v.is_some_and(|v| v >= min && v <= max))
        .collect::<Vec<bool>>()
        .into();

    filter_record_batch(&batch, &mask).context(RowFilterSnafu)
}
