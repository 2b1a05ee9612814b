//! Decoding parquet files with projection and pushed-down row filters.

use arrow::array::{new_null_array, ArrayRef, BooleanArray, Int64Array, StringArray};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{
    ArrowPredicateFn, ParquetRecordBatchReaderBuilder, RowFilter,
};
use parquet::arrow::ProjectionMask;
use parquet::file::metadata::ParquetMetaData;
use parquet::file::statistics::Statistics;
use snafu::{ResultExt, Snafu};
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Errors while decoding parquet files.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Cannot open {}: {}", path, source))]
    OpenFile {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Cannot read parquet {}: {}", path, source))]
    ReadParquet {
        path: String,
        source: parquet::errors::ParquetError,
    },

    #[snafu(display("Cannot decode batches from {}: {}", path, source))]
    DecodeBatch {
        path: String,
        source: ArrowError,
    },

    #[snafu(display("Cannot align batch to target schema: {}", source))]
    AlignBatch { source: ArrowError },
}

/// A specialized `Result` for read errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A row predicate pushed down into the parquet reader.
///
/// Predicates are conjunctive. Each one is evaluated against only its own
/// column (decoded ahead of the projected payload), and `TimeRange`
/// additionally prunes whole row groups from their column statistics before
/// anything is decoded at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `min <= column <= max`, on an epoch-seconds column.
    TimeRange {
        /// Column name.
        column: String,
        /// Inclusive lower bound, epoch seconds.
        min: i64,
        /// Inclusive upper bound, epoch seconds.
        max: i64,
    },
    /// Exact string equality.
    EqString {
        /// Column name.
        column: String,
        /// Value to match.
        value: String,
    },
    /// Exact integer equality.
    EqInt {
        /// Column name.
        column: String,
        /// Value to match.
        value: i64,
    },
    /// Set membership on a string column.
    InSet {
        /// Column name.
        column: String,
        /// Values to match.
        values: BTreeSet<String>,
    },
}

impl Predicate {
    fn column(&self) -> &str {
        match self {
            Self::TimeRange { column, .. }
            | Self::EqString { column, .. }
            | Self::EqInt { column, .. }
            | Self::InSet { column, .. } => column,
        }
    }

    /// Evaluate against the single predicate column.
    ///
    /// The column is cast to the comparison type first, so the predicate
    /// keeps matching files whose column was widened to string by the
    /// permissive read policy; values that do not cast are nulls and never
    /// match.
    fn evaluate(&self, column: &ArrayRef) -> std::result::Result<BooleanArray, ArrowError> {
        let matches: Vec<bool> = match self {
            Self::TimeRange { min, max, .. } => as_int64(column)?
                .iter()
                .map(|v| v.is_some_and(|v| v >= *min && v <= *max))
                .collect(),
            Self::EqInt { value, .. } => as_int64(column)?
                .iter()
                .map(|v| v == Some(*value))
                .collect(),
            Self::EqString { value, .. } => as_utf8(column)?
                .iter()
                .map(|v| v == Some(value.as_str()))
                .collect(),
            Self::InSet { values, .. } => as_utf8(column)?
                .iter()
                .map(|v| v.is_some_and(|v| values.contains(v)))
                .collect(),
        };
        Ok(BooleanArray::from(matches))
    }
}

fn as_int64(column: &ArrayRef) -> std::result::Result<Int64Array, ArrowError> {
    let cast_column = cast(column, &DataType::Int64)?;
    Ok(cast_column
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("cast to Int64 yields Int64Array")
        .clone())
}

fn as_utf8(column: &ArrayRef) -> std::result::Result<StringArray, ArrowError> {
    let cast_column = cast(column, &DataType::Utf8)?;
    Ok(cast_column
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("cast to Utf8 yields StringArray")
        .clone())
}

/// Decode a whole file.
pub fn read_file(path: &Path) -> Result<Vec<RecordBatch>> {
    read_file_filtered(path, None, &[])
}

/// Decode a file with column projection and pushed-down predicates.
///
/// `columns = None` projects everything; projected columns missing from the
/// file are simply absent from the output (the caller null-fills against
/// its merged schema). A predicate on a column the file does not have can
/// match nothing, so the file contributes no rows.
pub fn read_file_filtered(
    path: &Path,
    columns: Option<&[String]>,
    predicates: &[Predicate],
) -> Result<Vec<RecordBatch>> {
    let file = File::open(path).context(OpenFileSnafu {
        path: path.display().to_string(),
    })?;
    let mut builder = ParquetRecordBatchReaderBuilder::try_new(file).context(ReadParquetSnafu {
        path: path.display().to_string(),
    })?;

    // Resolve every referenced column to parquet leaf indices up front.
    let leaf_index = |name: &str| -> Option<usize> {
        builder
            .parquet_schema()
            .columns()
            .iter()
            .position(|c| c.name() == name)
    };

    let mut predicate_leaves = Vec::with_capacity(predicates.len());
    for predicate in predicates {
        match leaf_index(predicate.column()) {
            Some(idx) => predicate_leaves.push(idx),
            // Conjunction with a column this file does not have: nothing
            // can match.
            None => return Ok(vec![]),
        }
    }

    let projection = columns.map(|wanted| {
        let indices: Vec<usize> = wanted.iter().filter_map(|name| leaf_index(name)).collect();
        ProjectionMask::leaves(builder.parquet_schema(), indices)
    });

    let row_groups = prune_row_groups(builder.metadata(), predicates, &leaf_index);

    let filters: Vec<Box<dyn parquet::arrow::arrow_reader::ArrowPredicate>> = predicates
        .iter()
        .zip(&predicate_leaves)
        .map(|(predicate, &leaf)| {
            let mask = ProjectionMask::leaves(builder.parquet_schema(), [leaf]);
            let predicate = predicate.clone();
            Box::new(ArrowPredicateFn::new(mask, move |batch: RecordBatch| {
                predicate.evaluate(batch.column(0))
            })) as _
        })
        .collect();

    if let Some(keep) = row_groups {
        builder = builder.with_row_groups(keep);
    }
    if !filters.is_empty() {
        builder = builder.with_row_filter(RowFilter::new(filters));
    }
    if let Some(mask) = projection {
        builder = builder.with_projection(mask);
    }

    let reader = builder.build().context(ReadParquetSnafu {
        path: path.display().to_string(),
    })?;
    reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .context(DecodeBatchSnafu {
            path: path.display().to_string(),
        })
}

/// Select the row groups whose statistics overlap every `TimeRange`
/// predicate. `None` means "keep all" (no prunable predicate or no usable
/// statistics).
fn prune_row_groups(
    metadata: &ParquetMetaData,
    predicates: &[Predicate],
    leaf_index: &impl Fn(&str) -> Option<usize>,
) -> Option<Vec<usize>> {
    let ranges: Vec<(usize, i64, i64)> = predicates
        .iter()
        .filter_map(|p| match p {
            Predicate::TimeRange { column, min, max } => {
                leaf_index(column).map(|idx| (idx, *min, *max))
            }
            _ => None,
        })
        .collect();
    if ranges.is_empty() {
        return None;
    }

    let keep: Vec<usize> = metadata
        .row_groups()
        .iter()
        .enumerate()
        .filter(|(_, row_group)| {
            ranges.iter().all(|&(idx, min, max)| {
                match row_group.column(idx).statistics() {
                    Some(Statistics::Int64(stats)) => {
                        match (stats.min_opt(), stats.max_opt()) {
                            (Some(&rg_min), Some(&rg_max)) => rg_max >= min && rg_min <= max,
                            // Incomplete statistics: cannot exclude.
                            _ => true,
                        }
                    }
                    // Non-integer or absent statistics: cannot exclude.
                    _ => true,
                }
            })
        })
        .map(|(i, _)| i)
        .collect();

    Some(keep)
}

/// Project `batch` onto `target`: matching columns are kept (cast when the
/// type differs, e.g. widened-to-string reads), missing columns are
/// null-filled.
pub fn align_to_schema(batch: &RecordBatch, target: &SchemaRef) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = target
        .fields()
        .iter()
        .map(|field| match batch.column_by_name(field.name()) {
            Some(column) if column.data_type() == field.data_type() => Ok(Arc::clone(column)),
            Some(column) => cast(column, field.data_type()).context(AlignBatchSnafu),
            None => Ok(new_null_array(field.data_type(), batch.num_rows())),
        })
        .collect::<Result<_>>()?;

    RecordBatch::try_new(Arc::clone(target), columns)
        .map_err(|source| Error::AlignBatch { source })
}

/// Concatenate batches that already share `schema` into one.
pub fn concat_aligned(schema: &SchemaRef, batches: &[RecordBatch]) -> Result<RecordBatch> {
    concat_batches(schema, batches).map_err(|source| Error::AlignBatch { source })
}
