//! Encoding record batches into parquet files.

use arrow::array::{new_null_array, ArrayRef, Int32Array, Int8Array, StringArray, TimestampSecondArray};
use arrow::record_batch::RecordBatch;
use data_types::Record;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use snafu::{ResultExt, Snafu};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Errors while encoding parquet files.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Invalid zstd compression level {}: {}", level, source))]
    InvalidZstdLevel {
        level: i32,
        source: parquet::errors::ParquetError,
    },

    #[snafu(display("Cannot create {}: {}", path, source))]
    CreateFile {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Cannot encode parquet {}: {}", path, source))]
    EncodeParquet {
        path: String,
        source: parquet::errors::ParquetError,
    },

    #[snafu(display("Cannot assemble record batch: {}", source))]
    BuildBatch { source: arrow::error::ArrowError },
}

/// A specialized `Result` for write errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Block compression codec for a write.
///
/// Fresh ingest uses snappy; the archiver re-encodes with zstd at a high
/// level when tiering partitions down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Snappy, the ingest default.
    Snappy,
    /// Zstandard at the given level (1-22).
    Zstd {
        /// Compression level.
        level: i32,
    },
}

impl Default for Codec {
    fn default() -> Self {
        Self::Snappy
    }
}

impl Codec {
    fn to_parquet(self) -> Result<Compression> {
        Ok(match self {
            Self::Snappy => Compression::SNAPPY,
            Self::Zstd { level } => Compression::ZSTD(
                ZstdLevel::try_new(level).context(InvalidZstdLevelSnafu { level })?,
            ),
        })
    }
}

/// Write one batch as a complete parquet file at `path`.
///
/// Dictionary encoding and column statistics are always on; statistics are
/// what lets readers prune row groups without decoding them.
pub fn write_batch(path: &Path, batch: &RecordBatch, codec: Codec) -> Result<()> {
    let compression = codec.to_parquet()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context(CreateFileSnafu {
            path: parent.display().to_string(),
        })?;
    }
    let file = File::create(path).context(CreateFileSnafu {
        path: path.display().to_string(),
    })?;

    let props = WriterProperties::builder()
        .set_compression(compression)
        .set_dictionary_enabled(true)
        .set_statistics_enabled(EnabledStatistics::Page)
        .build();

    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), Some(props)).context(EncodeParquetSnafu {
            path: path.display().to_string(),
        })?;
    writer.write(batch).context(EncodeParquetSnafu {
        path: path.display().to_string(),
    })?;
    writer.close().context(EncodeParquetSnafu {
        path: path.display().to_string(),
    })?;

    Ok(())
}

/// Encode cleaned records as a batch laid out exactly like `schema`.
///
/// Columns are emitted in schema order; a schema field the record type does
/// not carry becomes an all-null column, which is how optional columns of a
/// newer registered schema version are filled.
pub fn records_to_batch(records: &[Record], schema: &schema::Schema) -> Result<RecordBatch> {
    let arrow_schema = schema.to_arrow();
    let len = records.len();

    let columns: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .map(|field| match field.name.as_str() {
            "record_id" => string_column(records, |r| &r.record_id),
            "sender" => string_column(records, |r| &r.sender),
            "recipient" => string_column(records, |r| &r.recipient),
            "group_id" => string_column(records, |r| &r.group_id),
            "group_sender" => string_column(records, |r| &r.group_sender),
            "content" => string_column(records, |r| &r.content),
            "desc" => string_column(records, |r| &r.desc),
            "source" => string_column(records, |r| &r.source),
            "event_id" => string_column(records, |r| &r.event_id),
            "kind" => int32_column(records, |r| r.kind),
            "notify_kind" => int32_column(records, |r| r.notify_kind),
            "is_group" => Arc::new(Int8Array::from(
                records.iter().map(|r| r.is_group).collect::<Vec<_>>(),
            )) as ArrayRef,
            "event_time" => timestamp_column(records, |r| r.event_time),
            "ingestion_time" => timestamp_column(records, |r| r.ingestion_time),
            _ => new_null_array(&field.field_type.to_arrow(), len),
        })
        .collect();

    RecordBatch::try_new(arrow_schema, columns).context(BuildBatchSnafu)
}

fn string_column(records: &[Record], get: impl Fn(&Record) -> &str) -> ArrayRef {
    Arc::new(StringArray::from(
        records.iter().map(|r| get(r)).collect::<Vec<_>>(),
    ))
}

fn int32_column(records: &[Record], get: impl Fn(&Record) -> i32) -> ArrayRef {
    Arc::new(Int32Array::from(
        records.iter().map(|r| get(r)).collect::<Vec<_>>(),
    ))
}

fn timestamp_column(records: &[Record], get: impl Fn(&Record) -> i64) -> ArrayRef {
    Arc::new(
        TimestampSecondArray::from(records.iter().map(|r| get(r)).collect::<Vec<_>>())
            .with_timezone("UTC"),
    )
}
