//! Footer-only parquet metadata access: schemas, row counts and byte sizes
//! without decoding any data pages.

use arrow::datatypes::SchemaRef;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use snafu::{ResultExt, Snafu};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Errors while reading parquet metadata.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Cannot open {}: {}", path, source))]
    OpenFile {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Cannot read parquet metadata of {}: {}", path, source))]
    ReadMetadata {
        path: String,
        source: parquet::errors::ParquetError,
    },
}

/// Result with a metadata [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Size and shape of one parquet file, from its footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStats {
    /// Total rows across all row groups.
    pub rows: i64,
    /// Sum of compressed row-group sizes, bytes.
    pub compressed_bytes: i64,
    /// Sum of uncompressed row-group sizes, bytes.
    pub uncompressed_bytes: i64,
}

/// The Arrow schema stored in the file footer.
pub fn read_arrow_schema(path: &Path) -> Result<SchemaRef> {
    Ok(Arc::clone(builder(path)?.schema()))
}

/// The logical `(name, type)` schema of the file.
pub fn read_logical_schema(path: &Path) -> Result<schema::Schema> {
    Ok(schema::Schema::from_arrow(read_arrow_schema(path)?.as_ref()))
}

/// Row and byte accounting for the file.
pub fn file_stats(path: &Path) -> Result<FileStats> {
    let builder = builder(path)?;
    let metadata = builder.metadata();

    let mut stats = FileStats {
        rows: metadata.file_metadata().num_rows(),
        compressed_bytes: 0,
        uncompressed_bytes: 0,
    };
    for row_group in metadata.row_groups() {
        stats.compressed_bytes += row_group.compressed_size();
        stats.uncompressed_bytes += row_group.total_byte_size();
    }
    Ok(stats)
}

fn builder(path: &Path) -> Result<ParquetRecordBatchReaderBuilder<File>> {
    let file = File::open(path).context(OpenFileSnafu {
        path: path.display().to_string(),
    })?;
    ParquetRecordBatchReaderBuilder::try_new(file).context(ReadMetadataSnafu {
        path: path.display().to_string(),
    })
}
