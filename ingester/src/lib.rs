//! Checkpointed incremental ingestion.
//!
//! An [`Ingester`] streams unread lines out of an intake file, runs them
//! through the cleaning stage, groups survivors by date partition and
//! appends one new `part-N.parquet` per partition per flushed batch. The
//! checkpoint advances only after a batch write returns, so a crash never
//! loses data. At worst the interrupted batch is re-delivered and later
//! removed by compaction.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use data_types::{group_by_partition, IngestCheckpoint, Record};
use intake::{ErrorKind, ErrorLog, LineItem};
use observability_deps::tracing::{debug, info};
use parquet_file::writer::{records_to_batch, write_batch};
use parquet_file::Codec;
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vault_time::TimeProvider;

pub mod checkpoint;
pub mod clean;

pub use checkpoint::CheckpointStore;
pub use clean::{clean_batch, clean_record, unwrap_envelope, CleanOutcome, CleanedBatch};

/// Default records per flushed batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Errors for ingestion invocations.
///
/// Per-record problems never show up here; they are logged, counted and
/// skipped. These are the invocation-level faults that stop a run with the
/// checkpoint still pointing at the last durable batch.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Cannot read intake: {}", source))]
    Intake { source: intake::reader::Error },

    #[snafu(display("Cannot write error log: {}", source))]
    SkipLog { source: intake::error_log::Error },

    #[snafu(display("Checkpoint failure: {}", source))]
    Checkpoint { source: checkpoint::Error },

    #[snafu(display("Cannot create partition directory {}: {}", path, source))]
    CreatePartitionDir {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Cannot place partition file: {}", source))]
    PlacePartitionFile {
        source: parquet_file::dataset::Error,
    },

    #[snafu(display("Cannot write partition file: {}", source))]
    WritePartition {
        source: parquet_file::writer::Error,
    },
}

/// A specialized `Result` for ingestion errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Outcome of one [`Ingester::incremental_ingest`] invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestReport {
    /// Intake lines consumed by this run (blank and invalid included).
    pub total_processed: u64,
    /// Records written into the partitioned dataset by this run.
    pub new_records: u64,
    /// Records dropped as intra-batch duplicates.
    pub skipped_duplicates: u64,
    /// The checkpoint's line offset after this run.
    pub checkpoint_offset: u64,
}

#[derive(Debug, Default)]
struct FlushOutcome {
    written: u64,
    duplicates: u64,
    last_event_time: Option<i64>,
    per_partition: BTreeMap<String, u64>,
}

/// Handle performing checkpointed ingestion into one partitioned root.
///
/// All collaborators are injected: the checkpoint directory, the error log
/// and the clock. One ingester may serve many intake files; invocations on
/// the same intake file serialize on the checkpoint lock.
#[derive(Debug)]
pub struct Ingester {
    checkpoints: CheckpointStore,
    error_log: ErrorLog,
    time_provider: Arc<dyn TimeProvider>,
    batch_size: usize,
    deduplicate: bool,
}

impl Ingester {
    /// Create an ingester with the default batch size and intra-batch
    /// deduplication enabled.
    pub fn new(
        checkpoint_dir: impl Into<PathBuf>,
        error_log: ErrorLog,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            checkpoints: CheckpointStore::new(checkpoint_dir),
            error_log,
            time_provider,
            batch_size: DEFAULT_BATCH_SIZE,
            deduplicate: true,
        }
    }

    /// Override the flush batch size (min 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Enable or disable intra-batch deduplication.
    pub fn with_deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    /// The checkpoint store backing this ingester.
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Ingest everything unread from `intake_path` into `partitioned_root`.
    ///
    /// Resumes from the committed checkpoint; each flushed batch creates
    /// new `part-N` files and then advances the checkpoint. At EOF the
    /// checkpoint is saved with status `processing`; deciding that a source
    /// is finished for good is the caller's call via
    /// [`CheckpointStore::mark_completed`].
    pub fn incremental_ingest(
        &self,
        intake_path: &Path,
        partitioned_root: &Path,
    ) -> Result<IngestReport> {
        let committed = self.checkpoints.load(intake_path).context(CheckpointSnafu)?;
        let start_line = committed
            .as_ref()
            .map(|c| c.last_processed_line)
            .unwrap_or(0);
        let mut last_record_id = committed
            .as_ref()
            .map(|c| c.last_processed_record_id.clone())
            .unwrap_or_default();
        let mut last_timestamp = committed
            .as_ref()
            .map(|c| c.last_processed_timestamp)
            .unwrap_or(0);

        debug!(
            intake=%intake_path.display(),
            start_line,
            "starting incremental ingest",
        );

        let mut stream = intake::stream_lines(intake_path, start_line).context(IntakeSnafu)?;
        let mut buffer: Vec<Value> = Vec::with_capacity(self.batch_size);
        let mut report = IngestReport::default();

        while let Some(item) = stream.next() {
            match item.context(IntakeSnafu)? {
                LineItem::Invalid {
                    line_number,
                    raw,
                    error,
                } => {
                    self.error_log
                        .parse_error(&raw, error, Some(line_number))
                        .context(SkipLogSnafu)?;
                }
                LineItem::Valid { value, .. } => {
                    let value = unwrap_envelope(value);
                    if let Some(id) = value.get("record_id").and_then(Value::as_str) {
                        last_record_id = id.to_string();
                    }
                    buffer.push(value);
                }
            }

            if buffer.len() >= self.batch_size {
                let outcome = self.flush(std::mem::take(&mut buffer), partitioned_root)?;
                report.new_records += outcome.written;
                report.skipped_duplicates += outcome.duplicates;
                if let Some(t) = outcome.last_event_time {
                    last_timestamp = t;
                }

                let current = stream.line_number();
                self.save_progress(
                    intake_path,
                    current,
                    &last_record_id,
                    last_timestamp,
                    current - start_line,
                )?;
            }
        }

        if !buffer.is_empty() {
            let outcome = self.flush(std::mem::take(&mut buffer), partitioned_root)?;
            report.new_records += outcome.written;
            report.skipped_duplicates += outcome.duplicates;
            if let Some(t) = outcome.last_event_time {
                last_timestamp = t;
            }
        }

        let current = stream.line_number();
        self.save_progress(
            intake_path,
            current,
            &last_record_id,
            last_timestamp,
            current - start_line,
        )?;

        report.total_processed = current - start_line;
        report.checkpoint_offset = current;

        info!(
            intake=%intake_path.display(),
            total_processed=report.total_processed,
            new_records=report.new_records,
            skipped_duplicates=report.skipped_duplicates,
            checkpoint_offset=report.checkpoint_offset,
            "incremental ingest finished",
        );
        Ok(report)
    }

    /// One-shot batch write bypassing intake files and checkpoints. Runs
    /// the same cleaning pipeline and returns how many records landed in
    /// each partition.
    pub fn append_to_partition(
        &self,
        records: Vec<Value>,
        partitioned_root: &Path,
    ) -> Result<BTreeMap<String, u64>> {
        let unwrapped = records.into_iter().map(unwrap_envelope).collect();
        let outcome = self.flush(unwrapped, partitioned_root)?;
        Ok(outcome.per_partition)
    }

    /// Clean a batch of raw values and write the survivors, one new file
    /// per touched partition.
    fn flush(&self, raws: Vec<Value>, partitioned_root: &Path) -> Result<FlushOutcome> {
        let now = self.time_provider.now().timestamp();
        let cleaned = clean_batch(raws, self.deduplicate, now);

        for skipped in &cleaned.skipped {
            match skipped.kind {
                ErrorKind::Schema => self
                    .error_log
                    .schema_error(&skipped.record, &["record_id"])
                    .context(SkipLogSnafu)?,
                _ => self
                    .error_log
                    .validation_error(
                        &skipped.record,
                        &skipped.reason,
                        skipped.record_id.as_deref(),
                    )
                    .context(SkipLogSnafu)?,
            }
        }

        let mut outcome = FlushOutcome {
            duplicates: cleaned.duplicates,
            last_event_time: cleaned.records.last().map(|r| r.event_time),
            ..Default::default()
        };
        if cleaned.records.is_empty() {
            return Ok(outcome);
        }

        let (partitions, unpartitionable) = group_by_partition(cleaned.records);
        for record in unpartitionable {
            let raw = serde_json::to_value(&record).expect("record serializes");
            self.error_log
                .validation_error(&raw, "event_time outside representable range", Some(&record.record_id))
                .context(SkipLogSnafu)?;
        }

        for (key, records) in partitions {
            outcome.written += records.len() as u64;
            outcome
                .per_partition
                .insert(key.to_string(), records.len() as u64);
            self.write_partition_batch(&key.path_under(partitioned_root), &records)?;
        }

        Ok(outcome)
    }

    fn write_partition_batch(&self, partition_dir: &Path, records: &[Record]) -> Result<()> {
        std::fs::create_dir_all(partition_dir).context(CreatePartitionDirSnafu {
            path: partition_dir.display().to_string(),
        })?;
        let path =
            parquet_file::dataset::next_part_path(partition_dir).context(PlacePartitionFileSnafu)?;

        let batch = records_to_batch(records, &schema::message_schema())
            .context(WritePartitionSnafu)?;
        write_batch(&path, &batch, Codec::Snappy).context(WritePartitionSnafu)?;

        info!(
            file=%path.display(),
            rows=records.len(),
            "wrote partition batch",
        );
        Ok(())
    }

    fn save_progress(
        &self,
        intake_path: &Path,
        last_line: u64,
        last_record_id: &str,
        last_timestamp: i64,
        processed: u64,
    ) -> Result<()> {
        let mut checkpoint = IngestCheckpoint::new(intake_path.display().to_string());
        checkpoint.last_processed_line = last_line;
        checkpoint.last_processed_record_id = last_record_id.to_string();
        checkpoint.last_processed_timestamp = last_timestamp;
        checkpoint.processed_record_count = processed;
        self.checkpoints.save(&checkpoint).context(CheckpointSnafu)
    }
}
