//! Durable cursor state for incremental ingestion of one intake file.

use serde::{Deserialize, Serialize};

/// Lifecycle state of an ingest pass over one intake file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Ingestion has started and may still be underway.
    Processing,
    /// The caller marked the source fully ingested.
    Completed,
    /// Ingestion aborted; `error` holds the reason.
    Failed,
}

/// Per-intake-file ingestion cursor.
///
/// The serialized field names are a wire format shared with external
/// tooling; do not rename them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestCheckpoint {
    /// Path of the intake file this cursor belongs to.
    pub source_file: String,
    /// Number of lines fully consumed, blanks and invalid lines included.
    pub last_processed_line: u64,
    /// Identifier of the last record read before the cursor.
    #[serde(rename = "last_processed_msg_id")]
    pub last_processed_record_id: String,
    /// `event_time` of the last record read before the cursor.
    pub last_processed_timestamp: i64,
    /// Cumulative count of lines consumed by the current pass.
    pub processed_record_count: u64,
    /// Lifecycle state.
    pub status: CheckpointStatus,
    /// Failure reason, present when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestCheckpoint {
    /// A fresh cursor at the start of `source_file`.
    pub fn new(source_file: impl Into<String>) -> Self {
        Self {
            source_file: source_file.into(),
            last_processed_line: 0,
            last_processed_record_id: String::new(),
            last_processed_timestamp: 0,
            processed_record_count: 0,
            status: CheckpointStatus::Processing,
            error: None,
        }
    }

    /// Flip the cursor to `completed`.
    pub fn mark_completed(&mut self) {
        self.status = CheckpointStatus::Completed;
        self.error = None;
    }

    /// Flip the cursor to `failed` with a reason.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = CheckpointStatus::Failed;
        self.error = Some(error.into());
    }
}
