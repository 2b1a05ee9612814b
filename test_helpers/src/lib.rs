//! Shared helpers for tests across the workspace.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(clippy::explicit_iter_loop, clippy::use_self, clippy::clone_on_ref_ptr)]

use data_types::Record;
use once_cell::sync::Lazy;
use serde_json::{json, Value};

static LOGGING: Lazy<()> = Lazy::new(|| {
    let filter = tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    // Failure means a subscriber is already installed, which is fine.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
});

/// Install a tracing subscriber honoring `RUST_LOG`, once per process.
pub fn maybe_start_logging() {
    Lazy::force(&LOGGING);
}

/// A scratch directory removed on drop.
pub fn tmp_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("chatvault")
        .tempdir()
        .expect("creating temp dir")
}

/// A raw producer-shaped record, as it would arrive on the intake log.
pub fn raw_record(record_id: &str, event_time: i64) -> Value {
    json!({
        "record_id": record_id,
        "sender": "u1",
        "recipient": "u2",
        "kind": 1,
        "event_time": event_time,
        "is_group": 0,
        "content": "hi",
        "source": "0",
        "event_id": format!("g-{record_id}"),
        "notify_kind": 100,
    })
}

/// A cleaned record, as it would sit in the partitioned dataset.
pub fn cleaned_record(record_id: &str, event_time: i64) -> Record {
    Record {
        record_id: record_id.into(),
        sender: "u1".into(),
        recipient: "u2".into(),
        group_id: String::new(),
        group_sender: String::new(),
        kind: 1,
        event_time,
        is_group: 0,
        content: "hi".into(),
        desc: String::new(),
        source: "0".into(),
        event_id: format!("g-{record_id}"),
        notify_kind: 100,
        ingestion_time: event_time,
    }
}
