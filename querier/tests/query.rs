//! End-to-end queries over an ingested dataset.

use arrow::array::{Array, Int32Array, StringArray};
use arrow::record_batch::RecordBatch;
use ingester::Ingester;
use intake::ErrorLog;
use querier::{query, query_by_id, Error, FilterValue};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use test_helpers::{maybe_start_logging, raw_record, tmp_dir};
use vault_time::{SystemProvider, TimeProvider};

struct Fixture {
    _guard: tempfile::TempDir,
    root: PathBuf,
}

impl Fixture {
    /// Build a dataset from raw records via the real ingestion pipeline.
    fn ingested(records: &[serde_json::Value]) -> Self {
        maybe_start_logging();
        let guard = tmp_dir();
        let base = guard.path().to_path_buf();
        let root = base.join("parquet/messages");

        let intake_path = base.join("intake/2025-01-23.jsonl");
        intake::append_records(records, &intake_path).unwrap();

        let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemProvider::new());
        let ingester = Ingester::new(
            base.join("checkpoints"),
            ErrorLog::new(base.join("errors.jsonl"), Arc::clone(&time_provider)),
            time_provider,
        );
        ingester.incremental_ingest(&intake_path, &root).unwrap();

        Self {
            _guard: guard,
            root,
        }
    }
}

fn ids_of(batch: &RecordBatch) -> Vec<String> {
    let ids = batch
        .column_by_name("record_id")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    let mut out: Vec<String> = (0..ids.len()).map(|i| ids.value(i).to_string()).collect();
    out.sort();
    out
}

const NO_FILTERS: BTreeMap<String, FilterValue> = BTreeMap::new();

#[test]
fn range_query_returns_ingested_rows() {
    let fx = Fixture::ingested(&[raw_record("m1", 1737590400)]);

    let batch = query("2025-01-23", "2025-01-23", &fx.root, &NO_FILTERS, None).unwrap();
    assert_eq!(batch.num_rows(), 1);
    assert_eq!(ids_of(&batch), vec!["m1"]);
    assert_eq!(batch.num_columns(), 14);
}

#[test]
fn start_equals_end_selects_exactly_one_day() {
    let fx = Fixture::ingested(&[
        raw_record("day23", 1737590400), // 2025-01-23
        raw_record("day24", 1737676800), // 2025-01-24
    ]);

    let batch = query("2025-01-23", "2025-01-23", &fx.root, &NO_FILTERS, None).unwrap();
    assert_eq!(ids_of(&batch), vec!["day23"]);

    let batch = query("2025-01-23", "2025-01-24", &fx.root, &NO_FILTERS, None).unwrap();
    assert_eq!(ids_of(&batch), vec!["day23", "day24"]);
}

#[test]
fn boundary_instants_fall_on_the_right_day() {
    let fx = Fixture::ingested(&[
        raw_record("last-second", 1737676799), // 2025-01-23T23:59:59Z
        raw_record("first-second", 1737676800), // 2025-01-24T00:00:00Z
    ]);

    let batch = query("2025-01-23", "2025-01-23", &fx.root, &NO_FILTERS, None).unwrap();
    assert_eq!(ids_of(&batch), vec!["last-second"]);

    let batch = query("2025-01-24", "2025-01-24", &fx.root, &NO_FILTERS, None).unwrap();
    assert_eq!(ids_of(&batch), vec!["first-second"]);
}

#[test]
fn equality_filters_push_down() {
    let fx = Fixture::ingested(&[
        json!({"record_id": "a", "sender": "alice", "kind": 1, "event_time": 1737590400,
               "recipient": "u2", "is_group": 0, "source": "0", "event_id": "g1", "notify_kind": 1}),
        json!({"record_id": "b", "sender": "bob", "kind": 1, "event_time": 1737590401,
               "recipient": "u2", "is_group": 0, "source": "0", "event_id": "g2", "notify_kind": 1}),
        json!({"record_id": "c", "sender": "alice", "kind": 3, "event_time": 1737590402,
               "recipient": "u2", "is_group": 0, "source": "0", "event_id": "g3", "notify_kind": 1}),
    ]);

    let mut filters = BTreeMap::new();
    filters.insert("sender".to_string(), FilterValue::Str("alice".into()));
    let batch = query("2025-01-23", "2025-01-23", &fx.root, &filters, None).unwrap();
    assert_eq!(ids_of(&batch), vec!["a", "c"]);

    filters.insert("kind".to_string(), FilterValue::Int(3));
    let batch = query("2025-01-23", "2025-01-23", &fx.root, &filters, None).unwrap();
    assert_eq!(ids_of(&batch), vec!["c"]);
}

#[test]
fn projection_limits_columns() {
    let fx = Fixture::ingested(&[raw_record("m1", 1737590400)]);

    let columns = vec!["record_id".to_string(), "kind".to_string()];
    let batch = query(
        "2025-01-23",
        "2025-01-23",
        &fx.root,
        &NO_FILTERS,
        Some(&columns),
    )
    .unwrap();

    assert_eq!(batch.num_columns(), 2);
    let kinds = batch
        .column_by_name("kind")
        .unwrap()
        .as_any()
        .downcast_ref::<Int32Array>()
        .unwrap();
    assert_eq!(kinds.value(0), 1);
}

#[test]
fn empty_result_is_success_with_schema() {
    let fx = Fixture::ingested(&[raw_record("m1", 1737590400)]);

    let batch = query("2030-01-01", "2030-01-02", &fx.root, &NO_FILTERS, None).unwrap();
    assert_eq!(batch.num_rows(), 0);
    assert_eq!(batch.num_columns(), 14);
}

#[test]
fn invalid_date_is_a_distinct_argument_error() {
    let fx = Fixture::ingested(&[raw_record("m1", 1737590400)]);

    let err = query("23/01/2025", "2025-01-23", &fx.root, &NO_FILTERS, None).unwrap_err();
    assert!(matches!(err, Error::InvalidDate { .. }));
}

#[test]
fn missing_root_is_not_found() {
    let guard = tmp_dir();
    let err = query(
        "2025-01-23",
        "2025-01-23",
        &guard.path().join("absent"),
        &NO_FILTERS,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, Error::RootNotFound { .. }));
}

#[test]
fn query_by_id_scans_all_partitions() {
    let fx = Fixture::ingested(&[
        raw_record("m1", 1737590400), // 2025-01-23
        raw_record("m2", 1737676800), // 2025-01-24
        raw_record("m3", 1737763200), // 2025-01-25
    ]);

    let wanted = vec!["m1".to_string(), "m3".to_string()];
    let batch = query_by_id(&wanted, &fx.root, None).unwrap();
    assert_eq!(ids_of(&batch), vec!["m1", "m3"]);

    let none = query_by_id(&["zzz".to_string()], &fx.root, None).unwrap();
    assert_eq!(none.num_rows(), 0);
}

#[test]
fn divergent_file_schemas_merge_with_null_fill() {
    // Two files in one partition with different schemas: the second file
    // carries an extra column the first lacks.
    maybe_start_logging();
    let guard = tmp_dir();
    let root = guard.path().join("parquet/messages");
    let partition = root.join("year=2025/month=01/day=23");

    let base = schema::message_schema();
    let batch = parquet_file::writer::records_to_batch(
        &[test_helpers::cleaned_record("old", 1737590400)],
        &base,
    )
    .unwrap();
    parquet_file::writer::write_batch(
        &partition.join("part-0.parquet"),
        &batch,
        parquet_file::Codec::Snappy,
    )
    .unwrap();

    let mut wider_fields = base.fields().to_vec();
    wider_fields.push(schema::Field::new("annotation", schema::FieldType::String));
    let wider = schema::Schema::new(wider_fields);
    let batch = parquet_file::writer::records_to_batch(
        &[test_helpers::cleaned_record("new", 1737590401)],
        &wider,
    )
    .unwrap();
    parquet_file::writer::write_batch(
        &partition.join("part-1.parquet"),
        &batch,
        parquet_file::Codec::Snappy,
    )
    .unwrap();

    let batch = query("2025-01-23", "2025-01-23", &root, &NO_FILTERS, None).unwrap();
    assert_eq!(batch.num_rows(), 2);
    // The merged superset carries the extra column, null-filled for the
    // older file.
    let annotation = batch.column_by_name("annotation").unwrap();
    assert_eq!(annotation.null_count(), 2);
    assert_eq!(ids_of(&batch), vec!["new", "old"]);
}
