//! The cleaning stage: loosely-shaped producer JSON in, typed records out.
//!
//! This is the single place where recognized shape-shifts are handled:
//! the `data` envelope, int-or-string `source`, stringly-typed numerics and
//! structured values that slipped into string positions. Anything else is a
//! skip, never an error: the stream must keep advancing.

use data_types::Record;
use intake::ErrorKind;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// A record dropped by the cleaning stage, with enough context for the
/// error log.
#[derive(Debug)]
pub struct SkippedRecord {
    /// Taxonomy kind.
    pub kind: ErrorKind,
    /// Human-readable reason.
    pub reason: String,
    /// The offending raw record.
    pub record: Value,
    /// The record id, when one was present.
    pub record_id: Option<String>,
}

/// Outcome of cleaning one raw record.
#[derive(Debug)]
pub enum CleanOutcome {
    /// The record passed; `ingestion_time` is still unset (0).
    Clean(Box<Record>),
    /// The record was dropped.
    Skip(Box<SkippedRecord>),
}

/// Result of cleaning a whole batch.
#[derive(Debug, Default)]
pub struct CleanedBatch {
    /// Surviving records, `ingestion_time` stamped.
    pub records: Vec<Record>,
    /// Dropped records, for the error log.
    pub skipped: Vec<SkippedRecord>,
    /// Records dropped as intra-batch duplicates (keep-first).
    pub duplicates: u64,
}

/// Unwrap the webhook `data` envelope.
///
/// Producers sometimes wrap the payload: the outer object carries delivery
/// metadata (`event_id`, `notify_kind`) and the message sits under `data`.
/// Only applies when the outer object itself lacks `record_id`.
pub fn unwrap_envelope(raw: Value) -> Value {
    let Value::Object(ref outer) = raw else {
        return raw;
    };
    if outer.contains_key("record_id") {
        return raw;
    }
    let Some(Value::Object(inner)) = outer.get("data") else {
        return raw;
    };

    let mut merged = inner.clone();
    for key in ["event_id", "notify_kind"] {
        if !merged.contains_key(key) {
            if let Some(value) = outer.get(key) {
                merged.insert(key.to_string(), value.clone());
            }
        }
    }
    Value::Object(merged)
}

/// Clean one raw record. The caller is expected to have unwrapped the
/// envelope already.
pub fn clean_record(raw: Value) -> CleanOutcome {
    let Value::Object(ref obj) = raw else {
        return skip(
            ErrorKind::Validation,
            "record is not a JSON object",
            raw,
            None,
        );
    };

    let record_id = match scalar_string(obj.get("record_id")) {
        Some(id) if !id.is_empty() => id,
        _ => {
            return skip(
                ErrorKind::Schema,
                "missing required fields: record_id",
                raw,
                None,
            )
        }
    };

    let event_time = match coerce_int(obj.get("event_time")) {
        Coerced::Value(t) => t,
        Coerced::Missing => {
            return skip(
                ErrorKind::Validation,
                "missing event_time",
                raw,
                Some(record_id),
            )
        }
        Coerced::Unparseable => {
            return skip(
                ErrorKind::Validation,
                "event_time is not a number",
                raw,
                Some(record_id),
            )
        }
    };
    if event_time <= 0 {
        return skip(
            ErrorKind::Validation,
            "event_time must be positive",
            raw,
            Some(record_id),
        );
    }

    let kind = match coerce_code(obj.get("kind")) {
        Some(v) => v,
        None => {
            return skip(
                ErrorKind::Validation,
                "kind is not a number",
                raw,
                Some(record_id),
            )
        }
    };
    let notify_kind = match coerce_code(obj.get("notify_kind")) {
        Some(v) => v,
        None => {
            return skip(
                ErrorKind::Validation,
                "notify_kind is not a number",
                raw,
                Some(record_id),
            )
        }
    };
    let is_group = match coerce_code(obj.get("is_group")) {
        Some(v) => v as i8,
        None => {
            return skip(
                ErrorKind::Validation,
                "is_group is not a number",
                raw,
                Some(record_id),
            )
        }
    };

    CleanOutcome::Clean(Box::new(Record {
        record_id,
        sender: fill_string(obj, "sender"),
        recipient: fill_string(obj, "recipient"),
        group_id: fill_string(obj, "group_id"),
        group_sender: fill_string(obj, "group_sender"),
        kind,
        event_time,
        is_group,
        content: fill_string(obj, "content"),
        desc: fill_string(obj, "desc"),
        source: fill_string(obj, "source"),
        event_id: fill_string(obj, "event_id"),
        notify_kind,
        ingestion_time: 0,
    }))
}

/// Clean a batch: envelope-unwrapped raws in, stamped records out, with
/// keep-first intra-batch deduplication when `deduplicate` is set.
pub fn clean_batch(raws: Vec<Value>, deduplicate: bool, ingestion_time: i64) -> CleanedBatch {
    let mut batch = CleanedBatch::default();
    let mut seen: HashSet<String> = HashSet::new();

    for raw in raws {
        match clean_record(raw) {
            CleanOutcome::Clean(mut record) => {
                if deduplicate && !seen.insert(record.record_id.clone()) {
                    batch.duplicates += 1;
                    continue;
                }
                record.ingestion_time = ingestion_time;
                batch.records.push(*record);
            }
            CleanOutcome::Skip(skipped) => batch.skipped.push(*skipped),
        }
    }

    batch
}

fn skip(kind: ErrorKind, reason: &str, record: Value, record_id: Option<String>) -> CleanOutcome {
    CleanOutcome::Skip(Box::new(SkippedRecord {
        kind,
        reason: reason.to_string(),
        record,
        record_id,
    }))
}

/// A string field: missing and null fill to `""`, numbers and bools are
/// stringified, structured values are serialized to their JSON text so the
/// columnar encoder only ever sees flat scalars.
fn fill_string(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(structured) => serde_json::to_string(structured).expect("JSON value serializes"),
    }
}

fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

enum Coerced {
    Value(i64),
    Missing,
    Unparseable,
}

/// Accept integers, floats (truncated) and numeric strings.
fn coerce_int(value: Option<&Value>) -> Coerced {
    match value {
        None | Some(Value::Null) => Coerced::Missing,
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .map(Coerced::Value)
            .unwrap_or(Coerced::Unparseable),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Coerced::Missing;
            }
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
                .map(Coerced::Value)
                .unwrap_or(Coerced::Unparseable)
        }
        Some(_) => Coerced::Unparseable,
    }
}

/// Like [`coerce_int`] but for i32 code fields, where missing defaults to 0.
fn coerce_code(value: Option<&Value>) -> Option<i32> {
    match coerce_int(value) {
        Coerced::Value(v) => i32::try_from(v).ok(),
        Coerced::Missing => Some(0),
        Coerced::Unparseable => None,
    }
}
