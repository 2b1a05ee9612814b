//! The cleaned message record.

use serde::{Deserialize, Serialize};

/// One message event, after the ingestion cleaning stage.
///
/// Producers emit loosely-shaped JSON; by the time a record reaches this
/// type every field has its canonical type: strings are filled (empty, not
/// missing), numeric codes are coerced, `source` is stringified and
/// timestamps are epoch seconds in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Globally unique message identifier.
    pub record_id: String,
    /// Sending account.
    pub sender: String,
    /// Receiving account.
    pub recipient: String,
    /// Group identifier, `""` for direct messages.
    pub group_id: String,
    /// Speaker within the group, `""` for direct messages.
    pub group_sender: String,
    /// Message type code.
    pub kind: i32,
    /// Event time, epoch seconds UTC, strictly positive.
    pub event_time: i64,
    /// 1 if this is a group message, 0 otherwise.
    pub is_group: i8,
    /// Message body, possibly empty.
    pub content: String,
    /// Outer description, possibly empty.
    pub desc: String,
    /// Producer source tag, stringified on ingest.
    pub source: String,
    /// Per-delivery unique event identifier.
    pub event_id: String,
    /// Notification type code.
    pub notify_kind: i32,
    /// Time the record was ingested, epoch seconds UTC.
    pub ingestion_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_round_trip() {
        let record = Record {
            record_id: "m1".into(),
            sender: "u1".into(),
            recipient: "u2".into(),
            group_id: String::new(),
            group_sender: String::new(),
            kind: 1,
            event_time: 1737590400,
            is_group: 0,
            content: "hi".into(),
            desc: String::new(),
            source: "0".into(),
            event_id: "g1".into(),
            notify_kind: 100,
            ingestion_time: 1737590500,
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
