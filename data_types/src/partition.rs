//! Date partition key and its on-disk layout.
//!
//! The directory naming `year=YYYY/month=MM/day=DD` is a stable wire
//! format; month and day are always zero-padded to two digits.

use crate::Record;
use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use observability_deps::tracing::warn;
use snafu::{ensure, OptionExt, Snafu};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Errors for partition key derivation and parsing.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Event time {} does not map to a valid UTC date", event_time))]
    InvalidEventTime { event_time: i64 },

    #[snafu(display("Invalid partition key {:?}: {}", key, reason))]
    InvalidKey { key: String, reason: String },
}

/// Result with a partition [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A `(year, month, day)` date partition, derived from a record's
/// `event_time` interpreted as UTC.
///
/// The derived `Ord` is chronological because the fields are declared in
/// most-significant-first order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    /// Calendar year.
    pub year: i32,
    /// Calendar month, 1-12.
    pub month: u32,
    /// Calendar day, 1-31.
    pub day: u32,
}

impl PartitionKey {
    /// Derive the partition of an event time (epoch seconds, UTC).
    pub fn from_event_time(event_time: i64) -> Result<Self> {
        match Utc.timestamp_opt(event_time, 0) {
            chrono::LocalResult::Single(dt) => Ok(Self {
                year: dt.year(),
                month: dt.month(),
                day: dt.day(),
            }),
            _ => InvalidEventTimeSnafu { event_time }.fail(),
        }
    }

    /// Parse a `YYYY-MM-DD` partition key.
    pub fn parse(key: &str) -> Result<Self> {
        let mut parts = key.splitn(3, '-');
        let (year, month, day) = (|| {
            let year = parts.next()?.parse().ok()?;
            let month = parts.next()?.parse().ok()?;
            let day = parts.next()?.parse().ok()?;
            Some((year, month, day))
        })()
        .context(InvalidKeySnafu {
            key,
            reason: "expected YYYY-MM-DD",
        })?;

        ensure!(
            (1..=12).contains(&month),
            InvalidKeySnafu {
                key,
                reason: format!("month out of range: {month}"),
            }
        );
        ensure!(
            (1..=31).contains(&day),
            InvalidKeySnafu {
                key,
                reason: format!("day out of range: {day}"),
            }
        );

        Ok(Self { year, month, day })
    }

    /// Recover a key from hive-style directory names
    /// (`year=YYYY`, `month=MM`, `day=DD`). Returns `None` for anything
    /// that is not exactly this form.
    pub fn from_dir_names(year: &str, month: &str, day: &str) -> Option<Self> {
        let year = year.strip_prefix("year=")?.parse().ok()?;
        let month: u32 = month.strip_prefix("month=")?.parse().ok()?;
        let day: u32 = day.strip_prefix("day=")?.parse().ok()?;
        ((1..=12).contains(&month) && (1..=31).contains(&day)).then_some(Self { year, month, day })
    }

    /// The partition directory under `root`.
    pub fn path_under(&self, root: &Path) -> PathBuf {
        root.join(format!("year={:04}", self.year))
            .join(format!("month={:02}", self.month))
            .join(format!("day={:02}", self.day))
    }

    /// The calendar date of this partition, if it denotes a real date
    /// (`parse` accepts day 31 in any month; this resolves it).
    pub fn naive_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Group records by their date partition.
///
/// Records whose `event_time` does not resolve to a date are returned in the
/// second element so the caller can route them to its error log; they are
/// also logged here.
pub fn group_by_partition(records: Vec<Record>) -> (BTreeMap<PartitionKey, Vec<Record>>, Vec<Record>) {
    let mut partitions: BTreeMap<PartitionKey, Vec<Record>> = BTreeMap::new();
    let mut skipped = Vec::new();

    for record in records {
        match PartitionKey::from_event_time(record.event_time) {
            Ok(key) => partitions.entry(key).or_default().push(record),
            Err(e) => {
                warn!(record_id=%record.record_id, error=%e, "record skipped: no partition");
                skipped.push(record);
            }
        }
    }

    (partitions, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, event_time: i64) -> Record {
        Record {
            record_id: id.into(),
            sender: "u1".into(),
            recipient: "u2".into(),
            group_id: String::new(),
            group_sender: String::new(),
            kind: 1,
            event_time,
            is_group: 0,
            content: String::new(),
            desc: String::new(),
            source: "0".into(),
            event_id: "g".into(),
            notify_kind: 0,
            ingestion_time: 0,
        }
    }

    #[test]
    fn event_time_maps_to_utc_date() {
        // 2025-01-23T00:00:00Z
        let key = PartitionKey::from_event_time(1737590400).unwrap();
        assert_eq!(
            key,
            PartitionKey {
                year: 2025,
                month: 1,
                day: 23
            }
        );
        assert_eq!(key.to_string(), "2025-01-23");
    }

    #[test]
    fn day_boundary_lands_in_correct_partition() {
        // 2025-01-23T23:59:59Z and 2025-01-24T00:00:00Z
        let last = PartitionKey::from_event_time(1737676799).unwrap();
        let first = PartitionKey::from_event_time(1737676800).unwrap();
        assert_eq!(last.day, 23);
        assert_eq!(first.day, 24);
    }

    #[test]
    fn parse_round_trips_display() {
        let key = PartitionKey {
            year: 2026,
            month: 3,
            day: 7,
        };
        assert_eq!(PartitionKey::parse(&key.to_string()).unwrap(), key);
    }

    #[test]
    fn parse_rejects_out_of_range_and_garbage() {
        assert!(PartitionKey::parse("2026-13-01").is_err());
        assert!(PartitionKey::parse("2026-00-01").is_err());
        assert!(PartitionKey::parse("2026-01-32").is_err());
        assert!(PartitionKey::parse("2026-01").is_err());
        assert!(PartitionKey::parse("not-a-date").is_err());
    }

    #[test]
    fn dir_names_round_trip() {
        let key = PartitionKey {
            year: 2024,
            month: 1,
            day: 1,
        };
        let path = key.path_under(Path::new("/data"));
        assert_eq!(path, Path::new("/data/year=2024/month=01/day=01"));

        assert_eq!(
            PartitionKey::from_dir_names("year=2024", "month=01", "day=01"),
            Some(key)
        );
        assert_eq!(PartitionKey::from_dir_names("2024", "01", "01"), None);
    }

    #[test]
    fn grouping_splits_by_day_and_keeps_invalid_aside() {
        let records = vec![
            record("a", 1737590400),
            record("b", 1737676800),
            record("c", 1737590500),
            record("bad", i64::MAX),
        ];

        let (partitions, skipped) = group_by_partition(records);

        assert_eq!(partitions.len(), 2);
        let first = partitions
            .get(&PartitionKey {
                year: 2025,
                month: 1,
                day: 23,
            })
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].record_id, "bad");
    }
}
