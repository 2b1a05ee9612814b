//! Abstraction over the system clock.
//!
//! Every component that needs "now" (ingestion-time stamping, retention
//! cutoffs, archival thresholds) takes an `Arc<dyn TimeProvider>` so that
//! tests can drive it with [`MockProvider`].
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use chrono::{DateTime, Datelike, TimeZone, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// A UTC instant with second precision arithmetic helpers.
///
/// Thin wrapper around [`DateTime<Utc>`] so callers don't couple to chrono
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(DateTime<Utc>);

impl Time {
    /// Create from whole seconds since the Unix epoch.
    ///
    /// Returns `None` if the value is outside the representable range.
    pub fn from_timestamp(secs: i64) -> Option<Self> {
        match Utc.timestamp_opt(secs, 0) {
            chrono::LocalResult::Single(dt) => Some(Self(dt)),
            _ => None,
        }
    }

    /// Create from an RFC 3339 string.
    pub fn from_rfc3339(s: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| Self(dt.with_timezone(&Utc)))
    }

    /// Seconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.0.timestamp()
    }

    /// RFC 3339 rendering with second precision.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }

    /// The UTC calendar date `(year, month, day)` of this instant.
    pub fn date_parts(&self) -> (i32, u32, u32) {
        (self.0.year(), self.0.month(), self.0.day())
    }

    /// `self - other` if `other` is not later than `self`.
    pub fn checked_duration_since(&self, other: Self) -> Option<Duration> {
        (self.0 >= other.0).then(|| (self.0 - other.0).to_std().expect("non-negative"))
    }

    /// Access the underlying chrono value.
    pub fn date_time(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + chrono::Duration::from_std(rhs).expect("duration in range"))
    }
}

impl Sub<Duration> for Time {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self {
        Self(self.0 - chrono::Duration::from_std(rhs).expect("duration in range"))
    }
}

/// Source of the current time.
pub trait TimeProvider: std::fmt::Debug + Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> Time;
}

/// [`TimeProvider`] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider;

impl SystemProvider {
    /// Create a new provider.
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time(Utc::now())
    }
}

/// [`TimeProvider`] that returns a programmable instant, for tests.
#[derive(Debug)]
pub struct MockProvider {
    now: RwLock<Time>,
}

impl MockProvider {
    /// Create a provider pinned at `now`.
    pub fn new(now: Time) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Replace the reported instant.
    pub fn set(&self, now: Time) {
        *self.now.write() = now;
    }

    /// Advance the reported instant.
    pub fn inc(&self, d: Duration) -> Time {
        let mut now = self.now.write();
        *now = *now + d;
        *now
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_from_timestamp_round_trips() {
        let t = Time::from_timestamp(1737590400).unwrap();
        assert_eq!(t.timestamp(), 1737590400);
        assert_eq!(t.date_parts(), (2025, 1, 23));
        assert_eq!(t.to_rfc3339(), "2025-01-23T00:00:00Z");
        assert_eq!(Time::from_rfc3339(&t.to_rfc3339()), Some(t));
    }

    #[test]
    fn checked_duration_since_is_ordered() {
        let early = Time::from_timestamp(100).unwrap();
        let late = Time::from_timestamp(160).unwrap();
        assert_eq!(
            late.checked_duration_since(early),
            Some(Duration::from_secs(60))
        );
        assert_eq!(early.checked_duration_since(late), None);
    }

    #[test]
    fn mock_provider_is_programmable() {
        let provider = MockProvider::new(Time::from_timestamp(0).unwrap());
        assert_eq!(provider.now().timestamp(), 0);

        provider.inc(Duration::from_secs(3600));
        assert_eq!(provider.now().timestamp(), 3600);

        provider.set(Time::from_timestamp(42).unwrap());
        assert_eq!(provider.now().timestamp(), 42);
    }
}
