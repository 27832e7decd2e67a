//! Core value types shared by both engines.
//!
//! Types use smart constructors so that an out-of-range value can never be
//! constructed, following the "parse, don't validate" principle.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};

/// The version of a stream or of an event within a stream.
///
/// Event versions start at 0. A stream that has never been written has a
/// commit version of -1, see [`StreamVersion::new_stream`].
#[nutype(
    validate(greater_or_equal = -1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct StreamVersion(i64);

impl StreamVersion {
    /// The commit version of a stream with no durable events.
    pub fn new_stream() -> Self {
        Self::try_new(-1).expect("-1 is always a valid version")
    }

    /// The version of the first event in a stream.
    pub fn initial() -> Self {
        Self::try_new(0).expect("0 is always a valid version")
    }

    /// Returns whether this is the version of a never-written stream.
    pub fn is_new_stream(self) -> bool {
        self.into_inner() == -1
    }

    /// Returns the version `count` events after this one.
    #[must_use]
    pub fn advance(self, count: usize) -> Self {
        let count = i64::try_from(count).expect("event counts fit in i64");
        // Adding a non-negative offset to a value >= -1 stays >= -1
        Self::try_new(self.into_inner() + count).expect("advanced version should always be valid")
    }

    /// Returns the next version after this one.
    #[must_use]
    pub fn next(self) -> Self {
        self.advance(1)
    }
}

/// A timestamp for when a message arrived or an event occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a new timestamp from a UTC `DateTime`.
    pub const fn new(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// Creates a timestamp representing the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn stream_version_accepts_minus_one_and_above(v in -1i64..=i64::MAX) {
            let version = StreamVersion::try_new(v);
            prop_assert!(version.is_ok());
            let value: i64 = version.unwrap().into();
            prop_assert_eq!(value, v);
        }

        #[test]
        fn stream_version_rejects_values_below_minus_one(v in i64::MIN..-1i64) {
            prop_assert!(StreamVersion::try_new(v).is_err());
        }

        #[test]
        fn advance_adds_the_event_count(v in -1i64..1_000_000, count in 0usize..10_000) {
            let advanced = StreamVersion::try_new(v).unwrap().advance(count);
            prop_assert_eq!(advanced.into_inner(), v + count as i64);
        }

        #[test]
        fn stream_version_ordering_matches_values(v1 in -1i64..1_000_000, v2 in -1i64..1_000_000) {
            let a = StreamVersion::try_new(v1).unwrap();
            let b = StreamVersion::try_new(v2).unwrap();
            prop_assert_eq!(a < b, v1 < v2);
        }
    }

    #[test]
    fn new_stream_version_is_minus_one() {
        assert!(StreamVersion::new_stream().is_new_stream());
        assert_eq!(StreamVersion::new_stream().next(), StreamVersion::initial());
        assert!(!StreamVersion::initial().is_new_stream());
    }

    #[test]
    fn stream_version_serializes_as_a_plain_number() {
        let version = StreamVersion::try_new(12).unwrap();
        assert_eq!(serde_json::to_string(&version).unwrap(), "12");
    }

    #[test]
    fn timestamp_now_creates_current_time() {
        let before = Utc::now();
        let timestamp = Timestamp::now();
        let after = Utc::now();

        assert!(timestamp.as_datetime() >= &before);
        assert!(timestamp.as_datetime() <= &after);
    }
}
