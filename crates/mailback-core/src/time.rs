//! Timestamp encoding shared by the store and the engine.
//!
//! Timestamps are persisted as RFC 3339 UTC strings with millisecond
//! precision and a `Z` suffix. With a fixed width, lexical order equals
//! chronological order, so SQL comparisons on the text columns are exact.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::errors::{CoreError, Result};

/// Format a timestamp in the canonical persisted form.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a persisted timestamp.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::InvalidTimestamp {
            value: value.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn format_is_millis_with_z() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_timestamp(ts), "2026-03-04T05:06:07.000Z");
    }

    #[test]
    fn parse_roundtrip() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap() + Duration::milliseconds(250);
        assert_eq!(parse_timestamp(&format_timestamp(ts)).unwrap(), ts);
    }

    #[test]
    fn parse_accepts_offsets() {
        let parsed = parse_timestamp("2026-01-01T02:00:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_timestamp("not a time").is_err());
    }

    #[test]
    fn lexical_order_matches_chronological() {
        let a = Utc.with_ymd_and_hms(2026, 1, 9, 23, 59, 59).unwrap();
        let b = a + Duration::milliseconds(1);
        assert!(format_timestamp(a) < format_timestamp(b));
    }
}
