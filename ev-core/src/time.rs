//! Timestamp helpers
//!
//! Ledger timestamps are truncated to millisecond precision before hashing
//! so that any store with at least millisecond resolution returns values
//! that reproduce the stored hash.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

/// Current time truncated to milliseconds
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// ISO-8601 with millisecond precision and `Z` suffix
pub fn to_iso(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_iso_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();
        assert_eq!(to_iso(&ts), "2024-03-01T12:00:05.000Z");
    }

    #[test]
    fn test_now_millis_has_no_sub_millisecond_part() {
        let ts = now_millis();
        assert_eq!(ts.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
