//! Timestamp utilities
//!
//! Seismogram times are absolute UTC timestamps with nanosecond resolution;
//! offsets (time shifts, padding, travel times) arrive as float seconds.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Absolute time used throughout the services
pub type Timestamp = DateTime<Utc>;

/// Convert float seconds to a nanosecond-resolution duration
pub fn seconds_to_duration(seconds: f64) -> chrono::Duration {
    chrono::Duration::nanoseconds((seconds * 1e9).round() as i64)
}

/// Shift a timestamp by a (possibly negative) number of seconds
pub fn shift_seconds(time: Timestamp, seconds: f64) -> Timestamp {
    time + seconds_to_duration(seconds)
}

/// Signed number of seconds from `from` to `to`
pub fn seconds_between(from: Timestamp, to: Timestamp) -> f64 {
    let delta = to - from;
    match delta.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1e9,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}

/// Parse an absolute time string
///
/// Accepts RFC 3339 (`2020-01-01T00:00:00Z`), naive date-times interpreted as
/// UTC (`2020-01-01T00:00:00.5`, `2020-01-01 00:00:00`) and plain dates.
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.with_timezone(&Utc));
    }

    let naive = value.strip_suffix('Z').unwrap_or(value);
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(time) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(Utc.from_utc_datetime(&time));
        }
    }

    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|time| Utc.from_utc_datetime(&time))
}

/// Render a timestamp for diagnostics (microsecond precision, `Z` suffix)
pub fn format_timestamp(time: Timestamp) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}
