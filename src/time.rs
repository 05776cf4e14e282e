//! Monotonic clock, UTC calendar breakdown, and local time offset.
//!
//! Ported from `xtime.c`: the local time offset is computed the same way
//! (compare a UTC calendar breakdown re-interpreted as local against a local
//! breakdown re-interpreted as UTC) rather than trusting a fixed offset, so
//! it tracks DST transitions correctly.

use chrono::{Datelike, Local, TimeZone, Timelike, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// UTC calendar breakdown, mirroring the fields `backstage.c` reads off
/// `struct tm` after `gmtime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

/// Source of monotonic and wall-clock time. A trait so tests can substitute
/// a fixed clock instead of `SystemTime::now()`.
pub trait TimeSource: Send + Sync {
    fn monotonic_microseconds(&self) -> i64;
    fn utc_milliseconds(&self) -> i64;

    fn utc_calendar(&self, utc_ms: i64) -> CalendarTime {
        calendar_from_millis(utc_ms)
    }

    fn local_time_offset_seconds(&self, utc_ms: i64) -> i32 {
        local_time_offset_seconds(utc_ms)
    }
}

/// Real clock backed by `SystemTime`/`chrono`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn monotonic_microseconds(&self) -> i64 {
        // SystemTime isn't strictly monotonic across clock adjustments, but
        // matches the original's use of a single wall clock for both
        // monotonic pacing and UTC bookkeeping.
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        now.as_micros() as i64
    }

    fn utc_milliseconds(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        now.as_millis() as i64
    }
}

pub fn calendar_from_millis(utc_ms: i64) -> CalendarTime {
    let dt = Utc
        .timestamp_millis_opt(utc_ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap());
    CalendarTime {
        year: dt.year(),
        month: dt.month(),
        day: dt.day(),
        hour: dt.hour(),
        minute: dt.minute(),
        second: dt.second(),
    }
}

/// DST-aware offset of local time from UTC, in seconds, at the instant
/// `utc_ms`. Computed the same way as `Time_getLocalTimeOffset`: take the
/// local calendar fields as if they already were UTC, and diff against the
/// true UTC instant.
pub fn local_time_offset_seconds(utc_ms: i64) -> i32 {
    let utc_dt = Utc
        .timestamp_millis_opt(utc_ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap());
    let local_dt = utc_dt.with_timezone(&Local);
    let naive_local = local_dt.naive_local();
    let reinterpreted_as_utc = Utc.from_utc_datetime(&naive_local);
    (reinterpreted_as_utc.timestamp() - utc_dt.timestamp()) as i32
}

/// Formats an offset in seconds as `UTC+H[:MM]` / `UTC-H[:MM]`.
pub fn format_utc_offset(offset_seconds: i32) -> String {
    let sign = if offset_seconds < 0 { '-' } else { '+' };
    let total_minutes = offset_seconds.abs() / 60;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if minutes == 0 {
        format!("UTC{sign}{hours}")
    } else {
        format!("UTC{sign}{hours}:{minutes:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_breakdown_matches_known_instant() {
        // 2024-03-01T12:34:56Z
        let ms = Utc.with_ymd_and_hms(2024, 3, 1, 12, 34, 56).unwrap().timestamp_millis();
        let cal = calendar_from_millis(ms);
        assert_eq!(cal.year, 2024);
        assert_eq!(cal.month, 3);
        assert_eq!(cal.day, 1);
        assert_eq!(cal.hour, 12);
        assert_eq!(cal.minute, 34);
        assert_eq!(cal.second, 56);
    }

    #[test]
    fn format_offset_handles_whole_and_fractional_hours() {
        assert_eq!(format_utc_offset(0), "UTC+0");
        assert_eq!(format_utc_offset(3600), "UTC+1");
        assert_eq!(format_utc_offset(-3600), "UTC-1");
        assert_eq!(format_utc_offset(19800), "UTC+5:30");
        assert_eq!(format_utc_offset(-19800), "UTC-5:30");
    }

    #[test]
    fn system_time_source_is_monotone_increasing() {
        let src = SystemTimeSource;
        let a = src.monotonic_microseconds();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = src.monotonic_microseconds();
        assert!(b >= a);
    }
}
