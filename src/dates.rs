//! Relative timestamp rendering for chat lists and message views.
//!
//! Same-day messages show a clock time, yesterday's show "yesterday",
//! anything older shows the calendar date.

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Render a Unix timestamp relative to `now`.
pub fn relative_date(timestamp: i64, now: DateTime<Utc>) -> String {
    if timestamp <= 0 {
        return String::new();
    }

    let Some(date) = Utc.timestamp_opt(timestamp, 0).single() else {
        return String::new();
    };

    if date.date_naive() == now.date_naive() {
        return date.format("%H:%M").to_string();
    }

    if date.date_naive() == (now - Duration::days(1)).date_naive() {
        return "yesterday".to_string();
    }

    date.format("%Y-%m-%d").to_string()
}

/// Clock time for an in-conversation message row.
pub fn clock_time(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|date| date.format("%H:%M").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 15, 4, 5)
            .single()
            .expect("valid datetime")
    }

    fn utc_ts(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> i64 {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .expect("valid datetime")
            .timestamp()
    }

    #[test]
    fn same_day_shows_clock_time() {
        let now = test_now();
        assert_eq!(relative_date(utc_ts(2026, 1, 28, 9, 30), now), "09:30");
    }

    #[test]
    fn previous_day_shows_yesterday() {
        let now = test_now();
        assert_eq!(relative_date(utc_ts(2026, 1, 27, 23, 59), now), "yesterday");
    }

    #[test]
    fn older_shows_date() {
        let now = test_now();
        assert_eq!(relative_date(utc_ts(2025, 12, 24, 12, 0), now), "2025-12-24");
    }

    #[test]
    fn missing_timestamp_renders_empty() {
        let now = test_now();
        assert_eq!(relative_date(0, now), "");
        assert_eq!(relative_date(-5, now), "");
    }
}
