//! `--since` argument parsing
//!
//! Accepted forms:
//! - `YYYY-MM-DD-HH:MM` and `YYYY-MM-DD` (UTC)
//! - relative `[#D][#H][#M][#S]`, case-insensitive, subtracted from now

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{Result, SyncError};

static DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(\d+)D)?(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$")
        .expect("duration pattern should always be valid")
});

pub fn parse_since(input: &str) -> Result<DateTime<Utc>> {
    parse_since_at(input, Utc::now())
}

/// `parse_since` with an explicit "now"
pub fn parse_since_at(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(at) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d-%H:%M") {
        return Ok(at.and_utc());
    }
    if let Ok(day) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        if let Some(midnight) = day.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }

    let invalid = || {
        SyncError::invalid_argument(format!("'{}' could not be interpreted as a datetime", input))
    };
    let captures = DURATION.captures(input).ok_or_else(invalid)?;

    let mut ago = Duration::zero();
    let mut matched = false;
    for (group, unit) in [(1, 86_400), (2, 3_600), (3, 60), (4, 1)] {
        if let Some(amount) = captures.get(group) {
            let amount: i64 = amount.as_str().parse().map_err(|_| invalid())?;
            let seconds = amount.checked_mul(unit).ok_or_else(invalid)?;
            ago = ago
                .checked_add(&Duration::try_seconds(seconds).ok_or_else(invalid)?)
                .ok_or_else(invalid)?;
            matched = true;
        }
    }
    if !matched {
        return Err(invalid());
    }
    now.checked_sub_signed(ago).ok_or_else(invalid)
}

/// clap value parser
pub(crate) fn since_arg(input: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_since(input).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_absolute_forms() {
        assert_eq!(
            parse_since_at("2024-01-05-14:30", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 5, 14, 30, 0).unwrap()
        );
        assert_eq!(
            parse_since_at("2024-01-05", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_relative_forms() {
        assert_eq!(
            parse_since_at("1d2h", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap()
        );
        assert_eq!(
            parse_since_at("30M", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 10, 11, 30, 0).unwrap()
        );
        assert_eq!(
            parse_since_at("1H15m10s", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 10, 10, 44, 50).unwrap()
        );
    }

    #[test]
    fn test_rejects_garbage() {
        for input in ["", "yesterday", "2024-13-01", "5W", "1h1d"] {
            assert!(
                matches!(parse_since_at(input, now()), Err(SyncError::InvalidArgument(_))),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn test_duration_pattern_is_case_insensitive_and_ordered() {
        assert!(DURATION.is_match("2D3h"));
        assert!(DURATION.is_match("45s"));
        assert!(!DURATION.is_match("3h2d"));
        assert!(!DURATION.is_match("2 days"));
    }
}
