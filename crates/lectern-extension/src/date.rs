//! Date helpers (`date.*` in scripts). Timestamps are Unix milliseconds, UTC.

use crate::error::{ExtensionError, ExtensionResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fmt::Write;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse `text` with a strftime-style `format`. Formats without a time part
/// resolve to midnight.
pub fn parse(text: &str, format: &str) -> ExtensionResult<i64> {
    let text = text.trim();
    if let Ok(stamp) = DateTime::parse_from_str(text, format) {
        return Ok(stamp.timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
        return Ok(naive.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(text, format)
        .map_err(|e| {
            ExtensionError::Date(format!("cannot parse '{}' as '{}': {}", text, format, e))
        })
        .and_then(|date| {
            date.and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc().timestamp_millis())
                .ok_or_else(|| ExtensionError::Date("invalid midnight".to_string()))
        })
}

pub fn parse_rfc3339(text: &str) -> ExtensionResult<i64> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|stamp| stamp.timestamp_millis())
        .map_err(|e| ExtensionError::Date(e.to_string()))
}

/// Format a millisecond timestamp. An invalid format string is an error,
/// not a panic.
pub fn format(millis: i64, format: &str) -> ExtensionResult<String> {
    let stamp = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| ExtensionError::Date(format!("timestamp out of range: {}", millis)))?;
    let mut out = String::new();
    write!(out, "{}", stamp.format(format))
        .map_err(|_| ExtensionError::Date(format!("invalid format string: {}", format)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        assert_eq!(parse("1970-01-02", "%Y-%m-%d").unwrap(), 86_400_000);
        assert_eq!(parse("1970-01-01 00:00:01", "%Y-%m-%d %H:%M:%S").unwrap(), 1_000);
        assert_eq!(
            parse("1970-01-01T01:00:00+01:00", "%Y-%m-%dT%H:%M:%S%:z").unwrap(),
            0
        );
        assert!(parse("yesterday", "%Y-%m-%d").is_err());
    }

    #[test]
    fn test_format_round_trip() {
        assert_eq!(format(86_400_000, "%Y-%m-%d").unwrap(), "1970-01-02");
        assert!(format(0, "%Q").is_err());
        assert_eq!(parse_rfc3339("1970-01-01T00:00:02Z").unwrap(), 2_000);
    }
}
