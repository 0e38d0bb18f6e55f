// File: src/time.rs

use chrono::{DateTime, Utc};
use humantime::parse_duration;
use std::time::Duration;

use crate::error::ConfigError;
use crate::parsers::LogRecord;

/// Field carrying the request receipt time (`%t`).
pub const TIME_RECEIVED_FIELD: &str = "time_received";

const CLF_TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Parses a collection interval.
/// Accepts bare seconds ("10", "0.5") and humantime durations ("10s", "1m 30s").
pub fn parse_interval(value: &str) -> Result<Duration, ConfigError> {
    let trimmed = value.trim();

    let duration = if let Ok(secs) = trimmed.parse::<f64>() {
        if !secs.is_finite() || secs < 0.0 {
            return Err(ConfigError::InvalidInterval {
                value: value.to_string(),
            });
        }
        Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidInterval {
            value: value.to_string(),
        })?
    } else {
        parse_duration(trimmed).map_err(|_| ConfigError::InvalidInterval {
            value: value.to_string(),
        })?
    };

    if duration.is_zero() {
        return Err(ConfigError::IntervalZero);
    }
    Ok(duration)
}

/// Parses a CLF timestamp such as `10/Oct/2000:13:55:36 -0700`.
pub fn parse_clf_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim().trim_start_matches('[').trim_end_matches(']');
    DateTime::parse_from_str(raw, CLF_TIME_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Formats `at` the way `%t` writes it (without brackets).
pub fn format_clf_timestamp(at: DateTime<Utc>) -> String {
    at.format(CLF_TIME_FORMAT).to_string()
}

/// Extracts and parses the receipt time of a parsed line, if it has one.
pub fn record_timestamp(record: &LogRecord) -> Option<DateTime<Utc>> {
    record.get(TIME_RECEIVED_FIELD).and_then(parse_clf_timestamp)
}
