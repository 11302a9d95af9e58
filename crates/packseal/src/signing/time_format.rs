//! Signing-time formats (W3C date-time profiles).

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::{PackResult, PackageError};

/// Default signing-time format.
pub const DEFAULT_TIME_FORMAT: &str = "YYYY-MM-DDThh:mm:ss.sTZD";

/// Accepted format strings and their chrono equivalents.
const FORMATS: &[(&str, &str)] = &[
    ("YYYY-MM-DDThh:mm:ss.sTZD", "%Y-%m-%dT%H:%M:%S%.fZ"),
    ("YYYY-MM-DDThh:mm:ssTZD", "%Y-%m-%dT%H:%M:%SZ"),
    ("YYYY-MM-DDThh:mmTZD", "%Y-%m-%dT%H:%MZ"),
    ("YYYY-MM-DD", "%Y-%m-%d"),
    ("YYYY-MM", "%Y-%m"),
    ("YYYY", "%Y"),
];

fn chrono_pattern(time_format: &str) -> PackResult<&'static str> {
    FORMATS
        .iter()
        .find(|(name, _)| *name == time_format)
        .map(|(_, pattern)| *pattern)
        .ok_or_else(|| {
            PackageError::validation(format!("unsupported signing time format: {time_format}"))
        })
}

/// Whether `time_format` is one of the accepted format strings.
pub fn is_supported(time_format: &str) -> bool {
    chrono_pattern(time_format).is_ok()
}

/// Render `time` in `time_format`.
pub fn format_time(time: DateTime<Utc>, time_format: &str) -> PackResult<String> {
    Ok(time.format(chrono_pattern(time_format)?).to_string())
}

/// Parse a value written by [`format_time`]. Missing components default to
/// the start of the period.
pub fn parse_time(value: &str, time_format: &str) -> PackResult<DateTime<Utc>> {
    let pattern = chrono_pattern(time_format)?;
    let invalid = |e: chrono::ParseError| {
        PackageError::format(format!(
            "signing time '{value}' does not match {time_format}: {e}"
        ))
    };

    let naive = match time_format {
        "YYYY-MM-DD" => NaiveDate::parse_from_str(value, pattern).map_err(invalid)?,
        "YYYY-MM" => NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").map_err(invalid)?,
        "YYYY" => {
            NaiveDate::parse_from_str(&format!("{value}-01-01"), "%Y-%m-%d").map_err(invalid)?
        }
        _ => return Ok(NaiveDateTime::parse_from_str(value, pattern).map_err(invalid)?.and_utc()),
    };
    Ok(naive.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
}
