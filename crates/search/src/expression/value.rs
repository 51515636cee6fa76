//! Parsing of raw quantity and date parameter values.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::error::ConfigurationError;

/// Comparison prefixes accepted in front of quantity and date values.
const PREFIXES: [&str; 9] = ["eq", "ne", "lt", "le", "gt", "ge", "sa", "eb", "ap"];

/// Splits a leading comparison prefix from a value.
///
/// A prefix is only recognised when followed by something that can start a
/// number or a date, so `"eq5"` yields `("eq", "5")` while `"equal"` is left alone.
pub(crate) fn split_prefix(raw: &str) -> (Option<&str>, &str) {
    if raw.len() > 2 && raw.is_char_boundary(2) {
        let (prefix, rest) = raw.split_at(2);
        let starts_value = rest
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'));
        if starts_value && PREFIXES.contains(&prefix) {
            return (Some(prefix), rest);
        }
    }
    (None, raw)
}

/// Parses the numeric part of a quantity value (`5.4|system|code` keeps `5.4`).
pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal, ConfigurationError> {
    let number = raw.split('|').next().unwrap_or_default().trim();
    Decimal::from_str(number)
        .or_else(|_| Decimal::from_scientific(number))
        .map_err(|e| ConfigurationError::InvalidValue {
            value: raw.to_string(),
            param_type: "quantity".to_string(),
            message: e.to_string(),
        })
}

/// Returns the half-open interval `[start, end)` covered by a date literal at
/// its stated precision.
///
/// Supported forms: `YYYY`, `YYYY-MM`, `YYYY-MM-DD` (all UTC) and RFC 3339
/// instants, which cover one second, or one millisecond when fractional
/// seconds are given.
pub(crate) fn parse_date_bounds(
    raw: &str,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ConfigurationError> {
    let invalid = |message: &str| ConfigurationError::InvalidValue {
        value: raw.to_string(),
        param_type: "date".to_string(),
        message: message.to_string(),
    };

    let midnight = |date: NaiveDate| -> Result<DateTime<Utc>, ConfigurationError> {
        let naive: NaiveDateTime = date.and_hms_opt(0, 0, 0).ok_or_else(|| invalid("bad date"))?;
        Ok(Utc.from_utc_datetime(&naive))
    };

    match raw.len() {
        4 => {
            let year: i32 = raw.parse().map_err(|_| invalid("expected YYYY"))?;
            let start = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(|| invalid("bad year"))?;
            let end = NaiveDate::from_ymd_opt(year + 1, 1, 1).ok_or_else(|| invalid("bad year"))?;
            Ok((midnight(start)?, midnight(end)?))
        }
        7 => {
            let start = NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d")
                .map_err(|_| invalid("expected YYYY-MM"))?;
            let end = if start.month() == 12 {
                NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
            }
            .ok_or_else(|| invalid("bad month"))?;
            Ok((midnight(start)?, midnight(end)?))
        }
        10 => {
            let start = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| invalid("expected YYYY-MM-DD"))?;
            let start = midnight(start)?;
            Ok((start, start + Duration::days(1)))
        }
        _ => {
            let instant = DateTime::parse_from_rfc3339(raw)
                .map_err(|e| invalid(&e.to_string()))?
                .with_timezone(&Utc);
            let width = if raw.contains('.') {
                Duration::milliseconds(1)
            } else {
                Duration::seconds(1)
            };
            Ok((instant, instant + width))
        }
    }
}

/// Converts a prefixed date literal to range bounds.
pub(crate) fn date_range_for(
    raw: &str,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), ConfigurationError> {
    let (prefix, literal) = split_prefix(raw);
    let (start, end) = parse_date_bounds(literal)?;
    match prefix.unwrap_or("eq") {
        "eq" => Ok((Some(start), Some(end))),
        "lt" | "eb" => Ok((None, Some(start))),
        "le" => Ok((None, Some(end))),
        "gt" | "sa" => Ok((Some(end), None)),
        "ge" => Ok((Some(start), None)),
        other => Err(ConfigurationError::UnsupportedOperator {
            operator: other.to_string(),
            param_type: "date".to_string(),
        }),
    }
}
