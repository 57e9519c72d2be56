//! Modification-date filtering.
//!
//! Two optional bounds become one of four modes. A reversed pair (before earlier
//! than after) is swapped so a typo never silently filters out the whole tree.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilterMode {
    All,
    UpperBoundOnly,
    LowerBoundOnly,
    Between,
}

impl fmt::Display for DateFilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::All => "All",
            Self::UpperBoundOnly => "Upperbound",
            Self::LowerBoundOnly => "Lowerbound",
            Self::Between => "Between",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{field} '{value}' is not a recognizable date")]
pub struct DateParseError {
    pub field: &'static str,
    pub value: String,
}

/// Resolved bounds in unix seconds. `before` is the upper bound, `after` the
/// lower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub mode: DateFilterMode,
    pub before: Option<i64>,
    pub after: Option<i64>,
}

impl Default for DateRange {
    fn default() -> Self {
        Self::from_bounds(None, None)
    }
}

impl DateRange {
    /// Parse the raw config strings. Empty strings mean "no bound".
    pub fn resolve(before: &str, after: &str) -> Result<Self, DateParseError> {
        let before = parse_bound("beforeDate", before)?;
        let after = parse_bound("afterDate", after)?;
        Ok(Self::from_bounds(before, after))
    }

    pub fn from_bounds(before: Option<i64>, after: Option<i64>) -> Self {
        let (before, after) = match (before, after) {
            (Some(b), Some(a)) if b < a => (Some(a), Some(b)),
            pair => pair,
        };

        let mode = match (before, after) {
            (None, None) => DateFilterMode::All,
            (Some(_), None) => DateFilterMode::UpperBoundOnly,
            (None, Some(_)) => DateFilterMode::LowerBoundOnly,
            (Some(_), Some(_)) => DateFilterMode::Between,
        };

        Self { mode, before, after }
    }

    pub fn is_active(&self) -> bool {
        self.mode != DateFilterMode::All
    }

    /// Whether a modification time (unix seconds) falls inside the range.
    pub fn contains(&self, mtime: i64) -> bool {
        match (self.mode, self.before, self.after) {
            (DateFilterMode::All, _, _) => true,
            (DateFilterMode::UpperBoundOnly, Some(before), _) => mtime <= before,
            (DateFilterMode::LowerBoundOnly, _, Some(after)) => after <= mtime,
            (DateFilterMode::Between, Some(before), Some(after)) => {
                after <= mtime && mtime <= before
            }
            _ => false,
        }
    }
}

fn parse_bound(field: &'static str, raw: &str) -> Result<Option<i64>, DateParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    parse_timestamp(raw).map(Some).ok_or_else(|| DateParseError {
        field,
        value: raw.to_string(),
    })
}

/// Accepts RFC 3339, `YYYY-MM-DD[ HH:MM[:SS]]` in local time, or a relative
/// `<duration> ago` such as `7days ago`.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return local_timestamp(naive);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return local_timestamp(date.and_hms_opt(0, 0, 0)?);
    }

    let ago = raw.strip_suffix("ago")?.trim();
    let span = humantime::parse_duration(ago).ok()?;
    let span = chrono::Duration::from_std(span).ok()?;
    Some((Local::now() - span).timestamp())
}

fn local_timestamp(naive: NaiveDateTime) -> Option<i64> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}

/// Format a bound for log lines.
pub fn format_day(timestamp: i64) -> String {
    Local
        .timestamp_opt(timestamp, 0)
        .earliest()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ts(date: &str) -> i64 {
        parse_timestamp(date).unwrap()
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(DateRange::resolve("", "").unwrap().mode, DateFilterMode::All);
        assert_eq!(
            DateRange::resolve("2024-06-01", "").unwrap().mode,
            DateFilterMode::UpperBoundOnly
        );
        assert_eq!(
            DateRange::resolve("", "2024-01-01").unwrap().mode,
            DateFilterMode::LowerBoundOnly
        );
        assert_eq!(
            DateRange::resolve("2024-06-01", "2024-01-01").unwrap().mode,
            DateFilterMode::Between
        );
    }

    #[test]
    fn test_between_membership() {
        let range = DateRange::resolve("2024-06-01", "2024-01-01").unwrap();
        assert!(range.contains(ts("2024-03-15")));
        assert!(!range.contains(ts("2023-12-31")));
        assert!(!range.contains(ts("2024-06-02")));
        // bounds are inclusive
        assert!(range.contains(ts("2024-01-01")));
        assert!(range.contains(ts("2024-06-01")));
    }

    #[test]
    fn test_reversed_bounds_are_swapped() {
        let range = DateRange::resolve("2024-01-01", "2024-06-01").unwrap();
        assert_eq!(range.mode, DateFilterMode::Between);
        assert_eq!(range.before, Some(ts("2024-06-01")));
        assert_eq!(range.after, Some(ts("2024-01-01")));
        assert!(range.contains(ts("2024-03-15")));
    }

    #[test]
    fn test_single_bounds() {
        let upper = DateRange::resolve("2024-06-01", "").unwrap();
        assert!(upper.contains(ts("2020-01-01")));
        assert!(!upper.contains(ts("2024-07-01")));

        let lower = DateRange::resolve("", "2024-01-01").unwrap();
        assert!(lower.contains(ts("2030-01-01")));
        assert!(!lower.contains(ts("2023-12-31")));
    }

    #[test]
    fn test_accepted_formats() {
        assert!(parse_timestamp("2024-01-01T00:00:00Z").is_some());
        assert!(parse_timestamp("2024-01-01 12:30:00").is_some());
        assert!(parse_timestamp("2024-01-01 12:30").is_some());
        assert!(parse_timestamp("2024-01-01").is_some());

        let week_ago = parse_timestamp("7days ago").unwrap();
        let now = Local::now().timestamp();
        assert!((now - week_ago - 7 * 86_400).abs() < 5);
    }

    #[test]
    fn test_unparseable_date_is_an_error() {
        let err = DateRange::resolve("next tuesday-ish", "").unwrap_err();
        assert_eq!(err.field, "beforeDate");
        assert_eq!(err.value, "next tuesday-ish");
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(DateFilterMode::LowerBoundOnly.to_string(), "Lowerbound");
        assert_eq!(format_day(ts("2024-03-15")), "2024-03-15");
    }

    proptest! {
        #[test]
        fn test_normalized_range_is_ordered(a in -1_000_000_000i64..4_000_000_000, b in -1_000_000_000i64..4_000_000_000) {
            let range = DateRange::from_bounds(Some(a), Some(b));
            prop_assert_eq!(range.mode, DateFilterMode::Between);
            prop_assert!(range.before.unwrap() >= range.after.unwrap());
            prop_assert!(range.contains(a));
            prop_assert!(range.contains(b));
        }
    }
}
