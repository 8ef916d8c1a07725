//! Aggregation keys and report rows.
//!
//! An [`AggregationKey`] is the `(event_date, event_name)` pair every accepted
//! event is counted under. Keys order by date first, then by name, which is
//! the order spill segments are written in and the order the final report is
//! emitted in.

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use time::Date;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// Calendar date layout used in keys, segments and reports.
pub const DATE_FORMAT: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day]");

// `YYYY-MM-DD`, optionally followed by a `T` or space separated time part.
static DATE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})(?:[T ].*)?$").expect("date prefix pattern is valid")
});

/// Truncate a timestamp such as `2018-01-30T10:00:00.000Z` or
/// `2018-01-30 10:00:00` to its calendar day.
///
/// Returns `None` when the value does not start with a valid calendar date.
#[must_use]
pub fn date_from_timestamp(raw: &str) -> Option<Date> {
    let captures = DATE_PREFIX.captures(raw.trim())?;
    Date::parse(captures.get(1)?.as_str(), DATE_FORMAT).ok()
}

/// The `(event_date, event_name)` pair counts are grouped by.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AggregationKey {
    pub event_date: Date,
    pub event_name: String,
}

impl AggregationKey {
    pub fn new(event_date: Date, event_name: impl Into<String>) -> Self {
        Self {
            event_date,
            event_name: event_name.into(),
        }
    }

    /// Build a key from an ISO date string, mostly useful in tests and fixtures.
    ///
    /// # Errors
    /// Returns an error if `date` is not a valid `YYYY-MM-DD` calendar date.
    pub fn parse(date: &str, event_name: impl Into<String>) -> Result<Self> {
        let event_date =
            Date::parse(date, DATE_FORMAT).with_context(|| format!("parse date {date:?}"))?;
        Ok(Self::new(event_date, event_name))
    }
}

impl Ord for AggregationKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.event_date
            .cmp(&other.event_date)
            .then_with(|| self.event_name.cmp(&other.event_name))
    }
}

impl PartialOrd for AggregationKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let date = self.event_date.format(DATE_FORMAT).map_err(|_| fmt::Error)?;
        write!(f, "{date} {}", self.event_name)
    }
}

/// One line of the final report: a key and its total count across the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportRow {
    pub key: AggregationKey,
    pub count: u64,
}

impl ReportRow {
    pub fn new(key: AggregationKey, count: u64) -> Self {
        Self { key, count }
    }
}

impl fmt::Display for ReportRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.key, self.count)
    }
}

impl FromStr for ReportRow {
    type Err = anyhow::Error;

    /// Parse a `<event_date> <event_name>,<count>` report line.
    fn from_str(line: &str) -> Result<Self> {
        let (key, count) = line
            .rsplit_once(',')
            .ok_or_else(|| anyhow!("missing count separator in {line:?}"))?;
        let (date, name) = key
            .split_once(' ')
            .ok_or_else(|| anyhow!("missing date separator in {line:?}"))?;
        let count = count
            .trim()
            .parse::<u64>()
            .with_context(|| format!("parse count in {line:?}"))?;
        Ok(Self::new(AggregationKey::parse(date, name)?, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_timestamps_to_the_day() {
        let expected = AggregationKey::parse("2018-01-30", "x").unwrap().event_date;
        for raw in [
            "2018-01-30",
            "2018-01-30T10:11:12.000Z",
            "2018-01-30 10:11:12.000",
        ] {
            assert_eq!(date_from_timestamp(raw), Some(expected), "{raw}");
        }
    }

    #[test]
    fn rejects_malformed_dates() {
        for raw in ["", "2018-1-30", "2018-02-30", "30-01-2018", "2018-01-30X00"] {
            assert_eq!(date_from_timestamp(raw), None, "{raw}");
        }
    }

    #[test]
    fn orders_by_date_then_name() {
        let a = AggregationKey::parse("2018-01-30", "zeta").unwrap();
        let b = AggregationKey::parse("2018-02-03", "alpha").unwrap();
        let c = AggregationKey::parse("2018-02-03", "beta").unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn report_row_display_and_parse_agree() {
        let row: ReportRow = "2018-01-30 submission_success,12".parse().unwrap();
        assert_eq!(row.count, 12);
        assert_eq!(row.key.event_name, "submission_success");
        assert_eq!(row.to_string(), "2018-01-30 submission_success,12");
    }
}
