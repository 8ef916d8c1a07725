//! Assertions over report rows.

use crate::key::{AggregationKey, ReportRow};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

/// Assert that rows are strictly ascending by key, which also rules out
/// duplicate keys.
///
/// # Panics
///
/// Panics on the first pair of rows out of order.
///
/// # Example
///
/// ```
/// use event_counter::testing::{assert_report_sorted_unique, parse_report_str};
///
/// let rows = parse_report_str("2018-01-01 a,1\n2018-01-01 b,2\n").unwrap();
/// assert_report_sorted_unique(&rows);
/// ```
pub fn assert_report_sorted_unique(rows: &[ReportRow]) {
    for (i, pair) in rows.windows(2).enumerate() {
        assert!(
            pair[0].key < pair[1].key,
            "Report rows out of order at index {}:\n  Previous: {}\n  Next: {}",
            i + 1,
            pair[0],
            pair[1]
        );
    }
}

/// Assert that rows carry exactly the expected counts, in key order.
///
/// # Panics
///
/// Panics if a key is missing, extra, or has a different count.
pub fn assert_report_matches(rows: &[ReportRow], expected: &BTreeMap<AggregationKey, u64>) {
    let actual: Vec<(&AggregationKey, u64)> = rows.iter().map(|r| (&r.key, r.count)).collect();
    let wanted: Vec<(&AggregationKey, u64)> = expected.iter().map(|(k, n)| (k, *n)).collect();
    assert_eq!(
        actual.len(),
        wanted.len(),
        "Report length mismatch:\n  Expected: {wanted:?}\n  Actual: {actual:?}"
    );
    for (i, (a, e)) in actual.iter().zip(&wanted).enumerate() {
        assert_eq!(a, e, "Report mismatch at row {i}:\n  Expected: {e:?}\n  Actual: {a:?}");
    }
}

/// Sum of all counts in a report.
#[must_use]
pub fn report_total(rows: &[ReportRow]) -> u64 {
    rows.iter().map(|r| r.count).sum()
}

/// Parse report text, one row per non-empty line.
///
/// # Errors
/// Returns an error naming the first malformed line.
pub fn parse_report_str(text: &str) -> Result<Vec<ReportRow>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .map(|(i, line)| {
            line.parse()
                .with_context(|| format!("parse report line {}", i + 1))
        })
        .collect()
}

/// Turn a count map into the rows a correct report would contain.
#[must_use]
pub fn rows_from_counts(counts: &BTreeMap<AggregationKey, u64>) -> Vec<ReportRow> {
    counts
        .iter()
        .map(|(key, count)| ReportRow::new(key.clone(), *count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "out of order")]
    fn duplicate_keys_are_caught() {
        let rows = parse_report_str("2018-01-01 a,1\n2018-01-01 a,2\n").unwrap();
        assert_report_sorted_unique(&rows);
    }

    #[test]
    fn totals_add_up() {
        let rows = parse_report_str("2018-01-01 a,1\n2018-01-02 a,2\n").unwrap();
        assert_eq!(report_total(&rows), 3);
    }
}
