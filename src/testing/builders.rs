//! Builders for JSON Lines event logs.

use crate::key::{AggregationKey, date_from_timestamp};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// One event record, built field by field.
///
/// # Example
///
/// ```
/// use event_counter::testing::EventBuilder;
///
/// let line = EventBuilder::new("2018-01-01T10:00:00Z", "login")
///     .field("user_id", 7)
///     .to_line();
/// assert!(line.contains(r#""user_id":7"#));
/// ```
#[derive(Debug, Clone, Default)]
pub struct EventBuilder {
    fields: Map<String, Value>,
}

impl EventBuilder {
    /// An event with the fields the standard schema requires.
    #[must_use]
    pub fn new(timestamp: &str, event: &str) -> Self {
        Self::empty()
            .field("timestamp", timestamp)
            .field("event", event)
            .field("user_id", 1)
    }

    /// An event with no fields at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set (or replace) a field.
    #[must_use]
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Remove a field.
    #[must_use]
    pub fn without(mut self, name: &str) -> Self {
        self.fields.remove(name);
        self
    }

    /// Serialize as a single JSON line, without the trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }
}

/// A fluent builder for whole event logs.
///
/// Events added with [`event`](Self::event) and [`events`](Self::events) are
/// valid under [`standard_schema`](crate::testing::standard_schema) and are
/// tracked, so [`expected`](Self::expected) gives the report a correct run
/// must produce. Lines added any other way are not tracked.
///
/// # Example
///
/// ```
/// use event_counter::testing::EventLogBuilder;
///
/// let log = EventLogBuilder::new()
///     .events("2018-01-01T10:00:00Z", "login", 3)
///     .blank()
///     .raw("not json");
///
/// assert_eq!(log.len(), 5);
/// assert_eq!(log.expected().values().sum::<u64>(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct EventLogBuilder {
    lines: Vec<String>,
    expected: BTreeMap<AggregationKey, u64>,
}

impl EventLogBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one valid event.
    ///
    /// # Panics
    ///
    /// Panics if `timestamp` does not start with a calendar date.
    #[must_use]
    pub fn event(self, timestamp: &str, event: &str) -> Self {
        self.events(timestamp, event, 1)
    }

    /// Add `count` identical valid events.
    ///
    /// # Panics
    ///
    /// Panics if `timestamp` does not start with a calendar date.
    #[must_use]
    pub fn events(mut self, timestamp: &str, event: &str, count: usize) -> Self {
        let date = date_from_timestamp(timestamp)
            .unwrap_or_else(|| panic!("test timestamp `{timestamp}` has no valid date"));
        let line = EventBuilder::new(timestamp, event).to_line();
        for _ in 0..count {
            self.lines.push(line.clone());
        }
        *self
            .expected
            .entry(AggregationKey::new(date, event))
            .or_default() += count as u64;
        self
    }

    /// Add a record that is not tracked in [`expected`](Self::expected).
    #[must_use]
    pub fn record(mut self, record: &EventBuilder) -> Self {
        self.lines.push(record.to_line());
        self
    }

    /// Add a raw line as-is.
    #[must_use]
    pub fn raw(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    /// Add an empty line.
    #[must_use]
    pub fn blank(self) -> Self {
        self.raw("")
    }

    /// Number of lines added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Expected counts for the tracked events.
    #[must_use]
    pub fn expected(&self) -> BTreeMap<AggregationKey, u64> {
        self.expected.clone()
    }

    /// The lines, in insertion order.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The whole log, one line per entry, newline-terminated.
    #[must_use]
    pub fn build(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Write the log to a file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        fs::write(path, self.build())
    }
}

/// Deterministic generator of pseudo-random valid events.
///
/// A 64-bit linear congruential generator picks a day out of `days`
/// consecutive days starting 2018-01-01 and a name out of `names`, so the
/// same seed always yields the same log.
///
/// # Example
///
/// ```
/// use event_counter::testing::random_events;
///
/// let log = random_events(42, 1_000, 30, &["login", "logout", "view"]);
/// assert_eq!(log.len(), 1_000);
/// assert_eq!(log.expected().values().sum::<u64>(), 1_000);
/// ```
///
/// # Panics
///
/// Panics if `days` is zero, exceeds a year, or `names` is empty.
#[must_use]
pub fn random_events(seed: u64, n: usize, days: u32, names: &[&str]) -> EventLogBuilder {
    assert!((1..=365).contains(&days), "days must be in 1..=365");
    assert!(!names.is_empty(), "names must not be empty");

    let start = time::macros::date!(2018 - 01 - 01);
    let mut state = seed;
    let mut next = move || {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        state >> 33
    };

    let mut log = EventLogBuilder::new();
    for _ in 0..n {
        let day = start + time::Duration::days((next() % u64::from(days)) as i64);
        let name = names[(next() % names.len() as u64) as usize];
        let timestamp = format!("{day}T{:02}:00:00Z", next() % 24);
        log = log.event(&timestamp, name);
    }
    log
}
