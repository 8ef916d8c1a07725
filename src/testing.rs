//! Testing utilities for event-counter runs.
//!
//! This module helps write idiomatic tests against the counter. It includes:
//!
//! - **Builders**: generate JSON Lines event logs and track their expected counts
//! - **Fixtures**: a ready-made schema and a small sample log
//! - **Assertions**: check report rows for order, uniqueness and content
//!
//! # Quick Start
//!
//! ```
//! use event_counter::testing::*;
//! use event_counter::{CounterConfig, EventCounter};
//!
//! # fn main() -> anyhow::Result<()> {
//! let log = EventLogBuilder::new()
//!     .events("2018-01-01T10:00:00Z", "login", 2)
//!     .event("2018-01-01T12:00:00Z", "logout");
//!
//! let counter = EventCounter::new(standard_schema()?, CounterConfig::default())?;
//! let mut out = Vec::new();
//! counter.count(log.build().as_bytes(), &mut out)?;
//!
//! let rows = parse_report_str(std::str::from_utf8(&out)?)?;
//! assert_report_sorted_unique(&rows);
//! assert_report_matches(&rows, &log.expected());
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod builders;
pub mod fixtures;

pub use assertions::*;
pub use builders::*;
pub use fixtures::*;
