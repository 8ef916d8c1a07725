//! # event-counter
//!
//! A **memory-bounded event counter** for newline-delimited JSON logs.
//! For every `(calendar date, event name)` pair it counts how many valid
//! events occurred and writes one sorted report line per pair:
//!
//! ```text
//! 2018-01-01 login,2
//! 2018-01-01 logout,1
//! ```
//!
//! The input may be far larger than memory. Distinct keys are buffered up to
//! a configurable bound and spilled to sorted segment files; the segments are
//! then merged k ways into the final report.
//!
//! ## Key Features
//!
//! - **Schema validation** - required/optional typed fields, enums, strict mode
//! - **Bounded memory** - `max_keys_count` caps the map stage, `max_open_segments`
//!   caps the reduce stage
//! - **Non-fatal rejections** - bad lines are tallied by reason and skipped
//! - **Atomic reports** - a failed run never leaves a partial report behind
//! - **Compressed input** - gzip and zstd (optional via feature flags)
//! - **Metrics** - run counters printable or savable as JSON (feature `metrics`)
//!
//! ## Quick Start
//!
//! ```
//! use event_counter::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let schema = Schema::from_toml_str(r#"
//!     [[fields]]
//!     name = "timestamp"
//!     type = "str"
//!
//!     [[fields]]
//!     name = "event"
//!     type = "enum"
//!     variants = ["login", "logout"]
//! "#)?;
//!
//! let input = concat!(
//!     r#"{"timestamp": "2018-01-01T10:00:00Z", "event": "login"}"#, "\n",
//!     r#"{"timestamp": "2018-01-01T11:00:00Z", "event": "login"}"#, "\n",
//!     r#"{"timestamp": "2018-01-01T12:00:00Z", "event": "logout"}"#, "\n",
//! );
//!
//! let counter = EventCounter::new(schema, CounterConfig::default())?;
//! let mut report = Vec::new();
//! let summary = counter.count(input.as_bytes(), &mut report)?;
//!
//! assert_eq!(summary.accepted, 3);
//! assert_eq!(String::from_utf8(report)?, "2018-01-01 login,2\n2018-01-01 logout,1\n");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! 1. The [`parser`] turns a line into a field map
//! 2. An [`EventValidator`] (usually a [`Schema`]) derives its [`AggregationKey`]
//! 3. The [`spill`] buffer counts keys and writes [`segment`] files when full
//! 4. The [`merge`] stage combines the segments in key order
//! 5. The [`report`] writer streams the rows out
//!
//! ## Module Overview
//!
//! - [`pipeline`] - `EventCounter` orchestration and `RunSummary`
//! - [`schema`] / [`validation`] - schema compilation, the validator trait, rejections
//! - [`segment`] / [`spill`] / [`merge`] - the external aggregation machinery
//! - [`io`] - input file resolution and decompression
//! - [`testing`] - builders and assertions for tests

pub mod config;
pub mod error;
pub mod io;
pub mod key;
pub mod merge;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod segment;
pub mod spill;
pub mod testing;
pub mod validation;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use config::{CounterConfig, JobConfig};
pub use error::{PipelineError, Stage};
pub use key::{AggregationKey, ReportRow};
pub use merge::{KWayMerger, MemoryStream, SortedCountStream};
pub use parser::{FieldMap, ParseError, parse_record};
pub use pipeline::{EventCounter, RunSummary, run_job};
pub use report::{ReportWriter, read_report, write_report_file};
pub use schema::{FieldType, Schema};
pub use spill::SpillBuffer;
pub use validation::{EventValidator, RejectReason, RejectionTally, ValidationError};
