//! Run configuration.
//!
//! [`CounterConfig`] holds the knobs of the counting engine itself;
//! [`JobConfig`] adds the file locations a complete run reads and writes.
//!
//! ```
//! use event_counter::config::CounterConfig;
//!
//! let config = CounterConfig {
//!     max_keys_count: 1024,
//!     max_open_segments: 16,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use anyhow::{Result, ensure};
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Default distinct-key threshold before the map stage spills to disk.
pub const DEFAULT_MAX_KEYS_COUNT: usize = 1 << 16;

/// Default number of segments merged simultaneously.
pub const DEFAULT_MAX_OPEN_SEGMENTS: usize = 64;

/// Default number of rejected records kept as samples.
pub const DEFAULT_MAX_REJECTION_SAMPLES: usize = 100;

/// Knobs for the map and reduce stages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterConfig {
    /// Distinct keys buffered in memory before a spill. Must be positive.
    pub max_keys_count: usize,
    /// Segment readers open at once during a merge pass. Must be at least 2.
    /// An intermediate pass also holds one segment writer, so peak file
    /// handle use is `max_open_segments + 1`.
    pub max_open_segments: usize,
    /// Directory to create the private spill directory in; the system
    /// temporary directory when `None`.
    pub spill_dir: Option<PathBuf>,
    /// Rejected records kept as examples in the run summary.
    pub max_rejection_samples: usize,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            max_keys_count: DEFAULT_MAX_KEYS_COUNT,
            max_open_segments: DEFAULT_MAX_OPEN_SEGMENTS,
            spill_dir: None,
            max_rejection_samples: DEFAULT_MAX_REJECTION_SAMPLES,
        }
    }
}

impl CounterConfig {
    /// Check the knobs are usable.
    ///
    /// # Errors
    /// Returns an error if `max_keys_count` is zero or `max_open_segments < 2`.
    pub fn validate(&self) -> Result<()> {
        self.spill_threshold()?;
        ensure!(
            self.max_open_segments >= 2,
            "max_open_segments must be at least 2, got {}",
            self.max_open_segments
        );
        Ok(())
    }

    /// `max_keys_count` as a non-zero value.
    ///
    /// # Errors
    /// Returns an error if `max_keys_count` is zero.
    pub fn spill_threshold(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.max_keys_count)
            .ok_or_else(|| anyhow::anyhow!("max_keys_count must be a positive integer"))
    }
}

/// A complete run: where to read events and the schema, where to write results.
#[derive(Clone, Debug)]
pub struct JobConfig {
    /// Events file, or a glob pattern matching several files.
    pub events: String,
    pub report: PathBuf,
    pub schema: PathBuf,
    /// Optional JSON summary of rejected records.
    pub rejections: Option<PathBuf>,
    /// Optional JSON dump of run metrics.
    pub metrics: Option<PathBuf>,
    pub counter: CounterConfig,
}

impl JobConfig {
    pub fn new(
        events: impl Into<String>,
        report: impl Into<PathBuf>,
        schema: impl Into<PathBuf>,
    ) -> Self {
        Self {
            events: events.into(),
            report: report.into(),
            schema: schema.into(),
            rejections: None,
            metrics: None,
            counter: CounterConfig::default(),
        }
    }
}
