//! End-to-end orchestration of a counting run.
//!
//! An [`EventCounter`] owns a validator and a [`CounterConfig`] and drives the
//! two phases:
//!
//! 1. **map**: read lines, parse and validate them, and feed the keys of
//!    accepted records into a [`SpillBuffer`], which spills sorted segments
//!    to a private temporary directory;
//! 2. **reduce**: merge the segments (in several passes when there are more
//!    than `max_open_segments`) and stream the summed rows to the report.
//!
//! Rejected records are never fatal. Anything else aborts the run with a
//! [`PipelineError`] naming the stage that failed; spill files are removed
//! either way.
//!
//! ```no_run
//! use event_counter::config::JobConfig;
//! use event_counter::pipeline::run_job;
//!
//! # fn main() -> Result<(), event_counter::PipelineError> {
//! let job = JobConfig::new("logs/*.jsonl.gz", "report.txt", "resources/schema.toml");
//! let summary = run_job(&job)?;
//! println!("{} accepted, {}", summary.accepted, summary.rejections);
//! # Ok(())
//! # }
//! ```

use crate::config::{CounterConfig, JobConfig};
use crate::error::PipelineError;
use crate::io::compression::open_decoded;
use crate::io::glob::resolve_inputs;
use crate::key::AggregationKey;
use crate::merge::{KWayMerger, merge_segments};
#[cfg(feature = "metrics")]
use crate::metrics::MetricsCollector;
use crate::parser::{ParseError, is_blank, parse_record};
use crate::report::{ReportWriter, write_report_file};
use crate::schema::Schema;
use crate::segment::{SegmentReader, SegmentStore, SpillSegment};
use crate::spill::SpillBuffer;
use crate::validation::{EventValidator, RejectionTally};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::cell::Cell;
use std::fs::File;
use std::io::{BufRead, Write};

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Every line read, blank ones included.
    pub lines_read: u64,
    pub blank_lines: u64,
    /// Records counted into the report.
    pub accepted: u64,
    pub rejections: RejectionTally,
    /// Segments written by the map stage.
    pub segments_spilled: u64,
    /// Intermediate merge passes run before the final merge.
    pub merge_passes: usize,
    pub report_rows: u64,
}

impl RunSummary {
    /// Non-blank lines seen by the parser.
    #[must_use]
    pub fn records_read(&self) -> u64 {
        self.lines_read - self.blank_lines
    }
}

/// Memory-bounded `(date, event)` counter.
pub struct EventCounter<V: EventValidator = Schema> {
    validator: V,
    config: CounterConfig,
    #[cfg(feature = "metrics")]
    metrics: Option<MetricsCollector>,
}

impl<V: EventValidator> EventCounter<V> {
    /// Create a counter.
    ///
    /// # Errors
    /// Returns [`PipelineError::Config`] if `config` is invalid.
    pub fn new(validator: V, config: CounterConfig) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;
        Ok(Self {
            validator,
            config,
            #[cfg(feature = "metrics")]
            metrics: None,
        })
    }

    /// Record run counters into `metrics`.
    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    #[must_use]
    pub fn validator(&self) -> &V {
        &self.validator
    }

    /// Count the events read from `input` and write the report to `output`.
    ///
    /// # Errors
    /// Returns a [`PipelineError`] for any fatal failure. `output` may have
    /// received a prefix of the report by then.
    pub fn count<R: BufRead, W: Write>(
        &self,
        input: R,
        output: W,
    ) -> Result<RunSummary, PipelineError> {
        self.count_sources(std::iter::once(input), output)
    }

    /// Like [`count`](Self::count), reading several inputs back to back as
    /// one logical log.
    ///
    /// # Errors
    /// Returns a [`PipelineError`] for any fatal failure.
    pub fn count_sources<I, R, W>(&self, sources: I, output: W) -> Result<RunSummary, PipelineError>
    where
        I: IntoIterator<Item = R>,
        R: BufRead,
        W: Write,
    {
        let (mut summary, merger, _store) = self.map_and_merge(sources.into_iter().map(Ok))?;
        let spill_failed = Cell::new(false);
        let mut writer = ReportWriter::new(output);
        let rows = merger.inspect(|row| {
            if row.is_err() {
                spill_failed.set(true);
            }
        });
        summary.report_rows = writer
            .write_all(rows)
            .and_then(|n| writer.finish().map(|_| n))
            .map_err(|e| reduce_error(spill_failed.get(), e))?;
        self.finish_run(&summary);
        Ok(summary)
    }

    /// Run a complete job: resolve and decode the inputs, publish the report
    /// atomically, then write the optional rejection and metrics files.
    ///
    /// The schema named by `job` is not consulted; this counter's validator
    /// is used. See [`run_job`] to load it.
    ///
    /// # Errors
    /// Returns a [`PipelineError`] for any fatal failure. The report path is
    /// left untouched in that case.
    pub fn run(&self, job: &JobConfig) -> Result<RunSummary, PipelineError> {
        let files = resolve_inputs(&job.events).map_err(PipelineError::Input)?;
        info!("reading {} input file(s) for {}", files.len(), job.events);

        let inputs = files.into_iter().map(|path| -> Result<Box<dyn BufRead>> {
            debug!("opening {}", path.display());
            let file = File::open(&path).with_context(|| format!("open {}", path.display()))?;
            open_decoded(file, &path)
        });
        let (mut summary, merger, _store) = self.map_and_merge(inputs)?;

        let spill_failed = Cell::new(false);
        let rows = merger.inspect(|row| {
            if row.is_err() {
                spill_failed.set(true);
            }
        });
        summary.report_rows = write_report_file(&job.report, rows)
            .map_err(|e| reduce_error(spill_failed.get(), e))?;
        info!(
            "wrote {} rows to {}",
            summary.report_rows,
            job.report.display()
        );
        self.finish_run(&summary);

        if let Some(path) = &job.rejections {
            summary
                .rejections
                .write_to_file(path)
                .with_context(|| format!("write rejection summary {}", path.display()))
                .map_err(PipelineError::ReportIo)?;
        }
        if let Some(path) = &job.metrics {
            self.save_metrics(path)?;
        }
        Ok(summary)
    }

    /// Map phase followed by the intermediate merge passes. The returned
    /// store must outlive the merger.
    fn map_and_merge<I, R>(
        &self,
        inputs: I,
    ) -> Result<(RunSummary, KWayMerger<SegmentReader>, SegmentStore), PipelineError>
    where
        I: Iterator<Item = Result<R>>,
        R: BufRead,
    {
        self.start_run();
        let mut store =
            SegmentStore::new(self.config.spill_dir.as_deref()).map_err(PipelineError::SpillIo)?;
        debug!("spilling to {}", store.path().display());

        let mut summary = RunSummary {
            rejections: RejectionTally::new(self.config.max_rejection_samples),
            ..RunSummary::default()
        };
        let segments = self.map_phase(inputs, &mut store, &mut summary)?;
        summary.segments_spilled = segments.len() as u64;

        info!(
            "reduce phase: merging {} segment(s), fan-in {}",
            segments.len(),
            self.config.max_open_segments
        );
        let (merger, passes) = merge_segments(segments, &mut store, self.config.max_open_segments)
            .map_err(PipelineError::SpillIo)?;
        summary.merge_passes = passes;
        Ok((summary, merger, store))
    }

    fn map_phase<I, R>(
        &self,
        inputs: I,
        store: &mut SegmentStore,
        summary: &mut RunSummary,
    ) -> Result<Vec<SpillSegment>, PipelineError>
    where
        I: Iterator<Item = Result<R>>,
        R: BufRead,
    {
        info!(
            "map phase: spilling every {} distinct keys",
            self.config.max_keys_count
        );
        let threshold = self.config.spill_threshold().map_err(PipelineError::Config)?;
        let mut buffer = SpillBuffer::new(threshold);
        let mut segments = Vec::new();
        let mut buf = Vec::new();

        for input in inputs {
            let mut input = input.map_err(PipelineError::Input)?;
            loop {
                buf.clear();
                let n = input
                    .read_until(b'\n', &mut buf)
                    .with_context(|| format!("read input line {}", summary.lines_read + 1))
                    .map_err(PipelineError::Input)?;
                if n == 0 {
                    break;
                }
                summary.lines_read += 1;
                let line_no = summary.lines_read;

                let Some(key) = self.accept(line_no, trim_newline(&buf), summary) else {
                    continue;
                };
                summary.accepted += 1;
                if let Some(segment) = buffer
                    .ingest(key, store)
                    .with_context(|| format!("spill after line {line_no}"))
                    .map_err(PipelineError::SpillIo)?
                {
                    segments.push(segment);
                }
            }
        }

        if let Some(segment) = buffer
            .finish(store)
            .context("final spill")
            .map_err(PipelineError::SpillIo)?
        {
            segments.push(segment);
        }

        info!(
            "map phase done: {} lines, {} accepted, {}",
            summary.lines_read, summary.accepted, summary.rejections
        );
        Ok(segments)
    }

    /// Parse and validate one line. Returns `None` for blank and rejected
    /// lines, tallying the latter.
    fn accept(
        &self,
        line_no: u64,
        raw: &[u8],
        summary: &mut RunSummary,
    ) -> Option<AggregationKey> {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                let err = ParseError::new(format!("invalid UTF-8: {e}"));
                warn!("line {line_no}: rejected: {err}");
                summary.rejections.record_malformed(line_no, &err);
                return None;
            }
        };
        if is_blank(line) {
            summary.blank_lines += 1;
            return None;
        }
        let fields = match parse_record(line) {
            Ok(fields) => fields,
            Err(err) => {
                warn!("line {line_no}: rejected: {err}");
                summary.rejections.record_malformed(line_no, &err);
                return None;
            }
        };
        match self.validator.validate(&fields) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!("line {line_no}: rejected: {err}");
                summary.rejections.record_invalid(line_no, &err);
                None
            }
        }
    }

    #[cfg(feature = "metrics")]
    fn start_run(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_start();
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn start_run(&self) {}

    #[cfg(feature = "metrics")]
    fn finish_run(&self, summary: &RunSummary) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.record_end();
        metrics.set_counter("records_read", summary.records_read());
        metrics.set_counter("records_accepted", summary.accepted);
        metrics.set_counter("records_rejected", summary.rejections.total());
        for (reason, n) in summary.rejections.by_reason() {
            metrics.set_counter(&format!("rejected_{reason}"), n);
        }
        metrics.set_counter("segments_spilled", summary.segments_spilled);
        metrics.set_counter("merge_passes", summary.merge_passes as u64);
        metrics.set_counter("report_rows", summary.report_rows);
    }

    #[cfg(not(feature = "metrics"))]
    fn finish_run(&self, _summary: &RunSummary) {}

    #[cfg(feature = "metrics")]
    fn save_metrics(&self, path: &std::path::Path) -> Result<(), PipelineError> {
        match &self.metrics {
            Some(metrics) => metrics.save_to_file(path).map_err(PipelineError::ReportIo),
            None => {
                warn!("no metrics collector attached; not writing {}", path.display());
                Ok(())
            }
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn save_metrics(&self, path: &std::path::Path) -> Result<(), PipelineError> {
        warn!("built without the metrics feature; not writing {}", path.display());
        Ok(())
    }
}

/// A failure while writing the report is a spill failure if the merger
/// produced it, a report failure otherwise.
fn reduce_error(spill_failed: bool, e: anyhow::Error) -> PipelineError {
    if spill_failed {
        PipelineError::SpillIo(e)
    } else {
        PipelineError::ReportIo(e)
    }
}

fn trim_newline(mut raw: &[u8]) -> &[u8] {
    if let Some(rest) = raw.strip_suffix(b"\n") {
        raw = rest;
    }
    if let Some(rest) = raw.strip_suffix(b"\r") {
        raw = rest;
    }
    raw
}

/// Load the job's schema and run it end to end.
///
/// # Errors
/// Returns a [`PipelineError`] naming the stage that failed.
pub fn run_job(job: &JobConfig) -> Result<RunSummary, PipelineError> {
    let schema = Schema::from_file(&job.schema).map_err(PipelineError::Schema)?;
    info!(
        "loaded schema {} ({} fields)",
        job.schema.display(),
        schema.fields().len()
    );
    let counter = EventCounter::new(schema, job.counter.clone())?;
    #[cfg(feature = "metrics")]
    let counter = if job.metrics.is_some() {
        counter.with_metrics(MetricsCollector::new())
    } else {
        counter
    };
    counter.run(job)
}
