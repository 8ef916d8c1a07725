//! Report output.
//!
//! The report is plain text, one `<event_date> <event_name>,<count>` line per
//! key, strictly ascending, no header. Rows are streamed straight from the
//! merger to the writer; nothing is buffered beyond the `BufWriter`.

use crate::key::ReportRow;
use anyhow::{Context, Result, ensure};
use std::fs::{File, create_dir_all};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Streaming writer that enforces strict row order.
pub struct ReportWriter<W: Write> {
    out: W,
    last: Option<ReportRow>,
    rows: u64,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last: None,
            rows: 0,
        }
    }

    /// Rows written so far.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Write one row.
    ///
    /// # Errors
    /// Returns an error if `row` does not sort strictly after the previous row,
    /// or on an I/O failure.
    pub fn write_row(&mut self, row: ReportRow) -> Result<()> {
        if let Some(last) = &self.last {
            ensure!(
                last.key < row.key,
                "report rows out of order: {} then {}",
                last.key,
                row.key
            );
        }
        writeln!(self.out, "{row}")
            .with_context(|| format!("write report row {}", self.rows + 1))?;
        self.rows += 1;
        self.last = Some(row);
        Ok(())
    }

    /// Write every row from a fallible stream, stopping at the first error.
    ///
    /// # Errors
    /// Propagates the first error from `rows` or from writing.
    pub fn write_all<I>(&mut self, rows: I) -> Result<u64>
    where
        I: IntoIterator<Item = Result<ReportRow>>,
    {
        for row in rows {
            self.write_row(row?)?;
        }
        Ok(self.rows)
    }

    /// Flush and hand back the underlying writer.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush().context("flush report")?;
        Ok(self.out)
    }
}

/// Write a report to `path`, publishing it only if every row was written.
///
/// Rows go to a temporary file next to `path`, which is renamed over `path`
/// once complete. On any error the temporary file is removed and `path` is
/// left untouched.
///
/// # Errors
/// Returns an error from the row stream or from any file operation.
pub fn write_report_file<I>(path: impl AsRef<Path>, rows: I) -> Result<u64>
where
    I: IntoIterator<Item = Result<ReportRow>>,
{
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
            parent
        }
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("create temporary report in {}", dir.display()))?;

    let mut writer = ReportWriter::new(BufWriter::new(tmp));
    let n = writer.write_all(rows)?;
    let tmp = writer
        .finish()?
        .into_inner()
        .map_err(|e| e.into_error())
        .context("flush report")?;
    tmp.persist(path)
        .with_context(|| format!("publish report {}", path.display()))?;
    Ok(n)
}

/// Read a report file back into rows.
///
/// # Errors
/// Returns an error if the file cannot be read or a line is malformed.
pub fn read_report(path: impl AsRef<Path>) -> Result<Vec<ReportRow>> {
    let path = path.as_ref();
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut rows = Vec::new();
    for (i, line) in BufReader::new(f).lines().enumerate() {
        let line = line.with_context(|| format!("read line {} in {}", i + 1, path.display()))?;
        let row: ReportRow = line
            .parse()
            .with_context(|| format!("parse report line {} in {}", i + 1, path.display()))?;
        rows.push(row);
    }
    Ok(rows)
}
