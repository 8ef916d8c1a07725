//! Resolving the `--events` argument into concrete input files.
//!
//! A run reads either one file or every file matching a glob pattern such as
//! `logs/2018-*/events-*.jsonl.gz`. Matches are read in sorted path order so
//! repeated runs see the input in the same order.
//!
//! ```no_run
//! use event_counter::io::glob::resolve_inputs;
//!
//! let files = resolve_inputs("logs/*.jsonl")?;
//! # use anyhow::Error; Ok::<(), Error>(())
//! ```

use anyhow::{Context, Result, bail, ensure};
use glob::glob;
use std::path::{Path, PathBuf};

/// Returns `true` if `spec` contains glob metacharacters.
#[must_use]
pub fn is_pattern(spec: &str) -> bool {
    spec.contains(['*', '?', '['])
}

/// Expand a glob pattern into a sorted vector of matching files.
///
/// Directories are skipped. Zero matches yield an empty vector.
///
/// # Errors
/// Returns an error if the pattern is invalid or the filesystem cannot be read.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut result = Vec::new();
    for entry in paths {
        let path =
            entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        if path.is_file() {
            result.push(path);
        }
    }
    result.sort();
    Ok(result)
}

/// Turn an events argument into the list of files to read.
///
/// A plain path must name an existing file. A pattern must match at least one.
///
/// # Errors
/// Returns an error if the file is missing or the pattern matches nothing.
pub fn resolve_inputs(spec: &str) -> Result<Vec<PathBuf>> {
    if is_pattern(spec) {
        let files = expand_glob(spec)?;
        if files.is_empty() {
            bail!("no files found matching pattern: {spec}");
        }
        return Ok(files);
    }
    let path = Path::new(spec);
    ensure!(path.is_file(), "events file is not readable: {}", path.display());
    Ok(vec![path.to_path_buf()])
}
