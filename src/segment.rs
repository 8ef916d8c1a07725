//! On-disk spill segments.
//!
//! A segment is an immutable file of `(key, count)` pairs in strictly
//! ascending key order with no duplicate keys. Segments are written once by a
//! [`SegmentWriter`], handed around as [`SpillSegment`] handles, and read back
//! exactly once by a [`SegmentReader`], which deletes the file when it has
//! been fully consumed.
//!
//! # File format
//!
//! ```text
//! magic     8 bytes  "EVCSEG01"
//! frame*    u32 LE length (> 0) + postcard-encoded SegmentEntry
//! end       u32 LE 0
//! entries   u64 LE number of frames
//! ```
//!
//! The trailer lets a reader tell a complete segment from a truncated one.
//! Readers also re-check the ordering invariant, so a corrupted segment is a
//! hard error instead of a silently wrong count.

use crate::key::AggregationKey;
use anyhow::{Context, Result, anyhow, bail, ensure};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, remove_file};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use time::Date;

const MAGIC: &[u8; 8] = b"EVCSEG01";

/// Upper bound on a single encoded frame; anything larger is corruption.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Serialized form of one `(key, count)` pair.
#[derive(Debug, Serialize, Deserialize)]
struct SegmentEntry {
    julian_day: i32,
    name: String,
    count: u64,
}

/// Handle to a finished, immutable segment file.
///
/// Only [`SegmentWriter::finish`] creates these, so holding one means the
/// file is complete and closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpillSegment {
    id: u64,
    path: PathBuf,
    entries: u64,
    total_count: u64,
}

impl SpillSegment {
    /// Sequence number; lower ids were written earlier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct keys stored.
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Sum of all counts stored.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Open this segment for a single forward read.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or has a bad header.
    pub fn open(self) -> Result<SegmentReader> {
        SegmentReader::open(self)
    }
}

/// Owner of the private directory segments are written to.
///
/// The directory and anything left in it are removed when the store is dropped.
pub struct SegmentStore {
    dir: TempDir,
    next_id: u64,
}

impl SegmentStore {
    /// Create a store in the system temporary directory, or inside `parent`
    /// when given.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("event-counter-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("mkdir -p {}", parent.display()))?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .context("create spill directory")?;
        debug!("spilling segments to {}", dir.path().display());
        Ok(Self { dir, next_id: 0 })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Number of segments created so far, including intermediate merge outputs.
    #[must_use]
    pub fn segments_created(&self) -> u64 {
        self.next_id
    }

    /// Start a new segment file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create_writer(&mut self) -> Result<SegmentWriter> {
        let id = self.next_id;
        self.next_id += 1;
        SegmentWriter::create(id, self.dir.path().join(format!("segment-{id:06}.seg")))
    }
}

/// Append-only writer for one segment.
pub struct SegmentWriter {
    id: u64,
    path: PathBuf,
    out: BufWriter<File>,
    last: Option<AggregationKey>,
    entries: u64,
    total_count: u64,
}

impl SegmentWriter {
    fn create(id: u64, path: PathBuf) -> Result<Self> {
        let f = File::create(&path).with_context(|| format!("create {}", path.display()))?;
        let mut out = BufWriter::new(f);
        out.write_all(MAGIC)
            .with_context(|| format!("write header to {}", path.display()))?;
        Ok(Self {
            id,
            path,
            out,
            last: None,
            entries: 0,
            total_count: 0,
        })
    }

    /// Append the next pair. Keys must be strictly ascending and counts non-zero.
    ///
    /// # Errors
    /// Returns an error on an ordering violation, a zero count, or an I/O failure.
    pub fn append(&mut self, key: &AggregationKey, count: u64) -> Result<()> {
        ensure!(count > 0, "zero count for {key} in {}", self.path.display());
        if let Some(last) = &self.last {
            ensure!(
                last < key,
                "segment keys out of order in {}: {last} then {key}",
                self.path.display()
            );
        }

        let entry = SegmentEntry {
            julian_day: key.event_date.to_julian_day(),
            name: key.event_name.clone(),
            count,
        };
        let frame = postcard::to_allocvec(&entry)
            .with_context(|| format!("encode entry {key} for {}", self.path.display()))?;
        let len = u32::try_from(frame.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_LEN)
            .ok_or_else(|| anyhow!("entry for {key} is too large to spill"))?;

        self.out
            .write_all(&len.to_le_bytes())
            .and_then(|()| self.out.write_all(&frame))
            .with_context(|| format!("write entry to {}", self.path.display()))?;

        self.entries += 1;
        self.total_count = self
            .total_count
            .checked_add(count)
            .ok_or_else(|| anyhow!("count overflow in {}", self.path.display()))?;
        self.last = Some(key.clone());
        Ok(())
    }

    /// Write the trailer, flush and close the file.
    ///
    /// # Errors
    /// Returns an error if the trailer cannot be written or flushed.
    pub fn finish(mut self) -> Result<SpillSegment> {
        self.out
            .write_all(&0u32.to_le_bytes())
            .and_then(|()| self.out.write_all(&self.entries.to_le_bytes()))
            .and_then(|()| self.out.flush())
            .with_context(|| format!("finish {}", self.path.display()))?;
        debug!(
            "wrote segment {} ({} keys, {} events)",
            self.path.display(),
            self.entries,
            self.total_count
        );
        Ok(SpillSegment {
            id: self.id,
            path: self.path,
            entries: self.entries,
            total_count: self.total_count,
        })
    }
}

/// Forward-only reader over one segment.
///
/// Once the end marker is reached the file is closed and deleted.
pub struct SegmentReader {
    segment: SpillSegment,
    input: Option<BufReader<File>>,
    last: Option<AggregationKey>,
    seen: u64,
    buf: Vec<u8>,
}

impl SegmentReader {
    /// Open a finished segment and check its header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or is not a segment.
    pub fn open(segment: SpillSegment) -> Result<Self> {
        let path = segment.path.clone();
        let f = File::open(&path).with_context(|| format!("open {}", path.display()))?;
        let mut input = BufReader::new(f);
        let mut magic = [0u8; 8];
        input
            .read_exact(&mut magic)
            .with_context(|| format!("read header of {}", path.display()))?;
        ensure!(&magic == MAGIC, "{} is not a spill segment", path.display());
        Ok(Self {
            segment,
            input: Some(input),
            last: None,
            seen: 0,
            buf: Vec::new(),
        })
    }

    #[must_use]
    pub fn segment(&self) -> &SpillSegment {
        &self.segment
    }

    /// Pull the next pair, or `None` once the segment is exhausted.
    ///
    /// # Errors
    /// Returns an error if the file is truncated, corrupted or unreadable.
    pub fn next_pair(&mut self) -> Result<Option<(AggregationKey, u64)>> {
        let path = &self.segment.path;
        let Some(input) = self.input.as_mut() else {
            return Ok(None);
        };

        let mut len = [0u8; 4];
        read_exact_or_truncated(input, &mut len, path)?;
        let len = u32::from_le_bytes(len);
        if len == 0 {
            let mut entries = [0u8; 8];
            read_exact_or_truncated(input, &mut entries, path)?;
            let entries = u64::from_le_bytes(entries);
            ensure!(
                entries == self.seen,
                "{} declares {entries} entries but holds {}",
                path.display(),
                self.seen
            );
            self.close();
            return Ok(None);
        }
        ensure!(len <= MAX_FRAME_LEN, "oversized frame in {}", path.display());

        self.buf.resize(len as usize, 0);
        read_exact_or_truncated(input, &mut self.buf, path)?;
        let entry: SegmentEntry = postcard::from_bytes(&self.buf)
            .with_context(|| format!("decode entry #{} of {}", self.seen, path.display()))?;
        ensure!(entry.count > 0, "zero count in {}", path.display());
        let event_date = Date::from_julian_day(entry.julian_day)
            .with_context(|| format!("bad date in {}", path.display()))?;
        let key = AggregationKey::new(event_date, entry.name);
        if let Some(last) = &self.last {
            ensure!(
                *last < key,
                "{} is not strictly sorted: {last} then {key}",
                path.display()
            );
        }

        self.seen += 1;
        self.last = Some(key.clone());
        Ok(Some((key, entry.count)))
    }

    /// Drop the file handle and delete the segment.
    fn close(&mut self) {
        self.input = None;
        if let Err(e) = remove_file(&self.segment.path) {
            warn!(
                "could not delete consumed segment {}: {e}",
                self.segment.path.display()
            );
        }
    }
}

fn read_exact_or_truncated(input: &mut impl Read, buf: &mut [u8], path: &Path) -> Result<()> {
    match input.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            bail!("{} is truncated", path.display())
        }
        Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
    }
}
