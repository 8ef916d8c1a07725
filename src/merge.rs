//! Reduce stage: k-way merge of sorted `(key, count)` streams.
//!
//! Every input is a [`SortedCountStream`]: a forward-only source of pairs in
//! strictly ascending key order with no duplicate keys. [`KWayMerger`] keeps
//! one heap entry per non-exhausted source, so its memory grows with the
//! number of sources and never with the number of distinct keys. Equal keys
//! from different sources are summed into a single [`ReportRow`].
//!
//! When there are more segments than may be open at once,
//! [`merge_segments`] first runs intermediate passes that merge disjoint
//! groups of segments into fewer, larger segments.

use crate::key::{AggregationKey, ReportRow};
use crate::segment::{SegmentReader, SegmentStore, SpillSegment};
use anyhow::{Context, Result, anyhow, ensure};
use log::{debug, info};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, btree_map};

/// Pull-based source of sorted, deduplicated `(key, count)` pairs.
pub trait SortedCountStream {
    /// Next pair, or `None` once exhausted.
    ///
    /// # Errors
    /// Returns an error if the underlying source fails or is corrupted.
    fn next_entry(&mut self) -> Result<Option<(AggregationKey, u64)>>;
}

impl SortedCountStream for SegmentReader {
    fn next_entry(&mut self) -> Result<Option<(AggregationKey, u64)>> {
        self.next_pair()
    }
}

/// In-memory stream over already sorted pairs.
#[derive(Debug, Default)]
pub struct MemoryStream {
    entries: btree_map::IntoIter<AggregationKey, u64>,
}

impl MemoryStream {
    /// Stream the contents of an ordered map.
    #[must_use]
    pub fn from_counts(counts: BTreeMap<AggregationKey, u64>) -> Self {
        Self {
            entries: counts.into_iter(),
        }
    }

    /// Stream a vector that is already strictly ascending by key.
    ///
    /// # Errors
    /// Returns an error if the keys are not strictly ascending.
    pub fn from_sorted(entries: Vec<(AggregationKey, u64)>) -> Result<Self> {
        for pair in entries.windows(2) {
            ensure!(
                pair[0].0 < pair[1].0,
                "stream keys out of order: {} then {}",
                pair[0].0,
                pair[1].0
            );
        }
        Ok(Self::from_counts(entries.into_iter().collect()))
    }
}

impl SortedCountStream for MemoryStream {
    fn next_entry(&mut self) -> Result<Option<(AggregationKey, u64)>> {
        Ok(self.entries.next())
    }
}

/// Current head of one source.
#[derive(Debug, PartialEq, Eq)]
struct Cursor {
    key: AggregationKey,
    source: usize,
    count: u64,
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.source.cmp(&other.source))
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Lazily merges sorted sources into one sorted, deduplicated, summed stream.
pub struct KWayMerger<S> {
    sources: Vec<S>,
    heap: BinaryHeap<Reverse<Cursor>>,
    failed: bool,
}

impl<S: SortedCountStream> KWayMerger<S> {
    /// Prime one cursor per source.
    ///
    /// # Errors
    /// Returns an error if any source fails on its first read.
    pub fn new(sources: Vec<S>) -> Result<Self> {
        let mut merger = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            failed: false,
        };
        for source in 0..merger.sources.len() {
            merger.advance(source)?;
        }
        Ok(merger)
    }

    /// Number of sources that still have data.
    #[must_use]
    pub fn open_sources(&self) -> usize {
        self.heap.len()
    }

    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some((key, count)) = self.sources[source].next_entry()? {
            self.heap.push(Reverse(Cursor { key, source, count }));
        }
        Ok(())
    }

    /// Produce the next merged row, or `None` when every source is exhausted.
    ///
    /// # Errors
    /// Returns an error if a source fails or a total would overflow.
    pub fn next_row(&mut self) -> Result<Option<ReportRow>> {
        let Some(Reverse(first)) = self.heap.pop() else {
            return Ok(None);
        };
        let Cursor { key, source, count } = first;
        let mut total = count;
        self.advance(source)?;

        // A source never repeats a key, so anything still at `key` comes
        // from a different source.
        while self.heap.peek().is_some_and(|Reverse(top)| top.key == key) {
            let Some(Reverse(next)) = self.heap.pop() else {
                break;
            };
            total = total
                .checked_add(next.count)
                .ok_or_else(|| anyhow!("count overflow while merging {key}"))?;
            self.advance(next.source)?;
        }
        Ok(Some(ReportRow::new(key, total)))
    }
}

impl<S: SortedCountStream> Iterator for KWayMerger<S> {
    type Item = Result<ReportRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_row() {
            Ok(row) => row.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Open every segment and merge them; no fan-in limit applied.
///
/// # Errors
/// Returns an error if any segment cannot be opened or read.
pub fn open_merger(segments: Vec<SpillSegment>) -> Result<KWayMerger<SegmentReader>> {
    let readers = segments
        .into_iter()
        .map(SpillSegment::open)
        .collect::<Result<Vec<_>>>()?;
    KWayMerger::new(readers)
}

/// Merge `segments` into a single new segment.
///
/// # Errors
/// Returns an error if any segment cannot be read or the output cannot be written.
pub fn merge_into_segment(
    segments: Vec<SpillSegment>,
    store: &mut SegmentStore,
) -> Result<SpillSegment> {
    let inputs = segments.len();
    let mut merger = open_merger(segments)?;
    let mut writer = store.create_writer()?;
    while let Some(row) = merger.next_row()? {
        writer.append(&row.key, row.count)?;
    }
    let merged = writer.finish()?;
    debug!(
        "merged {inputs} segments into segment #{} ({} keys)",
        merged.id(),
        merged.entries()
    );
    Ok(merged)
}

/// Reduce `segments` until at most `max_open_segments` remain, then return a
/// merger over them together with the number of intermediate passes run.
///
/// Each pass groups the segments, in the order given, into disjoint chunks
/// of at most `max_open_segments` and merges every chunk of two or more into
/// one new segment. At most `max_open_segments` segment readers are open at
/// any time; an intermediate pass adds the one writer it merges into.
///
/// # Errors
/// Returns an error if `max_open_segments < 2` or any segment I/O fails.
pub fn merge_segments(
    mut segments: Vec<SpillSegment>,
    store: &mut SegmentStore,
    max_open_segments: usize,
) -> Result<(KWayMerger<SegmentReader>, usize)> {
    ensure!(
        max_open_segments >= 2,
        "max_open_segments must be at least 2, got {max_open_segments}"
    );

    let mut passes = 0;
    while segments.len() > max_open_segments {
        passes += 1;
        info!(
            "intermediate merge pass {passes}: {} segments, fan-in {max_open_segments}",
            segments.len()
        );
        let mut next = Vec::with_capacity(segments.len().div_ceil(max_open_segments));
        let mut remaining = segments.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<SpillSegment> = remaining.by_ref().take(max_open_segments).collect();
            if chunk.len() == 1 {
                next.extend(chunk);
            } else {
                next.push(
                    merge_into_segment(chunk, store)
                        .with_context(|| format!("intermediate merge pass {passes}"))?,
                );
            }
        }
        segments = next;
    }

    let merger = open_merger(segments).context("final merge pass")?;
    Ok((merger, passes))
}
