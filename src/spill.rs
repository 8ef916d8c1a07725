//! Map-stage accumulator with bounded memory.
//!
//! [`SpillBuffer`] keeps per-key counts in a [`BTreeMap`] so that a flush can
//! stream entries to disk already sorted. When the number of distinct keys
//! reaches `max_keys_count` the buffer is written out as a [`SpillSegment`]
//! and cleared; a final flush at end of input writes whatever is left.
//!
//! ```text
//! Empty ──ingest──▶ Accumulating ──threshold──▶ Flushing ──▶ Empty …
//!                         └──── finish ──▶ Flushing (final) ──▶ Closed
//! ```
//!
//! A buffer left in `Flushing` had a failed write; the run is over by then.

use crate::key::AggregationKey;
use crate::segment::{SegmentStore, SpillSegment};
use anyhow::{Context, Result, anyhow, ensure};
use log::debug;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

/// Lifecycle state of a [`SpillBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Empty,
    Accumulating,
    /// Writing a segment. Only observable after a failed flush.
    Flushing,
    /// [`SpillBuffer::finish`] has run; no more keys are accepted.
    Closed,
}

/// Ordered, size-bounded map of partial counts.
#[derive(Debug)]
pub struct SpillBuffer {
    counts: BTreeMap<AggregationKey, u64>,
    max_keys_count: NonZeroUsize,
    state: BufferState,
    flushes: u64,
}

impl SpillBuffer {
    #[must_use]
    pub fn new(max_keys_count: NonZeroUsize) -> Self {
        Self {
            counts: BTreeMap::new(),
            max_keys_count,
            state: BufferState::Empty,
            flushes: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Number of distinct keys currently held in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    #[must_use]
    pub fn max_keys_count(&self) -> NonZeroUsize {
        self.max_keys_count
    }

    /// Segments written by this buffer so far.
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// In-memory count for `key`, if buffered.
    #[must_use]
    pub fn get(&self, key: &AggregationKey) -> Option<u64> {
        self.counts.get(key).copied()
    }

    /// Count one occurrence of `key`.
    ///
    /// Returns the segment written when this ingest made the buffer reach its
    /// distinct-key threshold.
    ///
    /// # Errors
    /// Returns an error if the buffer is no longer accepting keys, a forced
    /// flush fails, or a count would overflow.
    pub fn ingest(
        &mut self,
        key: AggregationKey,
        store: &mut SegmentStore,
    ) -> Result<Option<SpillSegment>> {
        ensure!(
            matches!(self.state, BufferState::Empty | BufferState::Accumulating),
            "spill buffer is {:?}, cannot ingest {key}",
            self.state
        );
        self.state = BufferState::Accumulating;
        let count = self.counts.entry(key).or_insert(0);
        *count = count
            .checked_add(1)
            .ok_or_else(|| anyhow!("count overflow while buffering"))?;

        if self.counts.len() >= self.max_keys_count.get() {
            return self.flush(store);
        }
        Ok(None)
    }

    /// Write all buffered pairs in key order to a new segment and clear the
    /// buffer. Does nothing when the buffer is empty.
    ///
    /// # Errors
    /// Returns an error if the segment cannot be written.
    pub fn flush(&mut self, store: &mut SegmentStore) -> Result<Option<SpillSegment>> {
        if self.counts.is_empty() {
            return Ok(None);
        }
        self.state = BufferState::Flushing;
        let mut writer = store.create_writer()?;
        for (key, count) in &self.counts {
            writer.append(key, *count)?;
        }
        let segment = writer.finish().context("flush spill buffer")?;
        self.counts.clear();
        self.state = BufferState::Empty;
        self.flushes += 1;
        debug!(
            "spilled segment #{} with {} keys",
            segment.id(),
            segment.entries()
        );
        Ok(Some(segment))
    }

    /// Final flush at end of input. The buffer is closed afterwards.
    ///
    /// # Errors
    /// Returns an error if the segment cannot be written.
    pub fn finish(&mut self, store: &mut SegmentStore) -> Result<Option<SpillSegment>> {
        let segment = self.flush(store)?;
        self.state = BufferState::Closed;
        Ok(segment)
    }
}
