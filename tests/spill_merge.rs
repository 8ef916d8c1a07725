use anyhow::Result;
use event_counter::merge::{merge_segments, open_merger};
use event_counter::segment::{SegmentStore, SpillSegment};
use event_counter::spill::BufferState;
use event_counter::testing::report_total;
use event_counter::{AggregationKey, KWayMerger, MemoryStream, ReportRow, SpillBuffer};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::num::NonZeroUsize;

fn key(date: &str, name: &str) -> AggregationKey {
    AggregationKey::parse(date, name).expect("valid test date")
}

fn write_segment(store: &mut SegmentStore, pairs: &[(&str, &str, u64)]) -> Result<SpillSegment> {
    let mut writer = store.create_writer()?;
    for (date, name, count) in pairs {
        writer.append(&key(date, name), *count)?;
    }
    writer.finish()
}

fn collect_rows<I: Iterator<Item = Result<ReportRow>>>(rows: I) -> Result<Vec<(String, u64)>> {
    rows.map(|row| row.map(|r| (r.key.to_string(), r.count)))
        .collect()
}

#[test]
fn spill_buffer_flushes_at_threshold() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = SegmentStore::new(Some(tmp.path()))?;
    let mut buffer = SpillBuffer::new(NonZeroUsize::new(2).unwrap());
    assert_eq!(buffer.state(), BufferState::Empty);

    assert!(buffer.ingest(key("2018-01-01", "a"), &mut store)?.is_none());
    assert!(buffer.ingest(key("2018-01-01", "a"), &mut store)?.is_none());
    assert_eq!(buffer.state(), BufferState::Accumulating);
    assert_eq!(buffer.get(&key("2018-01-01", "a")), Some(2));

    let segment = buffer
        .ingest(key("2018-01-01", "b"), &mut store)?
        .expect("second distinct key triggers a spill");
    assert_eq!(segment.entries(), 2);
    assert_eq!(segment.total_count(), 3);
    assert!(buffer.is_empty());
    assert_eq!(buffer.flushes(), 1);

    buffer.ingest(key("2018-01-02", "a"), &mut store)?;
    let last = buffer.finish(&mut store)?.expect("final flush writes the rest");
    assert_eq!(last.entries(), 1);
    Ok(())
}

#[test]
fn spill_buffer_never_holds_more_than_the_threshold() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = SegmentStore::new(Some(tmp.path()))?;
    let mut buffer = SpillBuffer::new(NonZeroUsize::new(3).unwrap());
    let mut segments = Vec::new();
    for day in 1..=20 {
        let k = key(&format!("2018-01-{day:02}"), "view");
        if let Some(s) = buffer.ingest(k, &mut store)? {
            segments.push(s);
        }
        assert!(buffer.len() < 3);
    }
    segments.extend(buffer.finish(&mut store)?);
    assert_eq!(segments.len(), 7);
    assert_eq!(segments.iter().map(SpillSegment::total_count).sum::<u64>(), 20);
    Ok(())
}

#[test]
fn finishing_an_empty_buffer_writes_nothing() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = SegmentStore::new(Some(tmp.path()))?;
    let mut buffer = SpillBuffer::new(NonZeroUsize::new(8).unwrap());
    assert!(buffer.finish(&mut store)?.is_none());
    assert_eq!(store.segments_created(), 0);
    assert_eq!(buffer.state(), BufferState::Closed);
    assert!(buffer.ingest(key("2018-01-01", "a"), &mut store).is_err());
    Ok(())
}

#[test]
fn writer_rejects_unsorted_or_duplicate_keys_and_zero_counts() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = SegmentStore::new(Some(tmp.path()))?;

    let mut writer = store.create_writer()?;
    writer.append(&key("2018-01-02", "a"), 1)?;
    assert!(writer.append(&key("2018-01-01", "z"), 1).is_err());

    let mut writer = store.create_writer()?;
    writer.append(&key("2018-01-02", "a"), 1)?;
    assert!(writer.append(&key("2018-01-02", "a"), 1).is_err());

    let mut writer = store.create_writer()?;
    assert!(writer.append(&key("2018-01-02", "a"), 0).is_err());
    Ok(())
}

#[test]
fn merge_sums_equal_keys_across_segments() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = SegmentStore::new(Some(tmp.path()))?;
    let a = write_segment(
        &mut store,
        &[("2018-01-01", "login", 2), ("2018-01-02", "view", 1)],
    )?;
    let b = write_segment(
        &mut store,
        &[("2018-01-01", "login", 3), ("2018-01-01", "logout", 1)],
    )?;
    let c = write_segment(&mut store, &[("2018-01-02", "view", 4)])?;

    let rows = collect_rows(open_merger(vec![a, b, c])?)?;
    assert_eq!(
        rows,
        vec![
            ("2018-01-01 login".to_string(), 5),
            ("2018-01-01 logout".to_string(), 1),
            ("2018-01-02 view".to_string(), 5),
        ]
    );
    Ok(())
}

#[test]
fn merging_a_single_segment_reproduces_it() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = SegmentStore::new(Some(tmp.path()))?;
    let pairs = [("2017-12-31", "a", 1), ("2018-01-01", "a", 7), ("2018-01-01", "b", 2)];
    let segment = write_segment(&mut store, &pairs)?;
    let rows = collect_rows(open_merger(vec![segment])?)?;
    let expected: Vec<(String, u64)> = pairs
        .iter()
        .map(|(d, n, c)| (format!("{d} {n}"), *c))
        .collect();
    assert_eq!(rows, expected);
    Ok(())
}

#[test]
fn merging_nothing_yields_nothing() -> Result<()> {
    let mut merger = KWayMerger::<MemoryStream>::new(Vec::new())?;
    assert!(merger.next_row()?.is_none());
    Ok(())
}

#[test]
fn memory_streams_merge_like_segments() -> Result<()> {
    let left: BTreeMap<_, _> =
        [(key("2018-01-01", "a"), 1), (key("2018-01-03", "a"), 1)].into();
    let right = MemoryStream::from_sorted(vec![
        (key("2018-01-02", "a"), 2),
        (key("2018-01-03", "a"), 2),
    ])?;
    let rows = collect_rows(KWayMerger::new(vec![
        MemoryStream::from_counts(left),
        right,
    ])?)?;
    assert_eq!(
        rows,
        vec![
            ("2018-01-01 a".to_string(), 1),
            ("2018-01-02 a".to_string(), 2),
            ("2018-01-03 a".to_string(), 3),
        ]
    );
    let unsorted = vec![(key("2018-01-02", "a"), 1), (key("2018-01-01", "a"), 1)];
    assert!(MemoryStream::from_sorted(unsorted).is_err());
    Ok(())
}

#[test]
fn multi_pass_merge_matches_single_pass() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut expected: BTreeMap<AggregationKey, u64> = BTreeMap::new();

    let build = |store: &mut SegmentStore,
                 expected: &mut BTreeMap<AggregationKey, u64>|
     -> Result<Vec<SpillSegment>> {
        let mut segments = Vec::new();
        for s in 0..9u64 {
            let mut writer = store.create_writer()?;
            for day in 1..=5u64 {
                if (day + s) % 3 == 0 {
                    continue;
                }
                let k = key(&format!("2018-03-{day:02}"), "view");
                writer.append(&k, s + 1)?;
                *expected.entry(k).or_default() += s + 1;
            }
            segments.push(writer.finish()?);
        }
        Ok(segments)
    };

    let mut store = SegmentStore::new(Some(tmp.path()))?;
    let segments = build(&mut store, &mut expected)?;
    let (merger, passes) = merge_segments(segments, &mut store, 2)?;
    assert!(passes >= 3);
    let narrow = collect_rows(merger)?;

    let mut wide_store = SegmentStore::new(Some(tmp.path()))?;
    let mut ignored = BTreeMap::new();
    let segments = build(&mut wide_store, &mut ignored)?;
    let (merger, passes) = merge_segments(segments, &mut wide_store, 64)?;
    assert_eq!(passes, 0);
    let wide = collect_rows(merger)?;

    assert_eq!(narrow, wide);
    let expected: Vec<(String, u64)> = expected.iter().map(|(k, n)| (k.to_string(), *n)).collect();
    assert_eq!(narrow, expected);
    Ok(())
}

#[test]
fn fan_in_below_two_is_rejected() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = SegmentStore::new(Some(tmp.path()))?;
    assert!(merge_segments(Vec::new(), &mut store, 1).is_err());
    Ok(())
}

#[test]
fn consumed_segments_are_deleted() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = SegmentStore::new(Some(tmp.path()))?;
    let a = write_segment(&mut store, &[("2018-01-01", "a", 1)])?;
    let b = write_segment(&mut store, &[("2018-01-01", "a", 1)])?;
    let paths = [a.path().to_path_buf(), b.path().to_path_buf()];
    assert!(paths.iter().all(|p| p.exists()));

    let rows: Vec<ReportRow> = open_merger(vec![a, b])?.collect::<Result<_>>()?;
    assert_eq!(report_total(&rows), 2);
    assert!(paths.iter().all(|p| !p.exists()));
    Ok(())
}

#[test]
fn store_directory_is_removed_on_drop() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = SegmentStore::new(Some(tmp.path()))?;
    write_segment(&mut store, &[("2018-01-01", "a", 1)])?;
    let dir = store.path().to_path_buf();
    assert!(dir.exists());
    drop(store);
    assert!(!dir.exists());
    Ok(())
}

#[test]
fn truncated_segment_is_fatal() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = SegmentStore::new(Some(tmp.path()))?;
    let pairs = [("2018-01-01", "a", 1), ("2018-01-02", "a", 1)];
    let segment = write_segment(&mut store, &pairs)?;
    let len = fs::metadata(segment.path())?.len();
    OpenOptions::new().write(true).open(segment.path())?.set_len(len - 6)?;

    let err = open_merger(vec![segment])
        .and_then(|merger| collect_rows(merger))
        .expect_err("truncation must surface");
    assert!(format!("{err:#}").contains("truncated"), "{err:#}");
    Ok(())
}

#[test]
fn garbage_segment_is_fatal() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = SegmentStore::new(Some(tmp.path()))?;
    let segment = write_segment(&mut store, &[("2018-01-01", "a", 1), ("2018-01-02", "a", 1)])?;

    let mut f = OpenOptions::new().write(true).open(segment.path())?;
    f.seek(SeekFrom::Start(8))?;
    f.write_all(&u32::MAX.to_le_bytes())?;
    drop(f);

    assert!(open_merger(vec![segment]).and_then(|m| collect_rows(m)).is_err());
    Ok(())
}

#[test]
fn wrong_magic_is_fatal() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = SegmentStore::new(Some(tmp.path()))?;
    let segment = write_segment(&mut store, &[("2018-01-01", "a", 1)])?;
    fs::write(segment.path(), b"NOTASEGMENT")?;
    assert!(segment.open().is_err());
    Ok(())
}
