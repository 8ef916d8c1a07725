#![cfg(feature = "metrics")]

use anyhow::Result;
use event_counter::metrics::{GaugeMetric, MetricsCollector};
use event_counter::testing::{SAMPLE_EVENTS, standard_schema};
use event_counter::{CounterConfig, EventCounter};
use serde_json::json;

#[test]
fn counters_accumulate_and_can_be_reset() {
    let metrics = MetricsCollector::new();
    metrics.increment_counter("records_read", 2);
    metrics.increment_counter("records_read", 3);
    assert_eq!(metrics.counter("records_read"), Some(5));
    metrics.set_counter("records_read", 1);
    assert_eq!(metrics.counter("records_read"), Some(1));
    assert_eq!(metrics.counter("missing"), None);
}

#[test]
fn custom_metrics_show_up_in_json() {
    let metrics = MetricsCollector::new();
    metrics.register(Box::new(
        GaugeMetric::new("spill_ratio", 0.5).with_description("segments per input line"),
    ));
    let json = metrics.to_json();
    assert_eq!(json["spill_ratio"]["value"], json!(0.5));
    assert_eq!(json["spill_ratio"]["description"], "segments per input line");
    assert!(metrics.elapsed().is_none());
}

#[test]
fn a_run_records_its_counters() -> Result<()> {
    let metrics = MetricsCollector::new();
    let counter = EventCounter::new(standard_schema()?, CounterConfig {
        max_keys_count: 2,
        max_open_segments: 2,
        ..Default::default()
    })?
    .with_metrics(metrics.clone());
    let summary = counter.count(SAMPLE_EVENTS.as_bytes(), std::io::sink())?;

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot["records_read"], json!(11));
    assert_eq!(snapshot["records_accepted"], json!(6));
    assert_eq!(snapshot["records_rejected"], json!(5));
    assert_eq!(snapshot["rejected_type_mismatch"], json!(1));
    assert_eq!(snapshot["segments_spilled"], json!(summary.segments_spilled));
    assert_eq!(snapshot["merge_passes"], json!(summary.merge_passes));
    assert_eq!(snapshot["report_rows"], json!(5));
    assert!(metrics.elapsed().is_some());
    Ok(())
}

#[test]
fn metrics_save_as_json() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("metrics.json");
    let metrics = MetricsCollector::new();
    metrics.record_start();
    metrics.increment_counter("report_rows", 4);
    metrics.record_end();
    metrics.save_to_file(&path)?;

    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(saved["report_rows"]["value"], 4);
    assert!(saved["execution_time_ms"]["value"].is_number());
    Ok(())
}
