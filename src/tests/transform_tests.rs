//! Tests for the local `transform` command and the bundled sample data.

use crate::transform_file;
use std::fs;
use tempfile::TempDir;
use tiddler_lib::calendar::FeedConfig;
use tiddler_lib::{pipeline, readings, windows};

const SAMPLE: &str = include_str!("../../s3-data/tidal_data.txt");
const SINGLE_CYCLE: &str = include_str!("fixtures/single_cycle.csv");

/// The sample week must parse line-for-line and in order.
#[test]
fn sample_data_parses_in_order() {
    let parsed = readings::parse(SAMPLE).expect("sample data should parse");
    let non_blank = SAMPLE.lines().filter(|l| !l.trim().is_empty()).count();

    assert_eq!(parsed.len(), non_blank);
    assert!(
        parsed.windows(2).all(|w| w[0].timestamp <= w[1].timestamp),
        "sample readings should be chronological"
    );
}

/// Two high tides a day for a week.
#[test]
fn sample_data_yields_fourteen_windows() {
    let found = windows::scan(&readings::parse(SAMPLE).unwrap());
    assert_eq!(found.len(), 14);
    for window in &found {
        assert!(window.rising_at <= window.falling_at);
        assert!(window.high_at.is_some(), "every sample cycle has a high tide");
    }
}

#[test]
fn transform_file_writes_calendar() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("tides.csv");
    let output = dir.path().join("tides.ics");
    fs::write(&input, SINGLE_CYCLE).unwrap();

    let events = transform_file(&input, &output, &FeedConfig::default()).unwrap();

    assert_eq!(events, 1);
    let ics = fs::read_to_string(&output).unwrap();
    assert!(ics.contains("SUMMARY:High tide at 08:41 (5.3)"));
    assert!(ics.contains("LOCATION:Leith"));
}

#[test]
fn transform_file_rejects_malformed_input_without_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("tides.csv");
    let output = dir.path().join("tides.ics");
    fs::write(
        &input,
        format!("{SINGLE_CYCLE}Leith,2023-04-01,not a time,3.0,Mark Rising\n"),
    )
    .unwrap();

    let err = transform_file(&input, &output, &FeedConfig::default()).unwrap_err();

    assert!(format!("{err:#}").contains("line 5"));
    assert!(!output.exists(), "no partial calendar should be written");
}

#[test]
fn transform_file_reports_missing_input() {
    let dir = TempDir::new().unwrap();
    let err = transform_file(
        &dir.path().join("missing.csv"),
        &dir.path().join("out.ics"),
        &FeedConfig::default(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("reading"));
}

/// Regenerating the same input gives identical events (the feed is
/// overwritten on every run, so event identity must be stable).
#[test]
fn transform_is_deterministic() {
    let feed = FeedConfig::default();
    let first = pipeline::transform(SAMPLE, &feed).unwrap();
    let second = pipeline::transform(SAMPLE, &feed).unwrap();
    assert_eq!(first.events, second.events);
}
