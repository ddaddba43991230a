//! Backfill orchestration: continue-on-error, abort, cancel, write failures.

use chrono::{TimeZone, Utc};
use marketlake_core::data::{
    read_dataset, FetchError, FetchWindow, PartitionedWriter, RecordingSleeper, ScriptedSource,
};
use marketlake_core::Timeframe;
use marketlake_runner::{
    BackfillConfig, BackfillPipeline, Executor, NoProgress, PipelineError, UnitError,
};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;

fn window() -> FetchWindow {
    FetchWindow::new(
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
    )
}

fn raw_bars(close: f64) -> DataFrame {
    df!(
        "t" => &["2024-01-02T14:30:00Z", "2024-01-02T14:40:00Z"],
        "o" => &[close, close],
        "h" => &[close + 1.0, close + 1.0],
        "l" => &[close - 1.0, close - 1.0],
        "c" => &[close, close],
        "v" => &[1000i64, 1200],
    )
    .unwrap()
}

fn bars_only(symbols: &[&str]) -> BackfillConfig {
    BackfillConfig {
        universe_symbols: symbols.iter().map(|s| s.to_string()).collect(),
        market_proxy: String::new(),
        sector_etfs: vec![],
        timeframes: vec![Timeframe::TEN_MINUTES],
        fred_series: vec![],
        symbol_to_cik: BTreeMap::new(),
        continue_on_error: true,
        ..BackfillConfig::default()
    }
}

fn abc_source() -> ScriptedSource {
    ScriptedSource::new("alpaca")
        .with_feed("iex")
        .respond("bars/10min/A", Ok(raw_bars(10.0)))
        .respond(
            "bars/10min/B",
            Err(FetchError::Permanent("404 unknown symbol".into())),
        )
        .respond("bars/10min/C", Ok(raw_bars(30.0)))
}

#[test]
fn failed_symbol_is_reported_and_others_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    let source = abc_source();
    let sleeper = RecordingSleeper::new();
    let pipeline = BackfillPipeline::new(
        Executor::new(&writer)
            .with_sleeper(&sleeper)
            .with_progress(&NoProgress),
    )
    .with_bars(&source);

    let summary = pipeline.run(&bars_only(&["A", "B", "C"]), window(), None).unwrap();

    assert_eq!(summary.total_units, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_units(), vec!["bars/10min/B"]);
    assert_eq!(summary.rows_written, 4);
    assert!(summary.outputs.contains(&dir.path().join("bars")));

    let bars = dir.path().join("bars");
    assert!(bars.join("symbol=A").is_dir());
    assert!(!bars.join("symbol=B").exists());
    assert!(bars.join("symbol=C").is_dir());
    assert_eq!(read_dataset(&bars).unwrap().height(), 4);

    // Permanent failures are not retried.
    assert_eq!(source.call_count("bars/10min/B"), 1);
    assert!(sleeper.delays().is_empty());
}

#[test]
fn abort_mode_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    let source = abc_source();
    let pipeline =
        BackfillPipeline::new(Executor::new(&writer).with_progress(&NoProgress)).with_bars(&source);
    let config = BackfillConfig {
        continue_on_error: false,
        ..bars_only(&["A", "B", "C"])
    };

    let err = pipeline.run(&config, window(), None).unwrap_err();

    match err {
        PipelineError::UnitFailed { unit, source: UnitError::Fetch(e) } => {
            assert_eq!(unit, "bars/10min/B");
            assert!(!e.is_transient());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(dir.path().join("bars/symbol=A").is_dir());
    assert_eq!(source.call_count("bars/10min/C"), 0);
}

#[test]
fn exhausted_retries_fail_the_unit_with_the_last_error() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    let sleeper = RecordingSleeper::new();
    let source = ScriptedSource::new("alpaca")
        .respond("bars/10min/A", Err(FetchError::Transient("503".into())));
    let pipeline = BackfillPipeline::new(
        Executor::new(&writer)
            .with_sleeper(&sleeper)
            .with_progress(&NoProgress),
    )
    .with_bars(&source);

    let summary = pipeline.run(&bars_only(&["A"]), window(), None).unwrap();

    assert_eq!(summary.failed, 1);
    assert!(summary.failures[0].error.contains("gave up after 4 attempts"));
    assert!(summary.failures[0].error.contains("503"));
    assert_eq!(source.call_count("bars/10min/A"), 4);
    assert_eq!(sleeper.delays().len(), 3);
}

#[test]
fn cancelled_run_skips_remaining_units() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    let source = abc_source();
    let pipeline =
        BackfillPipeline::new(Executor::new(&writer).with_progress(&NoProgress)).with_bars(&source);
    let cancel = AtomicBool::new(true);

    let summary = pipeline
        .run(&bars_only(&["A", "B", "C"]), window(), Some(&cancel))
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.succeeded + summary.failed, 0);
    assert!(source.calls().is_empty());
    assert!(!dir.path().join("bars").exists());
}

#[test]
fn write_failure_aborts_even_with_continue_on_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file in the way").unwrap();
    let writer = PartitionedWriter::new(&blocker);
    let source = abc_source();
    let pipeline =
        BackfillPipeline::new(Executor::new(&writer).with_progress(&NoProgress)).with_bars(&source);

    let err = pipeline.run(&bars_only(&["A", "B", "C"]), window(), None).unwrap_err();

    assert!(matches!(err, PipelineError::Write { ref unit, .. } if unit == "bars/10min/A"));
    assert_eq!(source.call_count("bars/10min/B"), 0);
}

#[test]
fn every_dataset_kind_lands_in_its_own_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    let bars = ScriptedSource::new("alpaca").respond("bars/10min/AAPL", Ok(raw_bars(190.0)));
    let fred = ScriptedSource::new("fred").respond(
        "macro/EFFR",
        Ok(df!("date" => &["2024-01-02"], "value" => &[Some("5.33")]).unwrap()),
    );
    let sec = ScriptedSource::new("sec").respond(
        "filings/AAPL",
        Ok(df!(
            "filingDate" => &["2024-01-02"],
            "acceptanceDateTime" => &["2024-01-02T16:30:05.000Z"],
            "form" => &["8-K"],
            "accessionNumber" => &["0000320193-24-000001"],
        )
        .unwrap()),
    );
    let gdelt = ScriptedSource::new("gdelt").respond(
        "news/AAPL",
        Ok(df!(
            "seendate" => &["20240102T150000Z"],
            "domain" => &["example.com"],
            "url" => &["https://example.com/aapl"],
            "tone" => &[1.5],
        )
        .unwrap()),
    );
    let pipeline = BackfillPipeline::new(Executor::new(&writer).with_progress(&NoProgress))
        .with_bars(&bars)
        .with_macro(&fred)
        .with_filings(&sec)
        .with_news(&gdelt);
    let config = BackfillConfig {
        fred_series: vec!["EFFR".into()],
        symbol_to_cik: BTreeMap::from([("AAPL".to_string(), "0000320193".to_string())]),
        ..bars_only(&["AAPL"])
    };

    let summary = pipeline.run(&config, window(), None).unwrap();

    assert_eq!(summary.total_units, 4);
    assert_eq!(summary.succeeded, 4, "{summary}");
    assert_eq!(summary.rows_written, 5);
    for dataset in ["bars", "macro", "filings", "news"] {
        assert!(summary.outputs.contains(&dir.path().join(dataset)), "{dataset}");
    }
    assert!(dir.path().join("macro/series_id=EFFR").is_dir());
    assert!(dir.path().join("filings/symbol=AAPL").is_dir());
    assert!(dir.path().join("news/symbol=AAPL").is_dir());
}

#[test]
fn rerunning_a_backfill_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    let source = abc_source();
    let pipeline =
        BackfillPipeline::new(Executor::new(&writer).with_progress(&NoProgress)).with_bars(&source);
    let config = bars_only(&["A", "C"]);

    pipeline.run(&config, window(), None).unwrap();
    let once = read_dataset(dir.path().join("bars")).unwrap();
    pipeline.run(&config, window(), None).unwrap();
    let twice = read_dataset(dir.path().join("bars")).unwrap();

    assert!(once.equals_missing(&twice));
}
