//! Partitioned dedup writer: idempotence, keep-last, isolation, layout.

use marketlake_core::data::coerce;
use marketlake_core::data::writer::{DATA_FILE, META_FILE};
use marketlake_core::data::{
    normalize, read_dataset, DatasetReader, PartitionMeta, PartitionedWriter, Provenance, WriteError,
};
use marketlake_core::{DatasetKind, Partition};
use polars::prelude::*;
use std::fs;
use std::path::Path;

fn bars(symbol: &str, rows: &[(&str, f64)]) -> DataFrame {
    let n = rows.len();
    let raw = df!(
        "symbol" => vec![symbol; n],
        "timestamp" => rows.iter().map(|r| r.0).collect::<Vec<_>>(),
        "open" => rows.iter().map(|r| r.1).collect::<Vec<_>>(),
        "high" => rows.iter().map(|r| r.1 + 1.0).collect::<Vec<_>>(),
        "low" => rows.iter().map(|r| r.1 - 1.0).collect::<Vec<_>>(),
        "close" => rows.iter().map(|r| r.1).collect::<Vec<_>>(),
        "volume" => vec![100.0; n],
    )
    .unwrap();
    normalize(
        DatasetKind::Bar,
        &raw,
        &Provenance::new("alpaca").with_feed("iex").with_default("timeframe", "10min"),
    )
    .unwrap()
}

fn closes(df: &DataFrame) -> Vec<Option<f64>> {
    coerce::float_values(coerce::series(df, "close").unwrap()).unwrap()
}

fn files_under(root: &Path) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path.strip_prefix(root).unwrap().display().to_string());
            }
        }
    }
    out.sort();
    out
}

#[test]
fn hive_layout_matches_partition_columns() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    let batch = bars(
        "AAPL",
        &[("2024-01-02T14:30:00Z", 10.0), ("2024-01-03T14:30:00Z", 11.0)],
    );
    let report = writer.write_kind(DatasetKind::Bar, &batch).unwrap();

    assert_eq!(report.dataset_path, dir.path().join("bars"));
    assert_eq!(report.rows_written, 2);
    assert_eq!(
        files_under(&report.dataset_path),
        vec![
            format!("symbol=AAPL/timeframe=10min/date=2024-01-02/{META_FILE}"),
            format!("symbol=AAPL/timeframe=10min/date=2024-01-02/{DATA_FILE}"),
            format!("symbol=AAPL/timeframe=10min/date=2024-01-03/{META_FILE}"),
            format!("symbol=AAPL/timeframe=10min/date=2024-01-03/{DATA_FILE}"),
        ]
    );
}

#[test]
fn writing_the_same_batch_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    let batch = bars(
        "AAPL",
        &[("2024-01-02T14:30:00Z", 10.0), ("2024-01-02T14:40:00Z", 11.0)],
    );

    writer.write_kind(DatasetKind::Bar, &batch).unwrap();
    let once = read_dataset(dir.path().join("bars")).unwrap();
    writer.write_kind(DatasetKind::Bar, &batch).unwrap();
    let twice = read_dataset(dir.path().join("bars")).unwrap();

    assert_eq!(once.height(), 2);
    assert!(once.equals_missing(&twice));
}

#[test]
fn later_batch_wins_on_shared_key() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    writer
        .write_kind(
            DatasetKind::Bar,
            &bars("AAPL", &[("2024-01-02T14:30:00Z", 10.0), ("2024-01-02T14:40:00Z", 11.0)]),
        )
        .unwrap();
    writer
        .write_kind(
            DatasetKind::Bar,
            &bars("AAPL", &[("2024-01-02T14:40:00Z", 99.0), ("2024-01-02T14:50:00Z", 12.0)]),
        )
        .unwrap();

    let all = read_dataset(dir.path().join("bars")).unwrap();
    assert_eq!(all.height(), 3);
    assert_eq!(closes(&all), vec![Some(10.0), Some(99.0), Some(12.0)]);
}

#[test]
fn duplicate_keys_within_a_batch_keep_the_last_row() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    let batch = bars(
        "AAPL",
        &[("2024-01-02T14:30:00Z", 10.0), ("2024-01-02T14:30:00Z", 20.0)],
    );
    let report = writer.write_kind(DatasetKind::Bar, &batch).unwrap();
    assert_eq!(report.rows_written, 1);
    assert_eq!(closes(&read_dataset(report.dataset_path).unwrap()), vec![Some(20.0)]);
}

#[test]
fn writes_never_touch_sibling_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    writer
        .write_kind(DatasetKind::Bar, &bars("MSFT", &[("2024-01-02T14:30:00Z", 370.0)]))
        .unwrap();
    let msft = dir
        .path()
        .join("bars/symbol=MSFT/timeframe=10min/date=2024-01-02");
    let before_data = fs::read(msft.join(DATA_FILE)).unwrap();
    let before_meta = fs::read(msft.join(META_FILE)).unwrap();

    writer
        .write_kind(
            DatasetKind::Bar,
            &bars("AAPL", &[("2024-01-02T14:30:00Z", 10.0), ("2024-01-02T14:40:00Z", 11.0)]),
        )
        .unwrap();

    assert_eq!(fs::read(msft.join(DATA_FILE)).unwrap(), before_data);
    assert_eq!(fs::read(msft.join(META_FILE)).unwrap(), before_meta);
}

#[test]
fn empty_batch_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    let empty = DataFrame::empty_with_schema(&DatasetKind::Bar.schema().polars_schema());
    let report = writer.write_kind(DatasetKind::Bar, &empty).unwrap();
    assert_eq!(report.rows_written, 0);
    assert!(report.partitions.is_empty());
    assert!(!dir.path().join("bars").exists());
}

#[test]
fn no_temporary_files_remain() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    for _ in 0..3 {
        writer
            .write_kind(DatasetKind::Bar, &bars("AAPL", &[("2024-01-02T14:30:00Z", 10.0)]))
            .unwrap();
    }
    assert!(files_under(dir.path()).iter().all(|f| !f.ends_with(".tmp")));
}

#[test]
fn meta_sidecar_matches_partition_contents() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    writer
        .write_kind(
            DatasetKind::Bar,
            &bars("AAPL", &[("2024-01-02T14:30:00Z", 10.0), ("2024-01-02T14:40:00Z", 11.0)]),
        )
        .unwrap();
    let part = dir.path().join("bars/symbol=AAPL/timeframe=10min/date=2024-01-02");
    let meta: PartitionMeta =
        serde_json::from_str(&fs::read_to_string(part.join(META_FILE)).unwrap()).unwrap();
    assert_eq!(meta.row_count, 2);
    let bytes = fs::read(part.join(DATA_FILE)).unwrap();
    assert_eq!(meta.content_hash, blake3::hash(&bytes).to_hex().to_string());
}

#[test]
fn meta_sidecar_tracks_every_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    writer
        .write_kind(DatasetKind::Bar, &bars("AAPL", &[("2024-01-02T14:30:00Z", 10.0)]))
        .unwrap();
    writer
        .write_kind(
            DatasetKind::Bar,
            &bars("AAPL", &[("2024-01-02T14:40:00Z", 11.0), ("2024-01-02T14:50:00Z", 12.0)]),
        )
        .unwrap();

    let part = dir.path().join("bars/symbol=AAPL/timeframe=10min/date=2024-01-02");
    let meta: PartitionMeta =
        serde_json::from_str(&fs::read_to_string(part.join(META_FILE)).unwrap()).unwrap();
    assert_eq!(meta.row_count, 3);
    let bytes = fs::read(part.join(DATA_FILE)).unwrap();
    assert_eq!(meta.content_hash, blake3::hash(&bytes).to_hex().to_string());
    let stats = DatasetReader::new(dir.path().join("bars")).stats().unwrap();
    assert_eq!(stats.rows, 3);
    assert!(files_under(dir.path()).iter().all(|f| !f.ends_with(".tmp")));
}

#[test]
fn failed_sidecar_write_leaves_no_temporary_file() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    let part = dir.path().join("bars/symbol=AAPL/timeframe=10min/date=2024-01-02");
    // A directory in the sidecar's place makes the final rename fail.
    fs::create_dir_all(part.join(META_FILE).join("blocked")).unwrap();

    let err = writer
        .write_kind(DatasetKind::Bar, &bars("AAPL", &[("2024-01-02T14:30:00Z", 10.0)]))
        .unwrap_err();

    assert!(matches!(err, WriteError::Io { .. }));
    assert!(files_under(dir.path()).iter().all(|f| !f.ends_with(".tmp")));
}

#[test]
fn reader_lists_partitions_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    writer
        .write_kind(DatasetKind::Bar, &bars("AAPL", &[("2024-01-02T14:30:00Z", 10.0)]))
        .unwrap();
    writer
        .write_kind(DatasetKind::Bar, &bars("MSFT", &[("2024-01-02T14:30:00Z", 370.0)]))
        .unwrap();

    let reader = DatasetReader::new(dir.path().join("bars"));
    let parts = reader.partitions().unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(
        parts[0].values,
        vec![
            ("symbol".to_string(), "AAPL".to_string()),
            ("timeframe".to_string(), "10min".to_string()),
            ("date".to_string(), "2024-01-02".to_string()),
        ]
    );
    let stats = reader.stats().unwrap();
    assert_eq!(stats.partitions, 2);
    assert_eq!(stats.rows, 2);
    assert!(stats.bytes > 0);
}

#[test]
fn reading_a_missing_dataset_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(read_dataset(dir.path().join("nothing")).is_err());
}

#[test]
fn generic_write_with_custom_layout() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    let batch = df!(
        "region" => &[Some("us/east"), None, Some("eu")],
        "id" => &[1i64, 2, 3],
        "v" => &[1.0, 2.0, 3.0],
    )
    .unwrap();
    let report = writer
        .write(&batch, "custom", &[Partition::Column("region")], &["id"])
        .unwrap();
    let mut parts: Vec<String> = report.partitions.iter().map(|p| p.display().to_string()).collect();
    parts.sort();
    assert_eq!(
        parts,
        vec!["region=__HIVE_DEFAULT_PARTITION__", "region=eu", "region=us%2Feast"]
    );
}

#[test]
fn literal_default_partition_value_is_kept_apart_from_nulls() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    let batch = df!(
        "region" => &[Some("__HIVE_DEFAULT_PARTITION__"), None, None],
        "id" => &[1i64, 2, 3],
    )
    .unwrap();
    let report = writer
        .write(&batch, "custom", &[Partition::Column("region")], &["id"])
        .unwrap();
    let mut parts: Vec<String> = report.partitions.iter().map(|p| p.display().to_string()).collect();
    parts.sort();
    assert_eq!(
        parts,
        vec!["region=%5F_HIVE_DEFAULT_PARTITION__", "region=__HIVE_DEFAULT_PARTITION__"]
    );

    let reader = DatasetReader::new(dir.path().join("custom"));
    let literal = reader
        .read_partition(Path::new("region=%5F_HIVE_DEFAULT_PARTITION__"))
        .unwrap();
    assert_eq!(literal.height(), 1);
    let nulls = reader
        .read_partition(Path::new("region=__HIVE_DEFAULT_PARTITION__"))
        .unwrap();
    assert_eq!(nulls.height(), 2);
}

#[test]
fn missing_dedup_column_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    let batch = df!("a" => &[1i64]).unwrap();
    let err = writer
        .write(&batch, "x", &[Partition::Column("a")], &["missing"])
        .unwrap_err();
    assert!(matches!(err, WriteError::MissingColumn(ref c) if c == "missing"));
}

#[test]
fn schema_drift_against_existing_partition_fails() {
    let dir = tempfile::tempdir().unwrap();
    let writer = PartitionedWriter::new(dir.path());
    writer
        .write(&df!("k" => &["a"], "v" => &[1i64]).unwrap(), "x", &[Partition::Column("k")], &["k"])
        .unwrap();
    let err = writer
        .write(&df!("k" => &["a"], "v" => &["text"]).unwrap(), "x", &[Partition::Column("k")], &["k"])
        .unwrap_err();
    assert!(matches!(err, WriteError::SchemaMismatch { .. }));
}
