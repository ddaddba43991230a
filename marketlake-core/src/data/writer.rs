//! Partitioned dedup writer with Hive-style layout.
//!
//! Layout: `{base_dir}/{dataset}/{col}={value}/.../data.parquet`
//!
//! - Incoming batches are deduplicated on the identity key, keep-last.
//! - Each touched partition is rewritten as old ∪ new, deduplicated keep-last,
//!   sorted by key, written to `.tmp` and renamed into place.
//! - A `_meta.json` sidecar per partition records row count and content hash.
//!
//! Not safe for concurrent writers on the same partition; callers serialize.

use super::coerce::{self, date_from_days, millis_to_days};
use crate::schema::{DatasetKind, Partition, SchemaError};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DATA_FILE: &str = "data.parquet";
pub const META_FILE: &str = "_meta.json";
pub const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("batch has no column '{0}' required for partitioning or dedup")]
    MissingColumn(String),

    #[error("batch schema does not match existing data in {}", partition.display())]
    SchemaMismatch { partition: PathBuf },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("polars error during write: {0}")]
    Polars(#[from] PolarsError),

    #[error("partition metadata error: {0}")]
    Meta(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> WriteError + '_ {
    move |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Sidecar written next to every partition file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartitionMeta {
    pub row_count: usize,
    pub content_hash: String,
    pub written_at: DateTime<Utc>,
}

/// Outcome of one `write` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteReport {
    pub dataset_path: PathBuf,
    /// Rows in the incoming batch after in-batch dedup.
    pub rows_written: usize,
    /// Partition directories touched, relative to `dataset_path`.
    pub partitions: Vec<PathBuf>,
}

pub struct PartitionedWriter {
    base_dir: PathBuf,
}

impl PartitionedWriter {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn dataset_path(&self, dataset: &str) -> PathBuf {
        self.base_dir.join(dataset)
    }

    /// Write a canonical batch of `kind` using the registry's layout and key.
    pub fn write_kind(&self, kind: DatasetKind, batch: &DataFrame) -> Result<WriteReport, WriteError> {
        let schema = kind.schema();
        if batch.height() > 0 {
            schema.validate(batch)?;
        }
        self.write(batch, kind.dataset_name(), schema.partitions, schema.identity_key)
    }

    /// Upsert `batch` into `dataset`, partition by partition.
    pub fn write(
        &self,
        batch: &DataFrame,
        dataset: &str,
        partitions: &[Partition],
        dedup_key: &[&str],
    ) -> Result<WriteReport, WriteError> {
        let dataset_path = self.dataset_path(dataset);
        if batch.height() == 0 {
            return Ok(WriteReport {
                dataset_path,
                ..WriteReport::default()
            });
        }

        for name in dedup_key
            .iter()
            .copied()
            .chain(partitions.iter().map(|p| p.source_column()))
        {
            if batch.get_column_index(name).is_none() {
                return Err(WriteError::MissingColumn(name.to_string()));
            }
        }

        let batch = dedup_keep_last(batch.clone(), dedup_key)?;
        let groups = group_by_partition(&batch, partitions)?;

        let mut report = WriteReport {
            dataset_path: dataset_path.clone(),
            rows_written: batch.height(),
            partitions: Vec::with_capacity(groups.len()),
        };
        for (rel, rows) in groups {
            let part = batch.take(&IdxCa::from_vec("idx".into(), rows))?;
            let dir = dataset_path.join(&rel);
            let total = merge_partition(&dir, part, dedup_key)?;
            tracing::debug!(partition = %dir.display(), rows = total, "partition written");
            report.partitions.push(rel);
        }
        Ok(report)
    }
}

/// Replace one partition's file with old ∪ new, keyed keep-last.
fn merge_partition(dir: &Path, part: DataFrame, dedup_key: &[&str]) -> Result<usize, WriteError> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    let path = dir.join(DATA_FILE);

    let combined = if path.exists() {
        let mut existing = read_parquet(&path)?;
        if !same_schema(&existing, &part) {
            return Err(WriteError::SchemaMismatch {
                partition: dir.to_path_buf(),
            });
        }
        existing.vstack_mut(&part)?;
        existing
    } else {
        part
    };

    let mut merged = dedup_keep_last(combined, dedup_key)?
        .lazy()
        .sort(
            key_names(dedup_key),
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()?;

    let tmp_path = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp_path).map_err(io_err(&tmp_path))?;
    if let Err(e) = ParquetWriter::new(file).finish(&mut merged) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    let bytes = fs::read(&tmp_path).map_err(io_err(&tmp_path))?;
    fs::rename(&tmp_path, &path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        WriteError::Io {
            path: path.clone(),
            source: e,
        }
    })?;

    let meta = PartitionMeta {
        row_count: merged.height(),
        content_hash: blake3::hash(&bytes).to_hex().to_string(),
        written_at: Utc::now(),
    };
    write_meta(dir, &meta)?;

    Ok(merged.height())
}

/// Replace the partition's sidecar through its own `.tmp` and rename.
fn write_meta(dir: &Path, meta: &PartitionMeta) -> Result<(), WriteError> {
    let meta_path = dir.join(META_FILE);
    let tmp_path = meta_path.with_extension("json.tmp");
    fs::write(&tmp_path, serde_json::to_string_pretty(meta)?).map_err(io_err(&tmp_path))?;
    fs::rename(&tmp_path, &meta_path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        WriteError::Io {
            path: meta_path.clone(),
            source: e,
        }
    })
}

fn dedup_keep_last(df: DataFrame, dedup_key: &[&str]) -> PolarsResult<DataFrame> {
    df.lazy()
        .unique_stable(Some(key_names(dedup_key)), UniqueKeepStrategy::Last)
        .collect()
}

fn key_names(keys: &[&str]) -> Vec<PlSmallStr> {
    keys.iter().map(|k| (*k).into()).collect()
}

fn same_schema(a: &DataFrame, b: &DataFrame) -> bool {
    a.get_column_names() == b.get_column_names() && a.dtypes() == b.dtypes()
}

pub(crate) fn read_parquet(path: &Path) -> Result<DataFrame, WriteError> {
    let file = fs::File::open(path).map_err(io_err(path))?;
    Ok(ParquetReader::new(file).finish()?)
}

/// Row indices per relative partition path, in path order.
fn group_by_partition(
    df: &DataFrame,
    partitions: &[Partition],
) -> Result<BTreeMap<PathBuf, Vec<IdxSize>>, WriteError> {
    let rendered = partitions
        .iter()
        .map(|p| render_partition_values(df, p))
        .collect::<PolarsResult<Vec<_>>>()?;

    let mut groups: BTreeMap<PathBuf, Vec<IdxSize>> = BTreeMap::new();
    for row in 0..df.height() {
        let mut rel = PathBuf::new();
        for (part, values) in partitions.iter().zip(&rendered) {
            let value = values[row].as_deref().map_or_else(|| NULL_PARTITION.to_string(), escape_value);
            rel.push(format!("{}={value}", part.segment_name()));
        }
        groups.entry(rel).or_default().push(row as IdxSize);
    }
    Ok(groups)
}

/// String form of every row's value for one partition level.
fn render_partition_values(df: &DataFrame, partition: &Partition) -> PolarsResult<Vec<Option<String>>> {
    let s = coerce::series(df, partition.source_column())?;
    let as_date = |days: Option<i32>| days.and_then(date_from_days).map(|d| d.format("%Y-%m-%d").to_string());
    match partition {
        Partition::DateOf(_) => Ok(coerce::timestamp_values(s)?
            .into_iter()
            .map(|ts| as_date(ts.map(millis_to_days)))
            .collect()),
        Partition::Column(_) => match s.dtype() {
            DataType::Date => Ok(coerce::date_values(s)?.into_iter().map(as_date).collect()),
            _ => coerce::string_values(s),
        },
    }
}

/// Percent-escape characters that would break a `col=value` path segment.
///
/// A literal [`NULL_PARTITION`] value has its first `_` escaped so it never
/// shares a directory with null values.
pub fn escape_value(value: &str) -> String {
    if value.chars().all(|c| c == '.') {
        return value.chars().map(|_| "%2E").collect();
    }
    if value == NULL_PARTITION {
        return format!("%5F{}", &NULL_PARTITION[1..]);
    }
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' | '/' | '\\' | '=' | ':' => out.push_str(&format!("%{:02X}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_value`].
pub fn unescape_value(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_path_breaking_characters() {
        assert_eq!(escape_value("BRK/B"), "BRK%2FB");
        assert_eq!(escape_value("a=b:c"), "a%3Db%3Ac");
        assert_eq!(escape_value("100%"), "100%25");
        assert_eq!(escape_value(".."), "%2E%2E");
        assert_eq!(escape_value("BRK.B"), "BRK.B");
    }

    #[test]
    fn unescape_reverses_escape() {
        for v in ["BRK/B", "a=b:c", "100%", "..", "plain", NULL_PARTITION] {
            assert_eq!(unescape_value(&escape_value(v)), v);
        }
    }

    #[test]
    fn null_partition_values_use_hive_default() {
        let df = df!("k" => &[Some("a"), None], "series_id" => &[Some("X"), None]).unwrap();
        let groups = group_by_partition(&df, &[Partition::Column("series_id")]).unwrap();
        let keys: Vec<String> = groups.keys().map(|p| p.display().to_string()).collect();
        assert_eq!(keys, vec!["series_id=X".to_string(), format!("series_id={NULL_PARTITION}")]);
    }

    #[test]
    fn literal_default_partition_value_is_escaped() {
        assert_eq!(escape_value(NULL_PARTITION), "%5F_HIVE_DEFAULT_PARTITION__");
        assert_eq!(escape_value("_HIVE_DEFAULT_PARTITION__"), "_HIVE_DEFAULT_PARTITION__");

        let df = df!("series_id" => &[Some(NULL_PARTITION), None]).unwrap();
        let groups = group_by_partition(&df, &[Partition::Column("series_id")]).unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups.contains_key(Path::new("series_id=%5F_HIVE_DEFAULT_PARTITION__")));
        assert!(groups.contains_key(&PathBuf::from(format!("series_id={NULL_PARTITION}"))));
    }

    #[test]
    fn in_batch_dedup_keeps_last_occurrence() {
        let df = df!("k" => &["a", "b", "a"], "v" => &[1, 2, 3]).unwrap();
        let out = dedup_keep_last(df, &["k"]).unwrap();
        assert_eq!(out.height(), 2);
        let sorted = out.sort(["k"], SortMultipleOptions::default()).unwrap();
        let v: Vec<Option<i32>> = sorted.column("v").unwrap().as_materialized_series().i32().unwrap().into_iter().collect();
        assert_eq!(v, vec![Some(3), Some(2)]);
    }
}
