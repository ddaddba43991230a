//! Read side of a partitioned dataset.

use super::writer::{unescape_value, PartitionMeta, DATA_FILE, META_FILE};
use polars::prelude::*;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("no dataset at {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("polars error reading {}: {source}", path.display())]
    Polars {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },
}

/// One partition directory holding a data file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionInfo {
    /// Path relative to the dataset root, e.g. `symbol=AAPL/timeframe=10min/date=2024-01-02`.
    pub path: PathBuf,
    /// Decoded `(name, value)` segments.
    pub values: Vec<(String, String)>,
    pub meta: Option<PartitionMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetStats {
    pub dataset_path: PathBuf,
    pub partitions: usize,
    pub rows: usize,
    pub bytes: u64,
}

pub struct DatasetReader {
    root: PathBuf,
}

impl DatasetReader {
    pub fn new(dataset_path: impl Into<PathBuf>) -> Self {
        Self {
            root: dataset_path.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every partition under the root, sorted by relative path.
    pub fn partitions(&self) -> Result<Vec<PartitionInfo>, ReadError> {
        if !self.root.is_dir() {
            return Err(ReadError::NotFound(self.root.clone()));
        }
        let mut found = Vec::new();
        walk(&self.root, &self.root, &mut found)?;
        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }

    /// One partition's rows.
    pub fn read_partition(&self, relative: &Path) -> Result<DataFrame, ReadError> {
        let path = self.root.join(relative).join(DATA_FILE);
        let file = fs::File::open(&path).map_err(|source| ReadError::Io {
            path: path.clone(),
            source,
        })?;
        ParquetReader::new(file)
            .finish()
            .map_err(|source| ReadError::Polars { path, source })
    }

    /// Every partition concatenated in partition order. Empty if none exist.
    pub fn read(&self) -> Result<DataFrame, ReadError> {
        let mut out: Option<DataFrame> = None;
        for part in self.partitions()? {
            let df = self.read_partition(&part.path)?;
            match out.as_mut() {
                Some(acc) => {
                    acc.vstack_mut(&df).map_err(|source| ReadError::Polars {
                        path: self.root.join(&part.path),
                        source,
                    })?;
                }
                None => out = Some(df),
            }
        }
        Ok(out.unwrap_or_default())
    }

    pub fn stats(&self) -> Result<DatasetStats, ReadError> {
        let partitions = self.partitions()?;
        let mut rows = 0;
        let mut bytes = 0;
        for part in &partitions {
            let file = self.root.join(&part.path).join(DATA_FILE);
            bytes += fs::metadata(&file)
                .map_err(|source| ReadError::Io {
                    path: file.clone(),
                    source,
                })?
                .len();
            rows += match &part.meta {
                Some(meta) => meta.row_count,
                None => self.read_partition(&part.path)?.height(),
            };
        }
        Ok(DatasetStats {
            dataset_path: self.root.clone(),
            partitions: partitions.len(),
            rows,
            bytes,
        })
    }
}

/// Convenience for `DatasetReader::new(path).read()`.
pub fn read_dataset(dataset_path: impl Into<PathBuf>) -> Result<DataFrame, ReadError> {
    DatasetReader::new(dataset_path).read()
}

pub fn dataset_stats(dataset_path: impl Into<PathBuf>) -> Result<DatasetStats, ReadError> {
    DatasetReader::new(dataset_path).stats()
}

fn walk(root: &Path, dir: &Path, found: &mut Vec<PartitionInfo>) -> Result<(), ReadError> {
    let io_err = |source| ReadError::Io {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_dir() {
            walk(root, &path, found)?;
        } else if path.file_name().and_then(|n| n.to_str()) == Some(DATA_FILE) {
            let relative = dir.strip_prefix(root).unwrap_or(dir).to_path_buf();
            let values = relative
                .iter()
                .filter_map(|seg| seg.to_str())
                .filter_map(|seg| seg.split_once('='))
                .map(|(k, v)| (k.to_string(), unescape_value(v)))
                .collect();
            let meta = fs::read_to_string(dir.join(META_FILE))
                .ok()
                .and_then(|s| serde_json::from_str(&s).ok());
            found.push(PartitionInfo {
                path: relative,
                values,
                meta,
            });
        }
    }
    Ok(())
}
