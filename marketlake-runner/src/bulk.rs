//! Stooq bulk import.
//!
//! Reads a tickers CSV, matches each ticker against the indexed bulk
//! directory or archive and runs one bar unit per matched ticker, resampled
//! from the files' native width to the target width.

use crate::pipeline::{Executor, PipelineError, UnitPlan};
use crate::summary::RunSummary;
use chrono::{DateTime, Utc};
use marketlake_core::data::{FetchWindow, Selector, StooqDirectory};
use marketlake_core::{DatasetKind, Timeframe};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TickerError {
    #[error("tickers file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("tickers file {} has no 'symbol' column (found: {})", path.display(), found.join(", "))]
    MissingSymbolColumn { path: PathBuf, found: Vec<String> },

    #[error("tickers file {} lists no symbols", .0.display())]
    Empty(PathBuf),

    #[error("failed to read tickers file {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Read the `symbol` column of a tickers CSV: trimmed, upper-cased, blanks
/// dropped, first occurrence kept.
pub fn load_tickers(path: &Path) -> Result<Vec<String>, TickerError> {
    if !path.is_file() {
        return Err(TickerError::NotFound(path.to_path_buf()));
    }
    let csv_err = |source| TickerError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(str::to_string)
        .collect();
    let column = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("symbol"))
        .ok_or_else(|| TickerError::MissingSymbolColumn {
            path: path.to_path_buf(),
            found: headers.clone(),
        })?;

    let mut seen = BTreeSet::new();
    let mut tickers = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let Some(value) = record.get(column).map(str::trim).filter(|v| !v.is_empty()) else {
            continue;
        };
        let ticker = value.to_ascii_uppercase();
        if seen.insert(ticker.clone()) {
            tickers.push(ticker);
        }
    }

    if tickers.is_empty() {
        return Err(TickerError::Empty(path.to_path_buf()));
    }
    Ok(tickers)
}

/// Import every ticker found in `directory`, resampled to `target`.
///
/// Tickers with no file are logged and left out. Fails when none match.
pub fn import_stooq(
    executor: &Executor<'_>,
    directory: &StooqDirectory,
    tickers: &[String],
    target: Timeframe,
    continue_on_error: bool,
    cancel: Option<&AtomicBool>,
) -> Result<RunSummary, PipelineError> {
    let (present, missing): (Vec<&String>, Vec<&String>) =
        tickers.iter().partition(|t| directory.contains(t));
    if !missing.is_empty() {
        tracing::warn!(
            count = missing.len(),
            tickers = %missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(","),
            "tickers with no stooq file"
        );
    }
    if present.is_empty() {
        return Err(PipelineError::NoMatchingFiles {
            tickers: tickers.len(),
            dir: directory.root().to_path_buf(),
        });
    }

    // Bulk files hold whole histories; the window is not consulted.
    let window = FetchWindow::new(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC);
    let units: Vec<UnitPlan<'_>> = present
        .into_iter()
        .map(|ticker| {
            let selector = Selector::Bars {
                symbols: vec![ticker.to_ascii_uppercase()],
                timeframe: target,
            };
            UnitPlan {
                id: selector.label(),
                kind: DatasetKind::Bar,
                adapter: directory,
                selector,
                window,
            }
        })
        .collect();

    tracing::info!(
        dir = %directory.root().display(),
        units = units.len(),
        timeframe = %target,
        "starting stooq import"
    );
    executor.drive("bulk-stooq", &units, continue_on_error, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn tickers_are_trimmed_upper_cased_and_unique() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickers.csv");
        fs::write(&path, "name,Symbol\nApple, aapl.us \nApple again,AAPL.US\nblank,\nMicrosoft,msft.us\n").unwrap();
        assert_eq!(load_tickers(&path).unwrap(), vec!["AAPL.US", "MSFT.US"]);
    }

    #[test]
    fn missing_symbol_column_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickers.csv");
        fs::write(&path, "ticker\nAAPL\n").unwrap();
        assert!(matches!(
            load_tickers(&path).unwrap_err(),
            TickerError::MissingSymbolColumn { .. }
        ));
    }

    #[test]
    fn header_only_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickers.csv");
        fs::write(&path, "symbol\n\n").unwrap();
        assert!(matches!(load_tickers(&path).unwrap_err(), TickerError::Empty(_)));
    }

    #[test]
    fn absent_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_tickers(&dir.path().join("nope.csv")).unwrap_err(),
            TickerError::NotFound(_)
        ));
    }
}
