//! Unit execution shared by every orchestrator.
//!
//! A unit is one selector fetched from one adapter over one window. Each
//! unit runs fetch (with retry) → normalize → resample (bars whose adapter
//! delivers a finer width) → write, to completion, before the next starts.
//!
//! Failure policy:
//! - fetch, normalize and resample failures belong to the unit; they are
//!   collected into the [`RunSummary`] when `continue_on_error` is set and
//!   abort the run otherwise
//! - write failures always abort the run

use crate::bulk::TickerError;
use crate::config::ConfigError;
use crate::progress::{IngestProgress, LogProgress};
use crate::summary::{RunSummary, UnitFailure};
use marketlake_core::data::{
    normalize, resample, FetchError, FetchWindow, NormalizeError, PartitionedWriter, ResampleError,
    RetryPolicy, Selector, Sleeper, SourceAdapter, ThreadSleeper, WriteError, WriteReport,
};
use marketlake_core::DatasetKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Why a single unit failed. Isolated to that unit.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Resample(#[from] ResampleError),
}

/// Why a whole run stopped.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("write failed for {unit}: {source}")]
    Write {
        unit: String,
        #[source]
        source: WriteError,
    },

    #[error("unit {unit} failed and continue_on_error is off: {source}")]
    UnitFailed {
        unit: String,
        #[source]
        source: UnitError,
    },

    #[error(transparent)]
    Tickers(#[from] TickerError),

    #[error("none of {tickers} tickers matched a file in {}", dir.display())]
    NoMatchingFiles { tickers: usize, dir: PathBuf },

    #[error("source unavailable: {0}")]
    Source(#[from] FetchError),
}

enum StepError {
    Unit(UnitError),
    Write(WriteError),
}

impl From<UnitError> for StepError {
    fn from(e: UnitError) -> Self {
        StepError::Unit(e)
    }
}

/// One planned fetch-to-write step.
pub struct UnitPlan<'a> {
    /// Identifier reported in logs and the run summary.
    pub id: String,
    pub kind: DatasetKind,
    pub adapter: &'a dyn SourceAdapter,
    pub selector: Selector,
    pub window: FetchWindow,
}

/// Runs units against one writer with a shared retry policy.
pub struct Executor<'a> {
    writer: &'a PartitionedWriter,
    retry: RetryPolicy,
    sleeper: &'a dyn Sleeper,
    progress: &'a dyn IngestProgress,
}

impl<'a> Executor<'a> {
    pub fn new(writer: &'a PartitionedWriter) -> Self {
        Self {
            writer,
            retry: RetryPolicy::default(),
            sleeper: &ThreadSleeper,
            progress: &LogProgress,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn IngestProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn writer(&self) -> &PartitionedWriter {
        self.writer
    }

    fn run_unit(&self, unit: &UnitPlan<'_>) -> Result<WriteReport, StepError> {
        let raw = self
            .retry
            .run(self.sleeper, &unit.id, |attempt| {
                tracing::debug!(unit = %unit.id, attempt, "fetch");
                unit.adapter.fetch(&unit.selector, &unit.window)
            })
            .map_err(UnitError::from)?;

        let provenance = unit.adapter.provenance(&unit.selector);
        let mut batch = normalize(unit.kind, &raw, &provenance).map_err(UnitError::from)?;

        if let (DatasetKind::Bar, Selector::Bars { timeframe, .. }) = (unit.kind, &unit.selector) {
            if unit.adapter.native_timeframe(*timeframe) != *timeframe {
                batch = resample(&batch, *timeframe).map_err(UnitError::from)?;
            }
        }

        self.writer.write_kind(unit.kind, &batch).map_err(StepError::Write)
    }

    /// Run `units` in order. Cancellation is checked before each unit;
    /// units not started are counted as skipped.
    pub fn drive(
        &self,
        run: &str,
        units: &[UnitPlan<'_>],
        continue_on_error: bool,
        cancel: Option<&AtomicBool>,
    ) -> Result<RunSummary, PipelineError> {
        let total = units.len();
        let mut summary = RunSummary::new(run, total);

        for (index, unit) in units.iter().enumerate() {
            if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
                summary.cancelled = true;
                summary.skipped = total - index;
                tracing::warn!(run, remaining = summary.skipped, "run cancelled");
                break;
            }

            self.progress.on_start(&unit.id, index, total);
            match self.run_unit(unit) {
                Ok(report) => {
                    summary.succeeded += 1;
                    summary.rows_written += report.rows_written;
                    if report.rows_written > 0 {
                        summary.outputs.insert(report.dataset_path);
                    }
                    self.progress
                        .on_complete(&unit.id, index, total, &Ok(report.rows_written));
                }
                Err(StepError::Write(source)) => {
                    tracing::error!(unit = %unit.id, error = %source, "write failed, aborting run");
                    return Err(PipelineError::Write {
                        unit: unit.id.clone(),
                        source,
                    });
                }
                Err(StepError::Unit(err)) => {
                    summary.failed += 1;
                    summary.failures.push(UnitFailure {
                        unit: unit.id.clone(),
                        error: err.to_string(),
                    });
                    let result = Err(err);
                    self.progress.on_complete(&unit.id, index, total, &result);
                    if let (false, Err(source)) = (continue_on_error, result) {
                        return Err(PipelineError::UnitFailed {
                            unit: unit.id.clone(),
                            source,
                        });
                    }
                }
            }
        }

        self.progress.on_run_complete(&summary);
        Ok(summary)
    }
}
