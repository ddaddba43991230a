//! Per-unit progress callbacks for orchestrator runs.

use crate::pipeline::UnitError;
use crate::summary::RunSummary;

/// Observer notified as an orchestrator works through its units.
pub trait IngestProgress: Send + Sync {
    /// Called before a unit is fetched.
    fn on_start(&self, unit: &str, index: usize, total: usize);

    /// Called when a unit finishes. `Ok` carries the rows written.
    fn on_complete(&self, unit: &str, index: usize, total: usize, result: &Result<usize, UnitError>);

    /// Called once the run is over, cancelled or not.
    fn on_run_complete(&self, summary: &RunSummary);
}

/// Reports through `tracing`.
pub struct LogProgress;

impl IngestProgress for LogProgress {
    fn on_start(&self, unit: &str, index: usize, total: usize) {
        tracing::debug!(unit, "[{}/{}] fetching", index + 1, total);
    }

    fn on_complete(&self, unit: &str, index: usize, total: usize, result: &Result<usize, UnitError>) {
        match result {
            Ok(rows) => tracing::info!(unit, rows, "[{}/{}] ok", index + 1, total),
            Err(e) => tracing::warn!(unit, error = %e, "[{}/{}] failed", index + 1, total),
        }
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        tracing::info!(
            run = %summary.run,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            rows = summary.rows_written,
            "run complete"
        );
    }
}

/// Discards every event.
pub struct NoProgress;

impl IngestProgress for NoProgress {
    fn on_start(&self, _: &str, _: usize, _: usize) {}
    fn on_complete(&self, _: &str, _: usize, _: usize, _: &Result<usize, UnitError>) {}
    fn on_run_complete(&self, _: &RunSummary) {}
}
