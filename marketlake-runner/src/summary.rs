//! Outcome of one orchestrator run.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// A unit that failed and why.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: String,
    pub error: String,
}

/// Counts and outputs of a backfill, poll or bulk import.
///
/// `total_units == succeeded + failed + skipped` once a run returns.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    /// Which orchestrator produced this summary.
    pub run: String,
    pub total_units: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Units never started because the run was cancelled.
    pub skipped: usize,
    pub rows_written: usize,
    pub failures: Vec<UnitFailure>,
    /// Dataset roots that received rows.
    pub outputs: BTreeSet<PathBuf>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn new(run: impl Into<String>, total_units: usize) -> Self {
        Self {
            run: run.into(),
            total_units,
            ..Self::default()
        }
    }

    /// Identifiers of the failed units, in run order.
    pub fn failed_units(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.unit.as_str()).collect()
    }

    /// True when every attempted unit succeeded and nothing was skipped.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {}/{} units succeeded, {} failed, {} skipped{}",
            self.run,
            self.succeeded,
            self.total_units,
            self.failed,
            self.skipped,
            if self.cancelled { " (cancelled)" } else { "" }
        )?;
        writeln!(f, "rows written: {}", self.rows_written)?;
        for path in &self.outputs {
            writeln!(f, "output: {}", path.display())?;
        }
        for failure in &self.failures {
            writeln!(f, "FAILED {}: {}", failure.unit, failure.error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_failures_and_outputs() {
        let mut summary = RunSummary::new("backfill", 3);
        summary.succeeded = 2;
        summary.failed = 1;
        summary.rows_written = 42;
        summary.outputs.insert(PathBuf::from("data/bars"));
        summary.failures.push(UnitFailure {
            unit: "bars/10min/B".into(),
            error: "permanent fetch error: unknown symbol".into(),
        });
        let text = summary.to_string();
        assert!(text.contains("backfill: 2/3 units succeeded, 1 failed, 0 skipped"));
        assert!(text.contains("rows written: 42"));
        assert!(text.contains("output: data/bars"));
        assert!(text.contains("FAILED bars/10min/B"));
        assert_eq!(summary.failed_units(), vec!["bars/10min/B"]);
        assert!(!summary.is_clean());
    }

    #[test]
    fn cancelled_run_is_not_clean_even_without_failures() {
        let mut summary = RunSummary::new("bulk-stooq", 4);
        summary.succeeded = 1;
        summary.skipped = 3;
        summary.cancelled = true;
        assert!(!summary.is_clean());
        assert!(summary
            .to_string()
            .starts_with("bulk-stooq: 1/4 units succeeded, 0 failed, 3 skipped (cancelled)"));
    }

    #[test]
    fn serializes_to_json() {
        let summary = RunSummary::new("poll", 1);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["run"], "poll");
        assert_eq!(json["total_units"], 1);
        assert_eq!(json["cancelled"], false);
    }
}
