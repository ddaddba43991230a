//! Trailing-window bar polling.
//!
//! Each call fetches `[now - lookback_hours, now)` for every configured
//! symbol in one request and writes once. Overlapping windows across calls
//! are harmless: the writer keeps the last row per identity key.

use crate::config::{ConfigError, LivePollConfig};
use crate::pipeline::{Executor, PipelineError, UnitPlan};
use crate::summary::RunSummary;
use chrono::{DateTime, Utc};
use marketlake_core::data::{FetchWindow, Selector, SourceAdapter};
use marketlake_core::DatasetKind;

pub struct LivePollPipeline<'a> {
    executor: Executor<'a>,
    adapter: &'a dyn SourceAdapter,
}

impl<'a> LivePollPipeline<'a> {
    pub fn new(executor: Executor<'a>, adapter: &'a dyn SourceAdapter) -> Self {
        Self { executor, adapter }
    }

    pub fn poll_once(&self, config: &LivePollConfig) -> Result<RunSummary, PipelineError> {
        self.poll_once_at(config, Utc::now())
    }

    /// Poll as if the clock read `now`.
    pub fn poll_once_at(
        &self,
        config: &LivePollConfig,
        now: DateTime<Utc>,
    ) -> Result<RunSummary, PipelineError> {
        let mut symbols: Vec<String> = config
            .symbols
            .iter()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        symbols.sort();
        symbols.dedup();
        if symbols.is_empty() {
            return Err(ConfigError::Invalid(vec!["live.symbols must not be empty".into()]).into());
        }

        let window = FetchWindow::trailing(now, config.lookback_hours);
        let selector = Selector::Bars {
            symbols,
            timeframe: config.timeframe,
        };
        let unit = UnitPlan {
            id: format!("live/bars/{}", config.timeframe),
            kind: DatasetKind::Bar,
            adapter: self.adapter,
            selector,
            window,
        };
        tracing::info!(start = %window.start, end = %window.end, "polling bars");
        self.executor.drive("poll", &[unit], true, None)
    }
}
