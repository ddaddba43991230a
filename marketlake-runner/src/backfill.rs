//! Historical backfill across bars, macro series, filings and news.
//!
//! Units are planned up front, in this order:
//! 1. bars: every configured timeframe × every bar symbol (`bars/<tf>/<symbol>`)
//! 2. macro: every configured series (`macro/<series>`)
//! 3. filings: every symbol→CIK entry (`filings/<symbol>`)
//! 4. news: every universe symbol (`news/<symbol>`)
//!
//! A dataset kind with no adapter attached is left out of the plan.

use crate::config::BackfillConfig;
use crate::pipeline::{Executor, PipelineError, UnitPlan};
use crate::summary::RunSummary;
use marketlake_core::data::{FetchWindow, Selector, SourceAdapter};
use marketlake_core::DatasetKind;
use std::sync::atomic::AtomicBool;

pub struct BackfillPipeline<'a> {
    executor: Executor<'a>,
    bars: Option<&'a dyn SourceAdapter>,
    macro_source: Option<&'a dyn SourceAdapter>,
    filings: Option<&'a dyn SourceAdapter>,
    news: Option<&'a dyn SourceAdapter>,
}

impl<'a> BackfillPipeline<'a> {
    pub fn new(executor: Executor<'a>) -> Self {
        Self {
            executor,
            bars: None,
            macro_source: None,
            filings: None,
            news: None,
        }
    }

    pub fn with_bars(mut self, adapter: &'a dyn SourceAdapter) -> Self {
        self.bars = Some(adapter);
        self
    }

    pub fn with_macro(mut self, adapter: &'a dyn SourceAdapter) -> Self {
        self.macro_source = Some(adapter);
        self
    }

    pub fn with_filings(mut self, adapter: &'a dyn SourceAdapter) -> Self {
        self.filings = Some(adapter);
        self
    }

    pub fn with_news(mut self, adapter: &'a dyn SourceAdapter) -> Self {
        self.news = Some(adapter);
        self
    }

    /// Every unit this backfill would run, in run order.
    pub fn plan(&self, config: &BackfillConfig, window: FetchWindow) -> Vec<UnitPlan<'a>> {
        let mut units = Vec::new();
        let mut push = |kind: DatasetKind, adapter: &'a dyn SourceAdapter, selector: Selector, id: String| {
            units.push(UnitPlan {
                id,
                kind,
                adapter,
                selector,
                window,
            });
        };

        if let Some(adapter) = self.bars {
            let symbols = config.bar_symbols();
            for &timeframe in &config.timeframes {
                for symbol in &symbols {
                    let selector = Selector::Bars {
                        symbols: vec![symbol.clone()],
                        timeframe,
                    };
                    push(DatasetKind::Bar, adapter, selector, format!("bars/{timeframe}/{symbol}"));
                }
            }
        } else {
            tracing::info!("no bar source attached, skipping bars");
        }

        if let Some(adapter) = self.macro_source {
            for series_id in &config.fred_series {
                let selector = Selector::Series {
                    series_id: series_id.clone(),
                };
                push(DatasetKind::MacroObservation, adapter, selector, format!("macro/{series_id}"));
            }
        } else {
            tracing::info!("no macro source attached, skipping macro series");
        }

        if let Some(adapter) = self.filings {
            for (symbol, cik) in &config.symbol_to_cik {
                let symbol = symbol.trim().to_ascii_uppercase();
                let selector = Selector::Company {
                    symbol: symbol.clone(),
                    cik: cik.clone(),
                };
                push(DatasetKind::Filing, adapter, selector, format!("filings/{symbol}"));
            }
        } else {
            tracing::info!("no filings source attached, skipping filings");
        }

        if let Some(adapter) = self.news {
            for symbol in config.news_symbols() {
                let selector = Selector::News {
                    query: news_query(&symbol),
                    symbol: symbol.clone(),
                    max_records: config.news_max_records,
                };
                push(DatasetKind::NewsArticle, adapter, selector, format!("news/{symbol}"));
            }
        } else {
            tracing::info!("no news source attached, skipping news");
        }

        units
    }

    /// Plan and run the backfill over `window`.
    pub fn run(
        &self,
        config: &BackfillConfig,
        window: FetchWindow,
        cancel: Option<&AtomicBool>,
    ) -> Result<RunSummary, PipelineError> {
        let units = self.plan(config, window);
        tracing::info!(
            units = units.len(),
            start = %window.start,
            end = %window.end,
            "starting backfill"
        );
        self.executor
            .drive("backfill", &units, config.continue_on_error, cancel)
    }
}

/// Matches the bare ticker or the quoted ticker.
fn news_query(symbol: &str) -> String {
    format!("{symbol} OR \"{symbol}\"")
}
