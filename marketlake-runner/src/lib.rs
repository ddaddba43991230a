//! MarketLake Runner: ingestion orchestration, run configuration, run summaries.
//!
//! This crate builds on `marketlake-core` to provide:
//! - TOML ingest configuration and up-front credential validation
//! - A unit executor: fetch with retry, normalize, resample, write
//! - Historical backfill across bars, macro series, filings and news
//! - Trailing-window live polling of bars
//! - Stooq bulk import from a directory or zip archive
//! - Run summaries, progress callbacks and cooperative cancellation

pub mod backfill;
pub mod bulk;
pub mod config;
pub mod live_poll;
pub mod pipeline;
pub mod progress;
pub mod summary;

pub use backfill::BackfillPipeline;
pub use bulk::{import_stooq, load_tickers, TickerError};
pub use config::{
    BackfillConfig, BulkImportConfig, ConfigError, CredentialKey, Credentials, IngestConfig,
    LivePollConfig, RetrySettings, SourcesConfig,
};
pub use live_poll::LivePollPipeline;
pub use pipeline::{Executor, PipelineError, UnitError, UnitPlan};
pub use progress::{IngestProgress, LogProgress, NoProgress};
pub use summary::{RunSummary, UnitFailure};
