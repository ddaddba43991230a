//! MarketLake Core: canonical schemas, normalization, resampling, partitioned storage.
//!
//! This crate contains everything below the orchestrators:
//! - Canonical schema registry for bars, macro observations, filings, news
//! - Record normalizer (synonym matching, type coercion, UTC timestamps)
//! - Bar resampler (epoch-aligned, left-labeled buckets)
//! - Partitioned dedup writer (Hive layout, keep-last, atomic partition replace)
//! - Source adapter trait, retry policy, and provider adapters

pub mod data;
pub mod schema;
pub mod timeframe;

pub use schema::{CanonicalSchema, ColumnType, DatasetKind, Partition, SchemaError};
pub use timeframe::{Timeframe, TimeframeError};
