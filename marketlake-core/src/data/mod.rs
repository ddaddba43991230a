//! Data ingestion: adapters, normalization, resampling, and partitioned storage.

pub mod alpaca;
pub mod coerce;
pub mod dataset;
pub mod fred;
pub mod gdelt;
pub mod http;
pub mod normalize;
pub mod provider;
pub mod resample;
pub mod retry;
pub mod scripted;
pub mod sec;
pub mod stooq;
pub mod writer;

pub use alpaca::AlpacaSource;
pub use dataset::{dataset_stats, read_dataset, DatasetReader, DatasetStats, PartitionInfo, ReadError};
pub use fred::FredSource;
pub use gdelt::GdeltSource;
pub use normalize::{normalize, NormalizeError, Provenance};
pub use provider::{FetchError, FetchWindow, Selector, SourceAdapter};
pub use resample::{resample, ResampleError};
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, ThreadSleeper};
pub use scripted::ScriptedSource;
pub use sec::SecEdgarSource;
pub use stooq::StooqDirectory;
pub use writer::{PartitionMeta, PartitionedWriter, WriteError, WriteReport};
