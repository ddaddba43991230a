//! Serializable ingest configuration and credential validation.
//!
//! Configuration is an immutable value loaded once from TOML. Every field
//! has a named default function; nothing is resolved from mutable globals.
//! Credentials come from the environment and are validated up front, before
//! any fetch is attempted.

use marketlake_core::data::RetryPolicy;
use marketlake_core::data::{alpaca, fred, gdelt, sec};
use marketlake_core::Timeframe;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level ingest configuration.
///
/// ```toml
/// data_dir = "data"
///
/// [backfill]
/// universe_symbols = ["AAPL", "MSFT"]
/// symbol_to_cik = { AAPL = "320193" }
///
/// [live]
/// symbols = ["AAPL", "MSFT", "SPY"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestConfig {
    /// Root directory; datasets land in `data_dir/<dataset>`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub backfill: BackfillConfig,

    #[serde(default)]
    pub live: LivePollConfig,

    #[serde(default)]
    pub bulk: BulkImportConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub sources: SourcesConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backfill: BackfillConfig::default(),
            live: LivePollConfig::default(),
            bulk: BulkImportConfig::default(),
            retry: RetrySettings::default(),
            sources: SourcesConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges. Every problem is reported, not just the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.backfill.timeframes.is_empty() {
            problems.push("backfill.timeframes must not be empty".to_string());
        }
        if !(1..=MAX_NEWS_RECORDS).contains(&self.backfill.news_max_records) {
            problems.push(format!(
                "backfill.news_max_records must be between 1 and {MAX_NEWS_RECORDS}"
            ));
        }
        if self.live.lookback_hours <= 0 {
            problems.push("live.lookback_hours must be positive".to_string());
        }
        if !self.bulk.target_timeframe.is_multiple_of(self.bulk.native_timeframe) {
            problems.push(format!(
                "bulk.target_timeframe {} is not a multiple of bulk.native_timeframe {}",
                self.bulk.target_timeframe, self.bulk.native_timeframe
            ));
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.multiplier == 0 {
            problems.push("retry.multiplier must be at least 1".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Dataset root for a dataset name.
    pub fn dataset_path(&self, dataset: &str) -> PathBuf {
        self.data_dir.join(dataset)
    }
}

/// GDELT DOC API caps `maxrecords` at 250.
pub const MAX_NEWS_RECORDS: usize = 250;

/// Historical backfill across all four dataset kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackfillConfig {
    #[serde(default = "default_universe")]
    pub universe_symbols: Vec<String>,

    /// Broad-market ETF fetched alongside the universe for bars.
    #[serde(default = "default_market_proxy")]
    pub market_proxy: String,

    #[serde(default = "default_sector_etfs")]
    pub sector_etfs: Vec<String>,

    #[serde(default = "default_backfill_timeframes")]
    pub timeframes: Vec<Timeframe>,

    #[serde(default = "default_fred_series")]
    pub fred_series: Vec<String>,

    /// Symbol to SEC CIK. Filings are fetched only for symbols listed here.
    #[serde(default)]
    pub symbol_to_cik: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub continue_on_error: bool,

    #[serde(default = "default_news_max_records")]
    pub news_max_records: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            universe_symbols: default_universe(),
            market_proxy: default_market_proxy(),
            sector_etfs: default_sector_etfs(),
            timeframes: default_backfill_timeframes(),
            fred_series: default_fred_series(),
            symbol_to_cik: BTreeMap::new(),
            continue_on_error: true,
            news_max_records: default_news_max_records(),
        }
    }
}

impl BackfillConfig {
    /// Sorted, de-duplicated bar symbols: universe, market proxy and sector ETFs.
    pub fn bar_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .universe_symbols
            .iter()
            .chain(std::iter::once(&self.market_proxy))
            .chain(&self.sector_etfs)
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    /// Universe symbols in configured order, de-duplicated.
    pub fn news_symbols(&self) -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        self.universe_symbols
            .iter()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect()
    }
}

/// Trailing-window bar polling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LivePollConfig {
    #[serde(default = "default_universe")]
    pub symbols: Vec<String>,

    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,

    #[serde(default = "default_live_timeframe")]
    pub timeframe: Timeframe,
}

impl Default for LivePollConfig {
    fn default() -> Self {
        Self {
            symbols: default_universe(),
            lookback_hours: default_lookback_hours(),
            timeframe: default_live_timeframe(),
        }
    }
}

/// Stooq bulk import. CLI flags override these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkImportConfig {
    /// Unpacked bulk directory or the downloaded `.zip` archive.
    #[serde(default)]
    pub source: Option<PathBuf>,

    #[serde(default = "default_bulk_native")]
    pub native_timeframe: Timeframe,

    #[serde(default = "default_live_timeframe")]
    pub target_timeframe: Timeframe,

    #[serde(default = "default_true")]
    pub continue_on_error: bool,
}

impl Default for BulkImportConfig {
    fn default() -> Self {
        Self {
            source: None,
            native_timeframe: default_bulk_native(),
            target_timeframe: default_live_timeframe(),
            continue_on_error: true,
        }
    }
}

/// Retry schedule applied to every fetch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            multiplier: self.multiplier,
            ..RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
        }
    }
}

/// Provider endpoints and feed selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourcesConfig {
    #[serde(default = "default_alpaca_feed")]
    pub alpaca_feed: String,

    #[serde(default = "default_alpaca_url")]
    pub alpaca_base_url: String,

    #[serde(default = "default_fred_url")]
    pub fred_base_url: String,

    #[serde(default = "default_sec_url")]
    pub sec_base_url: String,

    #[serde(default = "default_gdelt_url")]
    pub gdelt_base_url: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            alpaca_feed: default_alpaca_feed(),
            alpaca_base_url: default_alpaca_url(),
            fred_base_url: default_fred_url(),
            sec_base_url: default_sec_url(),
            gdelt_base_url: default_gdelt_url(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_universe() -> Vec<String> {
    ["AAPL", "MSFT", "NVDA", "AMZN", "GOOGL"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_market_proxy() -> String {
    "SPY".into()
}
fn default_sector_etfs() -> Vec<String> {
    ["XLK", "XLF", "XLE", "XLV", "XLY", "XLP", "XLI", "XLU", "XLB", "XLRE", "XLC"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_backfill_timeframes() -> Vec<Timeframe> {
    vec![Timeframe::TEN_MINUTES, Timeframe::ONE_HOUR]
}
fn default_fred_series() -> Vec<String> {
    vec!["EFFR".into()]
}
fn default_true() -> bool {
    true
}
fn default_news_max_records() -> usize {
    MAX_NEWS_RECORDS
}
fn default_lookback_hours() -> i64 {
    6
}
fn default_live_timeframe() -> Timeframe {
    Timeframe::TEN_MINUTES
}
fn default_bulk_native() -> Timeframe {
    Timeframe::FIVE_MINUTES
}
fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_multiplier() -> u32 {
    2
}
fn default_alpaca_feed() -> String {
    "iex".into()
}
fn default_alpaca_url() -> String {
    alpaca::DEFAULT_BASE_URL.into()
}
fn default_fred_url() -> String {
    fred::DEFAULT_BASE_URL.into()
}
fn default_sec_url() -> String {
    sec::DEFAULT_BASE_URL.into()
}
fn default_gdelt_url() -> String {
    gdelt::DEFAULT_BASE_URL.into()
}

// ─── Credentials ─────────────────────────────────────────────────────

/// A secret read from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CredentialKey {
    AlpacaKeyId,
    AlpacaSecretKey,
    FredApiKey,
    SecUserAgent,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 4] = [
        CredentialKey::AlpacaKeyId,
        CredentialKey::AlpacaSecretKey,
        CredentialKey::FredApiKey,
        CredentialKey::SecUserAgent,
    ];

    /// Keys needed to poll bars.
    pub const LIVE: [CredentialKey; 2] = [CredentialKey::AlpacaKeyId, CredentialKey::AlpacaSecretKey];

    pub fn env_var(self) -> &'static str {
        match self {
            CredentialKey::AlpacaKeyId => "ALPACA_API_KEY_ID",
            CredentialKey::AlpacaSecretKey => "ALPACA_API_SECRET_KEY",
            CredentialKey::FredApiKey => "FRED_API_KEY",
            CredentialKey::SecUserAgent => "SEC_USER_AGENT",
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.env_var())
    }
}

/// Provider credentials. Blank values count as missing.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    values: BTreeMap<CredentialKey, String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

impl Credentials {
    /// Build from any key lookup (environment, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let values = CredentialKey::ALL
            .into_iter()
            .filter_map(|key| {
                lookup(key.env_var())
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .map(|v| (key, v))
            })
            .collect();
        Self { values }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Fails with every missing key in `required`, in the order given.
    pub fn validate(&self, required: &[CredentialKey]) -> Result<(), ConfigError> {
        let missing: Vec<String> = required
            .iter()
            .filter(|key| !self.values.contains_key(key))
            .map(|key| key.env_var().to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingKeys(missing))
        }
    }

    pub fn get(&self, key: CredentialKey) -> Result<&str, ConfigError> {
        self.values
            .get(&key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingKeys(vec![key.env_var().to_string()]))
    }
}
