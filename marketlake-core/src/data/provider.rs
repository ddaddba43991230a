//! Source adapter trait and structured fetch errors.
//!
//! The SourceAdapter trait abstracts over providers (Alpaca, FRED, SEC, GDELT,
//! Stooq bulk files) so orchestrators can swap implementations and tests can
//! script responses.

use super::normalize::Provenance;
use crate::timeframe::Timeframe;
use chrono::{DateTime, Duration, Utc};
use polars::prelude::DataFrame;
use thiserror::Error;

/// What to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// OHLCV bars for one or more symbols.
    Bars {
        symbols: Vec<String>,
        timeframe: Timeframe,
    },
    /// One macroeconomic series.
    Series { series_id: String },
    /// Regulatory filings for one company.
    Company { symbol: String, cik: String },
    /// News articles mentioning a symbol.
    News {
        symbol: String,
        query: String,
        max_records: usize,
    },
}

impl Selector {
    /// Short identifier used in logs and run summaries.
    pub fn label(&self) -> String {
        match self {
            Selector::Bars { symbols, timeframe } => format!("bars/{timeframe}/{}", symbols.join(",")),
            Selector::Series { series_id } => format!("macro/{series_id}"),
            Selector::Company { symbol, .. } => format!("filings/{symbol}"),
            Selector::News { symbol, .. } => format!("news/{symbol}"),
        }
    }
}

/// Half-open fetch window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `hours` leading up to `now`.
    pub fn trailing(now: DateTime<Utc>, hours: i64) -> Self {
        Self {
            start: now - Duration::hours(hours),
            end: now,
        }
    }
}

/// Failure classification reported by adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Rate limiting, 5xx, timeouts, malformed-but-retriable responses.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Bad request, unknown symbol, missing resource.
    #[error("permanent fetch error: {0}")]
    Permanent(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// A data provider.
///
/// Implementations return raw provider-shaped batches; normalization happens
/// above this trait.
pub trait SourceAdapter: Send + Sync {
    /// Stable provider identifier, also written as the `source` column.
    fn name(&self) -> &str;

    /// Fetch a raw batch for `selector` over `window`.
    fn fetch(&self, selector: &Selector, window: &FetchWindow) -> Result<DataFrame, FetchError>;

    /// Feed or venue tag written as the `feed` column, if the source has one.
    fn feed(&self) -> Option<&str> {
        None
    }

    /// Provenance to attach when normalizing a batch fetched for `selector`.
    fn provenance(&self, selector: &Selector) -> Provenance {
        let mut prov = Provenance::new(self.name());
        prov.feed = self.feed().map(str::to_string);
        match selector {
            Selector::Bars { symbols, timeframe } => {
                let prov = prov.with_default("timeframe", self.native_timeframe(*timeframe).to_string());
                match symbols.as_slice() {
                    [single] => prov.with_default("symbol", single.clone()),
                    _ => prov,
                }
            }
            Selector::Series { series_id } => prov.with_default("series_id", series_id.clone()),
            Selector::Company { symbol, cik } => prov
                .with_default("symbol", symbol.clone())
                .with_default("cik", cik.clone()),
            Selector::News { symbol, .. } => prov.with_default("symbol", symbol.clone()),
        }
    }

    /// Bar width actually delivered when `requested` is asked for.
    fn native_timeframe(&self, requested: Timeframe) -> Timeframe {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl SourceAdapter for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn fetch(&self, _: &Selector, _: &FetchWindow) -> Result<DataFrame, FetchError> {
            Ok(DataFrame::empty())
        }
    }

    #[test]
    fn labels_name_the_unit() {
        let bars = Selector::Bars {
            symbols: vec!["AAPL".into()],
            timeframe: Timeframe::TEN_MINUTES,
        };
        assert_eq!(bars.label(), "bars/10min/AAPL");
        assert_eq!(Selector::Series { series_id: "EFFR".into() }.label(), "macro/EFFR");
    }

    #[test]
    fn default_provenance_fills_selector_columns() {
        let prov = Fixed.provenance(&Selector::Company {
            symbol: "AAPL".into(),
            cik: "0000320193".into(),
        });
        assert_eq!(prov.source, "fixed");
        assert_eq!(prov.defaults.get("cik").map(String::as_str), Some("0000320193"));

        let multi = Fixed.provenance(&Selector::Bars {
            symbols: vec!["A".into(), "B".into()],
            timeframe: Timeframe::ONE_HOUR,
        });
        assert!(!multi.defaults.contains_key("symbol"));
        assert_eq!(multi.defaults.get("timeframe").map(String::as_str), Some("1hour"));
    }

    struct Tagged;

    impl SourceAdapter for Tagged {
        fn name(&self) -> &str {
            "tagged"
        }

        fn fetch(&self, _: &Selector, _: &FetchWindow) -> Result<DataFrame, FetchError> {
            Ok(DataFrame::empty())
        }

        fn feed(&self) -> Option<&str> {
            Some("sip")
        }
    }

    #[test]
    fn default_provenance_carries_the_feed_hook() {
        let series = Selector::Series { series_id: "EFFR".into() };
        assert_eq!(Fixed.provenance(&series).feed, None);

        let prov = Tagged.provenance(&Selector::Bars {
            symbols: vec!["AAPL".into()],
            timeframe: Timeframe::TEN_MINUTES,
        });
        assert_eq!(prov.feed.as_deref(), Some("sip"));
        assert_eq!(prov.defaults.get("symbol").map(String::as_str), Some("AAPL"));
        assert_eq!(prov.defaults.get("timeframe").map(String::as_str), Some("10min"));
    }

    #[test]
    fn transient_classification() {
        assert!(FetchError::Transient("429".into()).is_transient());
        assert!(!FetchError::Permanent("404".into()).is_transient());
    }
}
