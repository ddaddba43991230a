//! Bar resampler: fine OHLCV bars → coarser, epoch-aligned buckets.
//!
//! Buckets are left-closed and left-labeled. A bucket with any null among
//! open/high/low/close is dropped, never filled.

use super::coerce::{self, ColumnData};
use crate::schema::{DatasetKind, SchemaError};
use crate::timeframe::{Timeframe, TimeframeError};
use polars::prelude::*;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("cannot resample {input} bars to {target}: target must be a whole multiple of the input")]
    UnsupportedTimeframe { input: Timeframe, target: Timeframe },

    #[error(transparent)]
    InvalidTimeframe(#[from] TimeframeError),

    #[error("resample input is not a canonical bar batch: {0}")]
    Schema(#[from] SchemaError),

    #[error("polars error during resample: {0}")]
    Polars(#[from] PolarsError),
}

type GroupKey = (String, String, Option<String>, String);

/// Aggregate canonical bars into `target` buckets.
///
/// Each (symbol, source, feed, input timeframe) group is aggregated on its
/// own; output rows follow group order, then bucket start.
pub fn resample(bars: &DataFrame, target: Timeframe) -> Result<DataFrame, ResampleError> {
    let schema = DatasetKind::Bar.schema();
    schema.validate(bars)?;
    if bars.height() == 0 {
        return Ok(bars.clone());
    }

    let cols = BarColumns::extract(bars)?;

    let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
    for row in 0..bars.height() {
        let (Some(symbol), Some(source), Some(tf)) = (
            cols.symbol[row].clone(),
            cols.source[row].clone(),
            cols.timeframe[row].clone(),
        ) else {
            continue;
        };
        if cols.timestamp[row].is_none() {
            continue;
        }
        groups
            .entry((symbol, source, cols.feed[row].clone(), tf))
            .or_default()
            .push(row);
    }

    let mut out = OutputColumns::default();
    let target_label = target.to_string();
    for ((symbol, source, feed, input_tf), mut rows) in groups {
        let input: Timeframe = input_tf.parse()?;
        if !target.is_multiple_of(input) {
            return Err(ResampleError::UnsupportedTimeframe { input, target });
        }

        rows.sort_by_key(|&r| cols.timestamp[r]);
        let mut current: Option<Bucket> = None;
        for row in rows {
            let Some(ts) = cols.timestamp[row] else {
                continue;
            };
            let start = target.bucket_start(ts);
            match current.as_mut() {
                Some(bucket) if bucket.start == start => bucket.add(&cols, row),
                _ => {
                    if let Some(done) = current.take() {
                        out.push(done, &symbol, &target_label, &source, feed.as_deref());
                    }
                    current = Some(Bucket::open(start, &cols, row));
                }
            }
        }
        if let Some(done) = current {
            out.push(done, &symbol, &target_label, &source, feed.as_deref());
        }
    }

    Ok(out.into_frame(schema.column_names())?)
}

struct BarColumns {
    symbol: Vec<Option<String>>,
    timestamp: Vec<Option<i64>>,
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
    trade_count: Vec<Option<i64>>,
    vwap: Vec<Option<f64>>,
    timeframe: Vec<Option<String>>,
    source: Vec<Option<String>>,
    feed: Vec<Option<String>>,
}

impl BarColumns {
    fn extract(df: &DataFrame) -> PolarsResult<Self> {
        let s = |name: &str| coerce::series(df, name);
        Ok(Self {
            symbol: coerce::string_values(s("symbol")?)?,
            timestamp: coerce::timestamp_values(s("timestamp")?)?,
            open: coerce::float_values(s("open")?)?,
            high: coerce::float_values(s("high")?)?,
            low: coerce::float_values(s("low")?)?,
            close: coerce::float_values(s("close")?)?,
            volume: coerce::float_values(s("volume")?)?,
            trade_count: coerce::integer_values(s("trade_count")?)?,
            vwap: coerce::float_values(s("vwap")?)?,
            timeframe: coerce::string_values(s("timeframe")?)?,
            source: coerce::string_values(s("source")?)?,
            feed: coerce::string_values(s("feed")?)?,
        })
    }
}

/// Running aggregate for one bucket.
struct Bucket {
    start: i64,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: f64,
    has_null_ohlc: bool,
    trade_count: Option<i64>,
    /// Σ vwap·volume; `None` once any row lacks a vwap.
    vwap_notional: Option<f64>,
}

impl Bucket {
    fn open(start: i64, cols: &BarColumns, row: usize) -> Self {
        let mut bucket = Bucket {
            start,
            open: cols.open[row],
            high: None,
            low: None,
            close: None,
            volume: 0.0,
            has_null_ohlc: false,
            trade_count: Some(0),
            vwap_notional: Some(0.0),
        };
        bucket.add(cols, row);
        bucket
    }

    fn add(&mut self, cols: &BarColumns, row: usize) {
        let (open, high, low, close) = (cols.open[row], cols.high[row], cols.low[row], cols.close[row]);
        if open.is_none() || high.is_none() || low.is_none() || close.is_none() {
            self.has_null_ohlc = true;
        }
        if let Some(h) = high {
            self.high = Some(self.high.map_or(h, |cur| cur.max(h)));
        }
        if let Some(l) = low {
            self.low = Some(self.low.map_or(l, |cur| cur.min(l)));
        }
        self.close = close;

        let volume = cols.volume[row].unwrap_or(0.0);
        self.volume += volume;
        self.trade_count = match (self.trade_count, cols.trade_count[row]) {
            (Some(total), Some(n)) => Some(total + n),
            _ => None,
        };
        self.vwap_notional = match (self.vwap_notional, cols.vwap[row]) {
            (Some(total), Some(vw)) => Some(total + vw * volume),
            _ => None,
        };
    }

    fn vwap(&self) -> Option<f64> {
        self.vwap_notional
            .filter(|_| self.volume > 0.0)
            .map(|notional| notional / self.volume)
    }
}

#[derive(Default)]
struct OutputColumns {
    symbol: Vec<Option<String>>,
    timestamp: Vec<Option<i64>>,
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
    trade_count: Vec<Option<i64>>,
    vwap: Vec<Option<f64>>,
    timeframe: Vec<Option<String>>,
    source: Vec<Option<String>>,
    feed: Vec<Option<String>>,
}

impl OutputColumns {
    fn push(&mut self, bucket: Bucket, symbol: &str, timeframe: &str, source: &str, feed: Option<&str>) {
        if bucket.has_null_ohlc {
            return;
        }
        let vwap = bucket.vwap();
        self.symbol.push(Some(symbol.to_string()));
        self.timestamp.push(Some(bucket.start));
        self.open.push(bucket.open);
        self.high.push(bucket.high);
        self.low.push(bucket.low);
        self.close.push(bucket.close);
        self.volume.push(Some(bucket.volume));
        self.trade_count.push(bucket.trade_count);
        self.vwap.push(vwap);
        self.timeframe.push(Some(timeframe.to_string()));
        self.source.push(Some(source.to_string()));
        self.feed.push(feed.map(str::to_string));
    }

    fn into_frame(self, names: Vec<&'static str>) -> PolarsResult<DataFrame> {
        let data = [
            ColumnData::String(self.symbol),
            ColumnData::Timestamp(self.timestamp),
            ColumnData::Float(self.open),
            ColumnData::Float(self.high),
            ColumnData::Float(self.low),
            ColumnData::Float(self.close),
            ColumnData::Float(self.volume),
            ColumnData::Integer(self.trade_count),
            ColumnData::Float(self.vwap),
            ColumnData::String(self.timeframe),
            ColumnData::String(self.source),
            ColumnData::String(self.feed),
        ];
        let columns = data
            .into_iter()
            .zip(names)
            .map(|(d, name)| d.into_column(name))
            .collect::<PolarsResult<Vec<_>>>()?;
        DataFrame::new(columns)
    }
}
