//! Alpaca market data adapter.
//!
//! Fetches intraday bars for several symbols at once from `/v2/stocks/bars`,
//! following `next_page_token` until the window is exhausted.

use super::http::{build_client, get_json};
use super::provider::{FetchError, FetchWindow, Selector, SourceAdapter};
use crate::timeframe::Timeframe;
use chrono::SecondsFormat;
use polars::prelude::*;
use serde::Deserialize;
use std::collections::BTreeMap;

pub const DEFAULT_BASE_URL: &str = "https://data.alpaca.markets";
const PAGE_LIMIT: &str = "10000";
/// Pagination guard against a server that never stops returning tokens.
const MAX_PAGES: usize = 1_000;

#[derive(Debug, Deserialize)]
struct BarsPage {
    #[serde(default)]
    bars: Option<BTreeMap<String, Vec<AlpacaBar>>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: String,
    o: Option<f64>,
    h: Option<f64>,
    l: Option<f64>,
    c: Option<f64>,
    v: Option<f64>,
    n: Option<i64>,
    vw: Option<f64>,
}

pub struct AlpacaSource {
    client: reqwest::blocking::Client,
    base_url: String,
    key_id: String,
    secret_key: String,
    feed: String,
}

impl AlpacaSource {
    pub fn new(
        key_id: impl Into<String>,
        secret_key: impl Into<String>,
        feed: impl Into<String>,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            client: build_client("marketlake/0.1")?,
            base_url: DEFAULT_BASE_URL.to_string(),
            key_id: key_id.into(),
            secret_key: secret_key.into(),
            feed: feed.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn fetch_page(
        &self,
        symbols: &[String],
        timeframe: &str,
        window: &FetchWindow,
        page_token: Option<&str>,
    ) -> Result<BarsPage, FetchError> {
        let mut query = vec![
            ("symbols", symbols.join(",")),
            ("timeframe", timeframe.to_string()),
            ("start", window.start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("end", window.end.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("limit", PAGE_LIMIT.to_string()),
            ("feed", self.feed.clone()),
        ];
        if let Some(token) = page_token {
            query.push(("page_token", token.to_string()));
        }
        let request = self
            .client
            .get(format!("{}/v2/stocks/bars", self.base_url))
            .header("APCA-API-KEY-ID", &self.key_id)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
            .query(&query);
        get_json(request, &format!("alpaca bars {}", symbols.join(",")))
    }
}

/// Alpaca's spelling of a bar width: `10Min`, `1Hour`, `1Day`.
pub fn alpaca_timeframe(tf: Timeframe) -> Result<String, FetchError> {
    let secs = tf.seconds();
    match secs {
        s if s % 86_400 == 0 => Ok(format!("{}Day", s / 86_400)),
        s if s % 3_600 == 0 => Ok(format!("{}Hour", s / 3_600)),
        s if s % 60 == 0 && s < 3_600 => Ok(format!("{}Min", s / 60)),
        _ => Err(FetchError::Permanent(format!("alpaca has no {tf} bars"))),
    }
}

fn pages_to_frame(pages: Vec<BarsPage>) -> Result<DataFrame, FetchError> {
    let mut symbol = Vec::new();
    let mut t = Vec::new();
    let (mut o, mut h, mut l, mut c, mut v, mut n, mut vw) =
        (Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new());

    for page in pages {
        for (sym, bars) in page.bars.unwrap_or_default() {
            for bar in bars {
                symbol.push(sym.clone());
                t.push(bar.t);
                o.push(bar.o);
                h.push(bar.h);
                l.push(bar.l);
                c.push(bar.c);
                v.push(bar.v);
                n.push(bar.n);
                vw.push(bar.vw);
            }
        }
    }
    if symbol.is_empty() {
        return Ok(DataFrame::empty());
    }

    DataFrame::new(vec![
        Column::new("symbol".into(), symbol),
        Column::new("t".into(), t),
        Column::new("o".into(), o),
        Column::new("h".into(), h),
        Column::new("l".into(), l),
        Column::new("c".into(), c),
        Column::new("v".into(), v),
        Column::new("n".into(), n),
        Column::new("vw".into(), vw),
    ])
    .map_err(|e| FetchError::Permanent(format!("alpaca frame construction: {e}")))
}

impl SourceAdapter for AlpacaSource {
    fn name(&self) -> &str {
        "alpaca"
    }

    fn fetch(&self, selector: &Selector, window: &FetchWindow) -> Result<DataFrame, FetchError> {
        let Selector::Bars { symbols, timeframe } = selector else {
            return Err(FetchError::Permanent(format!(
                "alpaca cannot serve {}",
                selector.label()
            )));
        };
        let tf = alpaca_timeframe(*timeframe)?;

        let mut pages = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.fetch_page(symbols, &tf, window, token.as_deref())?;
            token = page.next_page_token.clone().filter(|t| !t.is_empty());
            pages.push(page);
            if token.is_none() {
                break;
            }
            if pages.len() >= MAX_PAGES {
                return Err(FetchError::Permanent(format!(
                    "alpaca pagination exceeded {MAX_PAGES} pages"
                )));
            }
        }
        pages_to_frame(pages)
    }

    fn feed(&self) -> Option<&str> {
        Some(self.feed.as_str())
    }
}
