//! SEC EDGAR submissions adapter.
//!
//! Reads the `filings.recent` column arrays from `submissions/CIK##########.json`
//! and keeps filings whose filing date falls inside the window.

use super::coerce::{days_since_epoch, parse_date};
use super::http::{build_client, get_json};
use super::normalize::Provenance;
use super::provider::{FetchError, FetchWindow, Selector, SourceAdapter};
use polars::prelude::*;
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://data.sec.gov";

#[derive(Debug, Deserialize)]
struct Submissions {
    #[serde(default)]
    filings: Option<Filings>,
}

#[derive(Debug, Deserialize)]
struct Filings {
    #[serde(default)]
    recent: Option<RecentFilings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentFilings {
    #[serde(default)]
    accession_number: Vec<String>,
    #[serde(default)]
    filing_date: Vec<String>,
    #[serde(default)]
    acceptance_date_time: Vec<String>,
    #[serde(default)]
    form: Vec<String>,
}

pub struct SecEdgarSource {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl SecEdgarSource {
    /// EDGAR rejects requests without a contact `User-Agent`.
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        Ok(Self {
            client: build_client(user_agent)?,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// `320193` → `0000320193`.
pub fn pad_cik(cik: &str) -> String {
    format!("{:0>10}", cik.trim())
}

fn recent_to_frame(subs: Submissions, window: &FetchWindow) -> Result<DataFrame, FetchError> {
    let recent = subs
        .filings
        .and_then(|f| f.recent)
        .unwrap_or_default();

    let start = days_since_epoch(window.start.date_naive());
    let end = days_since_epoch(window.end.date_naive());

    let (mut filing_date, mut accepted, mut form, mut accession) =
        (Vec::new(), Vec::new(), Vec::new(), Vec::new());
    for (i, number) in recent.accession_number.iter().enumerate() {
        let Some(date) = recent.filing_date.get(i) else {
            continue;
        };
        match parse_date(date) {
            Some(d) if d >= start && d <= end => {}
            _ => continue,
        }
        filing_date.push(date.clone());
        accepted.push(recent.acceptance_date_time.get(i).cloned());
        form.push(recent.form.get(i).cloned());
        accession.push(number.clone());
    }
    if accession.is_empty() {
        return Ok(DataFrame::empty());
    }

    DataFrame::new(vec![
        Column::new("filingDate".into(), filing_date),
        Column::new("acceptanceDateTime".into(), accepted),
        Column::new("form".into(), form),
        Column::new("accessionNumber".into(), accession),
    ])
    .map_err(|e| FetchError::Permanent(format!("sec frame construction: {e}")))
}

impl SourceAdapter for SecEdgarSource {
    fn name(&self) -> &str {
        "sec"
    }

    fn fetch(&self, selector: &Selector, window: &FetchWindow) -> Result<DataFrame, FetchError> {
        let Selector::Company { cik, symbol } = selector else {
            return Err(FetchError::Permanent(format!("sec cannot serve {}", selector.label())));
        };
        let url = format!("{}/submissions/CIK{}.json", self.base_url, pad_cik(cik));
        let subs: Submissions = get_json(self.client.get(url), &format!("sec submissions {symbol}"))?;
        recent_to_frame(subs, window)
    }

    fn provenance(&self, selector: &Selector) -> Provenance {
        let prov = Provenance::new(self.name());
        match selector {
            Selector::Company { symbol, cik } => prov
                .with_default("symbol", symbol.clone())
                .with_default("cik", pad_cik(cik)),
            _ => prov,
        }
    }
}
