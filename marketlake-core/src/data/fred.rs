//! FRED macroeconomic series adapter.

use super::http::{build_client, get_json};
use super::provider::{FetchError, FetchWindow, Selector, SourceAdapter};
use polars::prelude::*;
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://api.stlouisfed.org/fred";

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    #[serde(default)]
    observations: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
struct Observation {
    date: String,
    /// Decimal text, or `"."` for a missing observation.
    value: String,
}

pub struct FredSource {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl FredSource {
    pub fn new(api_key: impl Into<String>) -> Result<Self, FetchError> {
        Ok(Self {
            client: build_client("marketlake/0.1")?,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

fn observations_to_frame(resp: ObservationsResponse) -> Result<DataFrame, FetchError> {
    if resp.observations.is_empty() {
        return Ok(DataFrame::empty());
    }
    let (dates, values): (Vec<String>, Vec<Option<String>>) = resp
        .observations
        .into_iter()
        .map(|o| {
            let value = (o.value.trim() != ".").then_some(o.value);
            (o.date, value)
        })
        .unzip();
    DataFrame::new(vec![
        Column::new("date".into(), dates),
        Column::new("value".into(), values),
    ])
    .map_err(|e| FetchError::Permanent(format!("fred frame construction: {e}")))
}

impl SourceAdapter for FredSource {
    fn name(&self) -> &str {
        "fred"
    }

    fn fetch(&self, selector: &Selector, window: &FetchWindow) -> Result<DataFrame, FetchError> {
        let Selector::Series { series_id } = selector else {
            return Err(FetchError::Permanent(format!("fred cannot serve {}", selector.label())));
        };
        let start = window.start.format("%Y-%m-%d").to_string();
        let end = window.end.format("%Y-%m-%d").to_string();
        let request = self
            .client
            .get(format!("{}/series/observations", self.base_url))
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("series_id", series_id.as_str()),
                ("file_type", "json"),
                ("observation_start", start.as_str()),
                ("observation_end", end.as_str()),
            ]);
        let resp: ObservationsResponse = get_json(request, &format!("fred series {series_id}"))?;
        observations_to_frame(resp)
    }
}
