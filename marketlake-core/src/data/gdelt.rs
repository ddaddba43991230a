//! GDELT DOC 2.0 news adapter (`mode=ArtList`).

use super::http::{build_client, get_json};
use super::provider::{FetchError, FetchWindow, Selector, SourceAdapter};
use polars::prelude::*;
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_BASE_URL: &str = "https://api.gdeltproject.org/api/v2/doc/doc";

#[derive(Debug, Deserialize)]
struct ArtList {
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
struct Article {
    url: Option<String>,
    /// `YYYYMMDDTHHMMSSZ`, UTC.
    seendate: Option<String>,
    domain: Option<String>,
    tone: Option<f64>,
    /// Either a list of theme codes or a delimited string.
    themes: Option<Value>,
}

pub struct GdeltSource {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl GdeltSource {
    pub fn new() -> Result<Self, FetchError> {
        Ok(Self {
            client: build_client("marketlake/0.1")?,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

fn themes_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join(";"))
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn articles_to_frame(list: ArtList) -> Result<DataFrame, FetchError> {
    if list.articles.is_empty() {
        return Ok(DataFrame::empty());
    }
    let n = list.articles.len();
    let (mut url, mut seendate, mut domain, mut tone, mut themes) = (
        Vec::with_capacity(n),
        Vec::with_capacity(n),
        Vec::with_capacity(n),
        Vec::with_capacity(n),
        Vec::with_capacity(n),
    );
    for a in list.articles {
        url.push(a.url);
        seendate.push(a.seendate);
        domain.push(a.domain);
        tone.push(a.tone);
        themes.push(themes_text(a.themes));
    }
    DataFrame::new(vec![
        Column::new("url".into(), url),
        Column::new("seendate".into(), seendate),
        Column::new("domain".into(), domain),
        Column::new("tone".into(), tone),
        Column::new("themes".into(), themes),
    ])
    .map_err(|e| FetchError::Permanent(format!("gdelt frame construction: {e}")))
}

impl SourceAdapter for GdeltSource {
    fn name(&self) -> &str {
        "gdelt"
    }

    fn fetch(&self, selector: &Selector, window: &FetchWindow) -> Result<DataFrame, FetchError> {
        let Selector::News {
            symbol,
            query,
            max_records,
        } = selector
        else {
            return Err(FetchError::Permanent(format!("gdelt cannot serve {}", selector.label())));
        };
        let request = self.client.get(&self.base_url).query(&[
            ("query", query.clone()),
            ("mode", "ArtList".to_string()),
            ("format", "json".to_string()),
            ("maxrecords", max_records.to_string()),
            ("sort", "HybridRel".to_string()),
            ("startdatetime", window.start.format("%Y%m%d%H%M%S").to_string()),
            ("enddatetime", window.end.format("%Y%m%d%H%M%S").to_string()),
        ]);
        let list: ArtList = get_json(request, &format!("gdelt news {symbol}"))?;
        articles_to_frame(list)
    }
}
