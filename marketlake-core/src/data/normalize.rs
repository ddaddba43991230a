//! Record normalizer: raw provider batch → canonical batch.
//!
//! Source columns are matched against the registry by folded name (lowercase,
//! punctuation stripped) and the per-column synonym table. Unknown columns are
//! dropped. Provenance columns come from the caller, never from the data.

use super::coerce::{self, ColumnData, MS_PER_DAY};
use crate::schema::{ColumnSpec, ColumnType, DatasetKind, Fallback};
use polars::prelude::*;
use std::collections::BTreeMap;
use thiserror::Error;

/// Caller-supplied origin of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub source: String,
    pub feed: Option<String>,
    /// Constant values for canonical columns the raw batch does not carry
    /// at all (e.g. `symbol` for a per-symbol fetch, `timeframe`).
    pub defaults: BTreeMap<String, String>,
}

impl Provenance {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            feed: None,
            defaults: BTreeMap::new(),
        }
    }

    pub fn with_feed(mut self, feed: impl Into<String>) -> Self {
        self.feed = Some(feed.into());
        self
    }

    pub fn with_default(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(column.into(), value.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("{kind} batch is missing required column(s): {}", .missing.join(", "))]
    SchemaValidation {
        kind: DatasetKind,
        missing: Vec<String>,
    },

    #[error("polars error during normalization: {0}")]
    Polars(#[from] PolarsError),
}

/// Convert a raw batch into the canonical schema of `kind`.
///
/// Rows whose required cells fail coercion are dropped. Fails only when a
/// required column has no source, fallback, or provenance default.
pub fn normalize(
    kind: DatasetKind,
    raw: &DataFrame,
    provenance: &Provenance,
) -> Result<DataFrame, NormalizeError> {
    let schema = kind.schema();
    if raw.width() == 0 {
        return Ok(DataFrame::empty_with_schema(&schema.polars_schema()));
    }

    let height = raw.height();
    let folded: Vec<(String, &Series)> = raw
        .get_columns()
        .iter()
        .map(|c| (fold(c.name()), c.as_materialized_series()))
        .collect();

    let mut built: Vec<(&ColumnSpec, ColumnData)> = Vec::with_capacity(schema.columns.len());
    let mut missing = Vec::new();

    for spec in schema.columns {
        let data = match spec.name {
            "source" => Some(ColumnData::constant(spec.ty, Some(provenance.source.as_str()), height)),
            "feed" => Some(ColumnData::constant(spec.ty, provenance.feed.as_deref(), height)),
            _ => {
                let mut candidates = Vec::with_capacity(spec.synonyms.len() + 1);
                candidates.push(spec.name);
                candidates.extend_from_slice(spec.synonyms);
                match find_column(&folded, &candidates) {
                    Some(series) => {
                        let data = coerce::coerce(spec.ty, series)?;
                        Some(fill_from_fallback(spec, data, &built))
                    }
                    None => resolve_absent(spec, &folded, &built, provenance, height)?,
                }
            }
        };

        match data {
            Some(data) => built.push((spec, data)),
            None => missing.push(spec.name.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(NormalizeError::SchemaValidation { kind, missing });
    }

    let keep: Vec<bool> = (0..height)
        .map(|row| {
            built
                .iter()
                .all(|(spec, data)| spec.nullable || !data.is_null(row))
        })
        .collect();
    let dropped = keep.iter().filter(|k| !**k).count();
    if dropped > 0 {
        tracing::debug!(kind = %kind, dropped, "dropped rows with unusable required fields");
    }

    let columns = built
        .into_iter()
        .map(|(spec, data)| data.retain(&keep).into_column(spec.name))
        .collect::<PolarsResult<Vec<Column>>>()?;
    Ok(DataFrame::new(columns)?)
}

/// Resolve a canonical column the raw batch has no direct source for.
/// `None` means the column is required and unresolvable.
fn resolve_absent(
    spec: &ColumnSpec,
    folded: &[(String, &Series)],
    built: &[(&ColumnSpec, ColumnData)],
    provenance: &Provenance,
    height: usize,
) -> PolarsResult<Option<ColumnData>> {
    match spec.fallback {
        Fallback::DateAndTime { date, time } => {
            if let Some(dates) = find_column(folded, date) {
                let stamps = match find_column(folded, time) {
                    Some(times) => coerce::combine_date_time(
                        &coerce::string_values(dates)?,
                        &coerce::string_values(times)?,
                    ),
                    None => coerce::timestamp_values(dates)?,
                };
                return Ok(Some(ColumnData::Timestamp(stamps)));
            }
        }
        Fallback::FromColumn(other) => {
            if let Some(data) = derive_from(spec.ty, other, built) {
                return Ok(Some(data));
            }
        }
        Fallback::None => {}
    }

    if let Some(value) = provenance.defaults.get(spec.name) {
        return Ok(Some(ColumnData::constant(spec.ty, Some(value.as_str()), height)));
    }
    if spec.nullable {
        return Ok(Some(ColumnData::nulls(spec.ty, height)));
    }
    Ok(None)
}

/// Fill null cells of a derivable column from its fallback column.
fn fill_from_fallback(
    spec: &ColumnSpec,
    data: ColumnData,
    built: &[(&ColumnSpec, ColumnData)],
) -> ColumnData {
    let Fallback::FromColumn(other) = spec.fallback else {
        return data;
    };
    match (data, derive_from(spec.ty, other, built)) {
        (ColumnData::Timestamp(mut cells), Some(ColumnData::Timestamp(backup))) => {
            for (cell, alt) in cells.iter_mut().zip(backup) {
                if cell.is_none() {
                    *cell = alt;
                }
            }
            ColumnData::Timestamp(cells)
        }
        (data, _) => data,
    }
}

fn derive_from(
    ty: ColumnType,
    other: &str,
    built: &[(&ColumnSpec, ColumnData)],
) -> Option<ColumnData> {
    let (_, source) = built.iter().find(|(s, _)| s.name == other)?;
    match (ty, source) {
        (ColumnType::Timestamp, ColumnData::Date(days)) => Some(ColumnData::Timestamp(
            days.iter().map(|d| d.map(|d| d as i64 * MS_PER_DAY)).collect(),
        )),
        (ColumnType::Timestamp, ColumnData::Timestamp(ts)) => Some(ColumnData::Timestamp(ts.clone())),
        _ => None,
    }
}

/// First raw column matching any candidate name, candidates in priority order.
fn find_column<'a>(folded: &[(String, &'a Series)], names: &[&str]) -> Option<&'a Series> {
    names.iter().find_map(|want| {
        let want = fold(want);
        folded.iter().find(|(n, _)| *n == want).map(|(_, s)| *s)
    })
}

/// `Trade_Count`, `trade-count`, `<TRADECOUNT>` all fold to `tradecount`.
fn fold(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
