//! Column coercion between loosely typed provider columns and canonical types.
//!
//! Everything here works on whole columns: a Polars `Series` goes in, a typed
//! vector of optional cells comes out. Cells that cannot be coerced become
//! `None`; deciding whether that drops the row is the normalizer's job.

use crate::schema::ColumnType;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::*;

pub const MS_PER_DAY: i64 = 86_400_000;

/// Epoch values at or beyond this magnitude are milliseconds, below it seconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

const OFFSET_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y%m%dT%H%M%SZ",
    "%Y%m%d%H%M%S",
    "%Y%m%d %H%M%S",
    "%Y%m%d %H:%M:%S",
    "%Y-%m-%d %H%M%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%m/%d/%Y"];

/// A canonical column held as plain Rust values.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Epoch milliseconds, UTC.
    Timestamp(Vec<Option<i64>>),
    /// Days since 1970-01-01.
    Date(Vec<Option<i32>>),
    Float(Vec<Option<f64>>),
    Integer(Vec<Option<i64>>),
    String(Vec<Option<String>>),
}

impl ColumnData {
    /// An all-null column of the given type.
    pub fn nulls(ty: ColumnType, len: usize) -> Self {
        match ty {
            ColumnType::Timestamp => ColumnData::Timestamp(vec![None; len]),
            ColumnType::Date => ColumnData::Date(vec![None; len]),
            ColumnType::Float => ColumnData::Float(vec![None; len]),
            ColumnType::Integer => ColumnData::Integer(vec![None; len]),
            ColumnType::String => ColumnData::String(vec![None; len]),
        }
    }

    /// A column repeating one textual value, parsed into the target type.
    pub fn constant(ty: ColumnType, value: Option<&str>, len: usize) -> Self {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        match ty {
            ColumnType::Timestamp => ColumnData::Timestamp(vec![value.and_then(parse_timestamp); len]),
            ColumnType::Date => ColumnData::Date(vec![value.and_then(parse_date); len]),
            ColumnType::Float => ColumnData::Float(vec![value.and_then(parse_float); len]),
            ColumnType::Integer => ColumnData::Integer(vec![value.and_then(parse_integer); len]),
            ColumnType::String => ColumnData::String(vec![value.map(str::to_owned); len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Timestamp(v) => v.len(),
            ColumnData::Date(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Integer(v) => v.len(),
            ColumnData::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_null(&self, row: usize) -> bool {
        match self {
            ColumnData::Timestamp(v) => v[row].is_none(),
            ColumnData::Date(v) => v[row].is_none(),
            ColumnData::Float(v) => v[row].is_none(),
            ColumnData::Integer(v) => v[row].is_none(),
            ColumnData::String(v) => v[row].is_none(),
        }
    }

    /// Keep only the rows whose mask entry is true.
    pub fn retain(self, mask: &[bool]) -> Self {
        fn keep<T>(values: Vec<T>, mask: &[bool]) -> Vec<T> {
            values
                .into_iter()
                .zip(mask)
                .filter_map(|(v, keep)| keep.then_some(v))
                .collect()
        }
        match self {
            ColumnData::Timestamp(v) => ColumnData::Timestamp(keep(v, mask)),
            ColumnData::Date(v) => ColumnData::Date(keep(v, mask)),
            ColumnData::Float(v) => ColumnData::Float(keep(v, mask)),
            ColumnData::Integer(v) => ColumnData::Integer(keep(v, mask)),
            ColumnData::String(v) => ColumnData::String(keep(v, mask)),
        }
    }

    /// Build the Polars column with the canonical physical type.
    pub fn into_column(self, name: &str) -> PolarsResult<Column> {
        match self {
            ColumnData::Timestamp(v) => {
                Column::new(name.into(), v).cast(&ColumnType::Timestamp.dtype())
            }
            ColumnData::Date(v) => Column::new(name.into(), v).cast(&DataType::Date),
            ColumnData::Float(v) => Ok(Column::new(name.into(), v)),
            ColumnData::Integer(v) => Ok(Column::new(name.into(), v)),
            ColumnData::String(v) => Ok(Column::new(name.into(), v)),
        }
    }
}

/// Coerce a whole column into the given canonical type.
pub fn coerce(ty: ColumnType, s: &Series) -> PolarsResult<ColumnData> {
    Ok(match ty {
        ColumnType::Timestamp => ColumnData::Timestamp(timestamp_values(s)?),
        ColumnType::Date => ColumnData::Date(date_values(s)?),
        ColumnType::Float => ColumnData::Float(float_values(s)?),
        ColumnType::Integer => ColumnData::Integer(integer_values(s)?),
        ColumnType::String => ColumnData::String(string_values(s)?),
    })
}

/// Fetch a frame column as a materialized series.
pub fn series<'a>(df: &'a DataFrame, name: &str) -> PolarsResult<&'a Series> {
    Ok(df.column(name)?.as_materialized_series())
}

pub fn float_values(s: &Series) -> PolarsResult<Vec<Option<f64>>> {
    if matches!(s.dtype(), DataType::String) {
        return Ok(s.str()?.into_iter().map(|v| v.and_then(parse_float)).collect());
    }
    let cast = s.cast(&DataType::Float64)?;
    Ok(cast
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect())
}

pub fn integer_values(s: &Series) -> PolarsResult<Vec<Option<i64>>> {
    if s.dtype().is_integer() {
        let cast = s.cast(&DataType::Int64)?;
        return Ok(cast.i64()?.into_iter().collect());
    }
    Ok(float_values(s)?
        .into_iter()
        .map(|v| v.and_then(integral))
        .collect())
}

/// Text cells, trimmed; blanks become null. List cells are joined with `;`.
pub fn string_values(s: &Series) -> PolarsResult<Vec<Option<String>>> {
    if let DataType::List(_) = s.dtype() {
        let mut out = Vec::with_capacity(s.len());
        for item in s.list()?.into_iter() {
            let joined = match item {
                Some(inner) => {
                    let inner = inner.cast(&DataType::String)?;
                    let parts: Vec<&str> = inner
                        .str()?
                        .into_iter()
                        .flatten()
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .collect();
                    (!parts.is_empty()).then(|| parts.join(";"))
                }
                None => None,
            };
            out.push(joined);
        }
        return Ok(out);
    }

    let cast = s.cast(&DataType::String)?;
    Ok(cast
        .str()?
        .into_iter()
        .map(|v| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned))
        .collect())
}

/// Epoch milliseconds (UTC). Naive datetimes are read as UTC wall-clock time.
pub fn timestamp_values(s: &Series) -> PolarsResult<Vec<Option<i64>>> {
    match s.dtype() {
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            let physical = s.cast(&DataType::Int64)?;
            Ok(physical
                .i64()?
                .into_iter()
                .map(|v| v.map(|v| to_millis(v, unit)))
                .collect())
        }
        DataType::Date => Ok(date_values(s)?
            .into_iter()
            .map(|d| d.map(|d| d as i64 * MS_PER_DAY))
            .collect()),
        dt if dt.is_integer() || dt.is_float() => Ok(float_values(s)?
            .into_iter()
            .map(|v| v.and_then(integral).map(epoch_to_millis))
            .collect()),
        _ => Ok(string_values(s)?
            .iter()
            .map(|v| v.as_deref().and_then(parse_timestamp))
            .collect()),
    }
}

/// Days since the epoch.
pub fn date_values(s: &Series) -> PolarsResult<Vec<Option<i32>>> {
    match s.dtype() {
        DataType::Date => {
            let physical = s.cast(&DataType::Int32)?;
            Ok(physical.i32()?.into_iter().collect())
        }
        DataType::Datetime(..) => Ok(timestamp_values(s)?
            .into_iter()
            .map(|v| v.map(millis_to_days))
            .collect()),
        _ => Ok(string_values(s)?
            .iter()
            .map(|v| v.as_deref().and_then(parse_date))
            .collect()),
    }
}

/// Join separate date and time-of-day text columns into instants.
pub fn combine_date_time(dates: &[Option<String>], times: &[Option<String>]) -> Vec<Option<i64>> {
    dates
        .iter()
        .zip(times)
        .map(|(d, t)| match (d, t) {
            (Some(d), Some(t)) => parse_timestamp(&format!("{d} {}", pad_compact_time(t))),
            (Some(d), None) => parse_timestamp(d),
            _ => None,
        })
        .collect()
}

/// Parse a textual instant into epoch milliseconds (UTC).
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let v = raw.trim();
    if v.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Some(dt.with_timezone(&Utc).timestamp_millis());
    }
    for fmt in OFFSET_DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(v, fmt) {
            return Some(dt.with_timezone(&Utc).timestamp_millis());
        }
    }
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(v, fmt) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    parse_date(v).map(|d| d as i64 * MS_PER_DAY)
}

/// Parse a textual date (or instant) into days since the epoch.
pub fn parse_date(raw: &str) -> Option<i32> {
    let v = raw.trim();
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(v, fmt) {
            return Some(days_since_epoch(d));
        }
    }
    if v.len() > 10 {
        // Full timestamps carry a date too.
        return parse_timestamp(v).map(millis_to_days);
    }
    None
}

pub fn parse_float(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

pub fn parse_integer(raw: &str) -> Option<i64> {
    let v = raw.trim();
    v.parse::<i64>().ok().or_else(|| parse_float(v).and_then(integral))
}

pub fn days_since_epoch(d: NaiveDate) -> i32 {
    (d - NaiveDate::default()).num_days() as i32
}

pub fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::default().checked_add_signed(chrono::Duration::days(days as i64))
}

pub fn millis_to_days(ms: i64) -> i32 {
    ms.div_euclid(MS_PER_DAY) as i32
}

pub fn datetime_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn to_millis(v: i64, unit: TimeUnit) -> i64 {
    match unit {
        TimeUnit::Nanoseconds => v.div_euclid(1_000_000),
        TimeUnit::Microseconds => v.div_euclid(1_000),
        TimeUnit::Milliseconds => v,
    }
}

fn epoch_to_millis(v: i64) -> i64 {
    if v.abs() >= EPOCH_MILLIS_THRESHOLD {
        v
    } else {
        v * 1_000
    }
}

fn integral(v: f64) -> Option<i64> {
    (v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64).then_some(v as i64)
}

/// Stooq-style `93000` → `093000`.
fn pad_compact_time(t: &str) -> String {
    let t = t.trim();
    if !t.is_empty() && t.len() < 6 && t.chars().all(|c| c.is_ascii_digit()) {
        format!("{t:0>6}")
    } else {
        t.to_string()
    }
}
