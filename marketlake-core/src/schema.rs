//! Canonical schema registry: the contract between providers and the dataset.
//!
//! Every dataset kind has a fixed, ordered column set, an identity key used for
//! deduplication, and a Hive-style partition layout. Normalized batches must match
//! the registry exactly; the writer and resampler read column positions from here.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type tag for a canonical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Timezone-aware UTC instant, millisecond resolution.
    Timestamp,
    /// Calendar date.
    Date,
    Float,
    Integer,
    String,
}

impl ColumnType {
    /// Physical Polars type used for this tag.
    pub fn dtype(self) -> DataType {
        match self {
            ColumnType::Timestamp => DataType::Datetime(TimeUnit::Milliseconds, Some("UTC".into())),
            ColumnType::Date => DataType::Date,
            ColumnType::Float => DataType::Float64,
            ColumnType::Integer => DataType::Int64,
            ColumnType::String => DataType::String,
        }
    }
}

/// One column of a canonical schema.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
    /// Nullable columns are filled with nulls when the source lacks them.
    pub nullable: bool,
    /// Alternative source column names, matched case- and punctuation-insensitively.
    pub synonyms: &'static [&'static str],
    pub fallback: Fallback,
}

/// How a column can be derived when no source column matches it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    None,
    /// Combine a date column with a time-of-day column; the date alone is
    /// accepted when no time column exists.
    DateAndTime {
        date: &'static [&'static str],
        time: &'static [&'static str],
    },
    /// Derive from another canonical column of the same schema (date → midnight UTC).
    FromColumn(&'static str),
}

const fn required(name: &'static str, ty: ColumnType, synonyms: &'static [&'static str]) -> ColumnSpec {
    ColumnSpec {
        name,
        ty,
        nullable: false,
        synonyms,
        fallback: Fallback::None,
    }
}

const fn optional(name: &'static str, ty: ColumnType, synonyms: &'static [&'static str]) -> ColumnSpec {
    ColumnSpec {
        name,
        ty,
        nullable: true,
        synonyms,
        fallback: Fallback::None,
    }
}

const fn derived(spec: ColumnSpec, fallback: Fallback) -> ColumnSpec {
    ColumnSpec { fallback, ..spec }
}

/// One directory level of the Hive-style layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// `column=value`, value rendered from the column itself.
    Column(&'static str),
    /// `date=YYYY-MM-DD`, derived from the UTC date of a timestamp column.
    DateOf(&'static str),
}

impl Partition {
    /// Directory segment name (left of the `=`).
    pub fn segment_name(&self) -> &'static str {
        match self {
            Partition::Column(name) => *name,
            Partition::DateOf(_) => "date",
        }
    }

    /// Column the partition value is read from.
    pub fn source_column(&self) -> &'static str {
        match self {
            Partition::Column(name) | Partition::DateOf(name) => *name,
        }
    }
}

/// The four record kinds persisted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Bar,
    MacroObservation,
    Filing,
    NewsArticle,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 4] = [
        DatasetKind::Bar,
        DatasetKind::MacroObservation,
        DatasetKind::Filing,
        DatasetKind::NewsArticle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DatasetKind::Bar => "bar",
            DatasetKind::MacroObservation => "macro_observation",
            DatasetKind::Filing => "filing",
            DatasetKind::NewsArticle => "news_article",
        }
    }

    /// Directory name of the dataset under the data root.
    pub fn dataset_name(self) -> &'static str {
        match self {
            DatasetKind::Bar => "bars",
            DatasetKind::MacroObservation => "macro",
            DatasetKind::Filing => "filings",
            DatasetKind::NewsArticle => "news",
        }
    }

    pub fn schema(self) -> &'static CanonicalSchema {
        match self {
            DatasetKind::Bar => &BAR_SCHEMA,
            DatasetKind::MacroObservation => &MACRO_SCHEMA,
            DatasetKind::Filing => &FILING_SCHEMA,
            DatasetKind::NewsArticle => &NEWS_SCHEMA,
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatasetKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        DatasetKind::ALL
            .into_iter()
            .find(|k| k.name() == key || k.dataset_name() == key)
            .ok_or_else(|| SchemaError::UnknownDatasetKind(s.to_string()))
    }
}

/// Look up a canonical schema by kind name (`bar`) or dataset name (`bars`).
pub fn lookup(name: &str) -> Result<&'static CanonicalSchema, SchemaError> {
    name.parse::<DatasetKind>().map(DatasetKind::schema)
}

/// Fixed column set, identity key, and partition layout for one kind.
#[derive(Debug)]
pub struct CanonicalSchema {
    pub kind: DatasetKind,
    pub columns: &'static [ColumnSpec],
    pub identity_key: &'static [&'static str],
    pub partitions: &'static [Partition],
}

impl CanonicalSchema {
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The schema as Polars fields, in declared order.
    pub fn polars_schema(&self) -> Schema {
        Schema::from_iter(
            self.columns
                .iter()
                .map(|c| Field::new(c.name.into(), c.ty.dtype())),
        )
    }

    /// Check that a frame has exactly this column set, order, and physical types.
    pub fn validate(&self, df: &DataFrame) -> Result<(), SchemaError> {
        let actual: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        let expected = self.column_names();
        if actual != expected {
            return Err(SchemaError::ColumnMismatch {
                kind: self.kind,
                expected: expected.iter().map(|s| s.to_string()).collect(),
                actual,
            });
        }

        for (spec, dtype) in self.columns.iter().zip(df.dtypes()) {
            let want = spec.ty.dtype();
            if dtype != want {
                return Err(SchemaError::TypeMismatch {
                    column: spec.name.to_string(),
                    expected: want,
                    actual: dtype,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown dataset kind '{0}'")]
    UnknownDatasetKind(String),

    #[error("{kind} columns {actual:?} do not match canonical {expected:?}")]
    ColumnMismatch {
        kind: DatasetKind,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}

// ── Registry ────────────────────────────────────────────────────────

use ColumnType::{Date, Float, Integer, String as Str, Timestamp};

static BAR_COLUMNS: [ColumnSpec; 12] = [
    required("symbol", Str, &["ticker", "sym"]),
    derived(
        required("timestamp", Timestamp, &["datetime", "ts", "t", "time_stamp", "bar_time"]),
        Fallback::DateAndTime {
            date: &["date", "day"],
            time: &["time"],
        },
    ),
    required("open", Float, &["o", "open_price"]),
    required("high", Float, &["h", "high_price"]),
    required("low", Float, &["l", "low_price"]),
    required("close", Float, &["c", "last", "close_price"]),
    required("volume", Float, &["vol", "v"]),
    optional("trade_count", Integer, &["n", "trades", "num_trades", "count"]),
    optional("vwap", Float, &["vw"]),
    required("timeframe", Str, &["interval", "bar_size"]),
    required("source", Str, &[]),
    optional("feed", Str, &[]),
];

static MACRO_COLUMNS: [ColumnSpec; 4] = [
    required("series_id", Str, &["series", "id"]),
    required("date", Date, &["observation_date", "period_date"]),
    optional("value", Float, &["observation", "obs_value"]),
    required("source", Str, &[]),
];

static FILING_COLUMNS: [ColumnSpec; 7] = [
    required("cik", Str, &["cik_str", "central_index_key"]),
    required("symbol", Str, &["ticker"]),
    required("filing_date", Date, &["filed", "date_filed"]),
    derived(
        required("filing_datetime", Timestamp, &["acceptance_datetime", "accepted", "filed_at"]),
        Fallback::FromColumn("filing_date"),
    ),
    required("form", Str, &["form_type", "type"]),
    required("accession", Str, &["accession_number", "accession_no", "adsh"]),
    required("source", Str, &[]),
];

static NEWS_COLUMNS: [ColumnSpec; 7] = [
    required("symbol", Str, &["ticker"]),
    required(
        "publish_datetime",
        Timestamp,
        &["seendate", "published", "published_at", "publish_date", "datetime"],
    ),
    required("source_domain", Str, &["domain", "sourcedomain"]),
    required("url", Str, &["link", "article_url"]),
    optional("tone", Float, &["sentiment", "avg_tone"]),
    optional("themes", Str, &["theme", "topics"]),
    required("source", Str, &[]),
];

static BAR_SCHEMA: CanonicalSchema = CanonicalSchema {
    kind: DatasetKind::Bar,
    columns: &BAR_COLUMNS,
    identity_key: &["symbol", "timestamp", "timeframe", "source"],
    partitions: &[
        Partition::Column("symbol"),
        Partition::Column("timeframe"),
        Partition::DateOf("timestamp"),
    ],
};

static MACRO_SCHEMA: CanonicalSchema = CanonicalSchema {
    kind: DatasetKind::MacroObservation,
    columns: &MACRO_COLUMNS,
    identity_key: &["series_id", "date"],
    partitions: &[Partition::Column("series_id")],
};

static FILING_SCHEMA: CanonicalSchema = CanonicalSchema {
    kind: DatasetKind::Filing,
    columns: &FILING_COLUMNS,
    identity_key: &["symbol", "accession"],
    partitions: &[Partition::Column("symbol")],
};

static NEWS_SCHEMA: CanonicalSchema = CanonicalSchema {
    kind: DatasetKind::NewsArticle,
    columns: &NEWS_COLUMNS,
    identity_key: &["symbol", "url"],
    partitions: &[Partition::Column("symbol")],
};
