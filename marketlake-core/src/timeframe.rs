//! Fixed-width bar intervals.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 3_600;
const SECS_PER_DAY: i64 = 86_400;
// Widest width whose millisecond form still fits in an i64.
const MAX_SECONDS: i64 = i64::MAX / 1_000;

/// A bar width in whole seconds. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    seconds: i64,
}

impl Timeframe {
    pub const ONE_MINUTE: Timeframe = Timeframe { seconds: 60 };
    pub const FIVE_MINUTES: Timeframe = Timeframe { seconds: 300 };
    pub const TEN_MINUTES: Timeframe = Timeframe { seconds: 600 };
    pub const ONE_HOUR: Timeframe = Timeframe { seconds: 3_600 };
    pub const ONE_DAY: Timeframe = Timeframe { seconds: 86_400 };

    pub fn from_seconds(seconds: i64) -> Result<Self, TimeframeError> {
        if seconds <= 0 {
            return Err(TimeframeError::NonPositive(seconds));
        }
        if seconds > MAX_SECONDS {
            return Err(TimeframeError::TooWide(seconds));
        }
        Ok(Self { seconds })
    }

    pub fn seconds(self) -> i64 {
        self.seconds
    }

    pub fn millis(self) -> i64 {
        self.seconds * 1_000
    }

    /// True when `self` is a whole multiple (≥ 1×) of `finer`.
    pub fn is_multiple_of(self, finer: Timeframe) -> bool {
        self.seconds >= finer.seconds && self.seconds % finer.seconds == 0
    }

    /// Start of the epoch-aligned, left-closed bucket containing `ts_ms`.
    pub fn bucket_start(self, ts_ms: i64) -> i64 {
        ts_ms - ts_ms.rem_euclid(self.millis())
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.seconds;
        if s % SECS_PER_DAY == 0 {
            write!(f, "{}day", s / SECS_PER_DAY)
        } else if s % SECS_PER_HOUR == 0 {
            write!(f, "{}hour", s / SECS_PER_HOUR)
        } else if s % SECS_PER_MINUTE == 0 {
            write!(f, "{}min", s / SECS_PER_MINUTE)
        } else {
            write!(f, "{s}s")
        }
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    /// Accepts `10min`, `10Min`, `10m`, `1hour`, `1h`, `1day`, `1d`, `30s`.
    /// A bare unit (`hour`) means one of it.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().to_ascii_lowercase();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| TimeframeError::Invalid(s.to_string()))?;
        let (count, unit) = text.split_at(split);
        let count: i64 = if count.is_empty() {
            1
        } else {
            count
                .parse()
                .map_err(|_| TimeframeError::Invalid(s.to_string()))?
        };
        let unit_secs = match unit.trim() {
            "s" | "sec" | "secs" | "second" | "seconds" => 1,
            "m" | "min" | "mins" | "minute" | "minutes" | "t" => SECS_PER_MINUTE,
            "h" | "hr" | "hour" | "hours" => SECS_PER_HOUR,
            "d" | "day" | "days" => SECS_PER_DAY,
            _ => return Err(TimeframeError::Invalid(s.to_string())),
        };
        let seconds = count
            .checked_mul(unit_secs)
            .ok_or_else(|| TimeframeError::Invalid(s.to_string()))?;
        Timeframe::from_seconds(seconds)
    }
}

impl TryFrom<String> for Timeframe {
    type Error = TimeframeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeframeError {
    #[error("invalid timeframe '{0}'")]
    Invalid(String),

    #[error("timeframe must be positive, got {0}s")]
    NonPositive(i64),

    #[error("timeframe of {0}s is too wide")]
    TooWide(i64),
}
