//! Time expression codec.
//!
//! User-facing calls accept several time shapes: integer epoch milliseconds,
//! wall-clock datetimes, the literal `now`, and relative expressions such as
//! `2d-ago`. Everything is resolved to epoch milliseconds against a single
//! clock reading captured at the start of the user call, so that window
//! boundaries derived from relative times stay stable across sub-requests.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Exclusive upper bound of January 1970 in epoch milliseconds.
const JAN_1970_END_MS: i64 = 31 * 24 * 3_600_000;

/// Time units accepted in relative expressions and granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeUnit {
    pub fn as_millis(self) -> i64 {
        match self {
            Self::Second => 1_000,
            Self::Minute => 60_000,
            Self::Hour => 3_600_000,
            Self::Day => 86_400_000,
            Self::Week => 604_800_000,
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Self::Second => "s",
            Self::Minute => "m",
            Self::Hour => "h",
            Self::Day => "d",
            Self::Week => "w",
        }
    }

    /// Units valid in a granularity string. Weeks are not bucketable.
    fn from_granularity_str(s: &str) -> Option<Self> {
        match s {
            "s" | "second" => Some(Self::Second),
            "m" | "minute" => Some(Self::Minute),
            "h" | "hour" => Some(Self::Hour),
            "d" | "day" => Some(Self::Day),
            _ => None,
        }
    }

    fn from_ago_str(s: &str) -> Option<Self> {
        match s {
            "s" => Some(Self::Second),
            "m" => Some(Self::Minute),
            "h" => Some(Self::Hour),
            "d" => Some(Self::Day),
            "w" => Some(Self::Week),
            _ => None,
        }
    }
}

/// A user-supplied point in time, not yet resolved to milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeSpec {
    /// Epoch milliseconds, passed through unchanged.
    Millis(i64),
    /// A wall-clock instant.
    DateTime(DateTime<Utc>),
    /// `N<unit>-ago`, relative to the call's clock reading.
    Ago { amount: i64, unit: TimeUnit },
    /// The call's clock reading itself.
    Now,
}

impl TimeSpec {
    /// Resolve to epoch milliseconds against the given clock reading.
    pub fn resolve(self, now: DateTime<Utc>) -> i64 {
        match self {
            Self::Millis(ms) => ms,
            Self::DateTime(dt) => dt.timestamp_millis(),
            Self::Ago { amount, unit } => now.timestamp_millis() - amount * unit.as_millis(),
            Self::Now => now.timestamp_millis(),
        }
    }

    /// Parse `now` or a `N<unit>-ago` expression.
    pub fn parse(s: &str) -> Result<Self> {
        if s == "now" {
            return Ok(Self::Now);
        }
        let invalid = || Error::InvalidTimestamp(format!("could not parse time expression '{s}'"));
        let body = s.strip_suffix("-ago").ok_or_else(invalid)?;
        let digits_end = body
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let amount: i64 = body[..digits_end].parse().map_err(|_| invalid())?;
        let unit = TimeUnit::from_ago_str(&body[digits_end..]).ok_or_else(invalid)?;
        Ok(Self::Ago { amount, unit })
    }
}

impl From<i64> for TimeSpec {
    fn from(ms: i64) -> Self {
        Self::Millis(ms)
    }
}

impl From<DateTime<Utc>> for TimeSpec {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }
}

impl FromStr for TimeSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Width of a server aggregate bucket, e.g. `12h` or `30m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Granularity {
    pub magnitude: i64,
    pub unit: TimeUnit,
}

impl Granularity {
    pub fn new(magnitude: i64, unit: TimeUnit) -> Self {
        Self { magnitude, unit }
    }

    pub fn as_millis(&self) -> i64 {
        self.magnitude * self.unit.as_millis()
    }

    /// Parse a magnitude-and-unit string. The magnitude defaults to 1, so
    /// `h` and `1h` are equivalent.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidGranularity(format!("could not parse granularity '{s}'"));
        let digits_end = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        let magnitude = if digits_end == 0 {
            1
        } else {
            s[..digits_end].parse().map_err(|_| invalid())?
        };
        let unit = TimeUnit::from_granularity_str(&s[digits_end..]).ok_or_else(invalid)?;
        if magnitude < 1 {
            return Err(invalid());
        }
        Ok(Self { magnitude, unit })
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.magnitude, self.unit.short_name())
    }
}

/// Reject insert timestamps that fall inside January 1970. A value that
/// small almost always means the caller passed seconds instead of
/// milliseconds.
pub fn validate_insert_timestamp(ms: i64) -> Result<()> {
    if (0..JAN_1970_END_MS).contains(&ms) {
        return Err(Error::InvalidTimestamp(format!(
            "timestamp {ms} is within January 1970; datapoint timestamps are epoch milliseconds"
        )));
    }
    Ok(())
}
