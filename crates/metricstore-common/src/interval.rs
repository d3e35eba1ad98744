//! UTC time intervals and minute/day arithmetic
//!
//! All storage addressing happens on UTC minutes, and reads are split on UTC
//! midnight so a single read never spans more than one calendar day.

use crate::error::{Error, Result};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Truncate a timestamp to the start of its UTC minute
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(60), 0).unwrap_or(ts)
}

/// Midnight (UTC) at the start of a calendar day
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Half-open interval `[start, end)` in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Interval {
    /// Create an interval, rejecting `end < start`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(Error::invalid_argument(format!(
                "interval end {end} is before start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Zero length interval positioned at `at`
    pub const fn empty_at(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    /// Interval covering one UTC calendar day
    pub fn day(date: NaiveDate) -> Self {
        let start = start_of_day(date);
        Self {
            start,
            end: start + TimeDelta::days(1),
        }
    }

    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Both ends truncated to their UTC minute
    pub fn truncated_to_minutes(&self) -> Self {
        Self {
            start: truncate_to_minute(self.start),
            end: truncate_to_minute(self.end),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Split an interval at UTC midnight boundaries
///
/// Both ends are truncated to the minute first. An empty interval yields no
/// pieces; otherwise the pieces are contiguous and cover the whole interval.
pub fn split_by_day(interval: &Interval) -> Vec<Interval> {
    let utc = interval.truncated_to_minutes();
    let mut pieces = Vec::new();
    let mut current = utc.start;
    while current < utc.end {
        let next_midnight = current
            .date_naive()
            .checked_add_days(Days::new(1))
            .map(start_of_day);
        let piece_end = match next_midnight {
            Some(midnight) if midnight < utc.end => midnight,
            _ => utc.end,
        };
        pieces.push(Interval {
            start: current,
            end: piece_end,
        });
        current = piece_end;
    }
    pieces
}
