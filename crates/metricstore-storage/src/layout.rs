//! On-disk layout of a bucket
//!
//! ```text
//! <bucket>/<type>.type                       empty type marker
//! <bucket>/<year>/<month>/<day>/<minute>     expanded segment (minute of day)
//! <bucket>/<year>/<month>/<day>.day          compacted day file
//! <bucket>/<year>/<month>/<day>-tmp/<minute> staging for expand
//! <bucket>/<year>/<month>/<day>.day-tmp      staging for compress
//! ```
//!
//! Year, month and day are unpadded decimal numbers. Path construction has no
//! side effects; the listing helpers read directories but never modify them.

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Timelike, Utc};
use metricstore_common::{Result, start_of_day};
use std::path::{Path, PathBuf};

/// Suffix of compacted day files
pub const DAY_FILE_SUFFIX: &str = ".day";
/// Suffix of staging paths
pub const TMP_SUFFIX: &str = "-tmp";
/// Extension of the bucket type marker
pub const TYPE_EXTENSION: &str = "type";

/// Minute of the UTC day, `0..1440`
pub fn minute_of_day(ts: DateTime<Utc>) -> u32 {
    ts.hour() * 60 + ts.minute()
}

/// Timestamp of a minute of a day
pub fn minute_timestamp(date: NaiveDate, minute: u32) -> DateTime<Utc> {
    start_of_day(date) + TimeDelta::minutes(i64::from(minute))
}

/// Maps dates and timestamps to paths below one bucket directory
#[derive(Debug, Clone)]
pub struct PathLayout {
    root: PathBuf,
}

impl PathLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn month_dir(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(date.year().to_string())
            .join(date.month().to_string())
    }

    /// Directory of expanded minute segments
    pub fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.month_dir(date).join(date.day().to_string())
    }

    /// Compacted day file
    pub fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.month_dir(date)
            .join(format!("{}{DAY_FILE_SUFFIX}", date.day()))
    }

    /// Segment file of the minute containing `ts`
    pub fn minute_file(&self, ts: DateTime<Utc>) -> PathBuf {
        self.day_dir(ts.date_naive())
            .join(minute_of_day(ts).to_string())
    }

    /// Staging directory used while expanding a day
    pub fn tmp_day_dir(&self, date: NaiveDate) -> PathBuf {
        self.month_dir(date)
            .join(format!("{}{TMP_SUFFIX}", date.day()))
    }

    /// Staging segment file used while expanding a day
    pub fn tmp_minute_file(&self, ts: DateTime<Utc>) -> PathBuf {
        self.tmp_day_dir(ts.date_naive())
            .join(minute_of_day(ts).to_string())
    }

    /// Staging file used while compacting a day
    pub fn tmp_day_file(&self, date: NaiveDate) -> PathBuf {
        self.month_dir(date)
            .join(format!("{}{DAY_FILE_SUFFIX}{TMP_SUFFIX}", date.day()))
    }

    /// All days holding data, ascending
    ///
    /// A day counts when either its directory or its day file exists;
    /// staging entries are skipped.
    pub fn days(&self) -> Result<Vec<NaiveDate>> {
        let mut days = Vec::new();
        for (year, year_dir) in numeric_entries(&self.root, |p| p.is_dir())? {
            let Ok(year) = i32::try_from(year) else {
                continue;
            };
            for (month, month_dir) in numeric_entries(&year_dir, |p| p.is_dir())? {
                let mut month_days: Vec<u32> = Vec::new();
                for (day, _) in day_entries(&month_dir)? {
                    if month_days.last() != Some(&day) {
                        month_days.push(day);
                    }
                }
                days.extend(
                    month_days
                        .into_iter()
                        .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day)),
                );
            }
        }
        Ok(days)
    }

    /// Segment files of an expanded day as `(minute, path)`, ascending
    pub fn minutes_of_day(&self, date: NaiveDate) -> Result<Vec<(u32, PathBuf)>> {
        let dir = self.day_dir(date);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        numeric_entries(&dir, |p| p.is_file())
    }
}

/// Entries of `dir` whose whole file name is a number, sorted numerically
fn numeric_entries(dir: &Path, accept: impl Fn(&Path) -> bool) -> Result<Vec<(u32, PathBuf)>> {
    let mut entries = Vec::new();
    if !dir.is_dir() {
        return Ok(entries);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let number = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(number) = number {
            if accept(&path) {
                entries.push((number, path));
            }
        }
    }
    entries.sort_by_key(|(number, _)| *number);
    Ok(entries)
}

/// Day directories (`N`) and day files (`N.day`) of a month, sorted by day
fn day_entries(month_dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(month_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let day = if path.is_dir() {
            name.parse::<u32>().ok()
        } else {
            name.strip_suffix(DAY_FILE_SUFFIX)
                .and_then(|n| n.parse::<u32>().ok())
        };
        if let Some(day) = day {
            entries.push((day, path));
        }
    }
    entries.sort_by_key(|(day, _)| *day);
    Ok(entries)
}
