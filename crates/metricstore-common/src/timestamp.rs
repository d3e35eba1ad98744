//! Timestamp extraction from documents
//!
//! Every stored document is addressed by the UTC minute found at a configured
//! field. The default reads ISO-8601 text at `"timestamp"`.

use crate::config::TimestampConfig;
use crate::error::{Error, Result};
use crate::interval::truncate_to_minute;
use crate::path::JsonPath;
use crate::types::Document;
use chrono::{DateTime, NaiveDateTime, Utc};

/// Default field holding the timestamp
pub const DEFAULT_TIMESTAMP_FIELD: &str = "timestamp";

/// ISO-8601 shapes accepted without an offset, read as UTC
const NAIVE_ISO_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Resolves the UTC minute of a document
#[derive(Debug, Clone)]
pub struct TimestampFunction {
    path: JsonPath,
    format: Option<String>,
}

impl TimestampFunction {
    pub const fn new(path: JsonPath, format: Option<String>) -> Self {
        Self { path, format }
    }

    /// Build from configuration
    pub fn from_config(config: &TimestampConfig) -> Result<Self> {
        Ok(Self::new(JsonPath::parse(&config.field)?, config.format.clone()))
    }

    /// Extract, parse and truncate the timestamp of `document`
    pub fn apply(&self, document: &Document) -> Result<DateTime<Utc>> {
        let node = self.path.extract(document).ok_or_else(|| {
            Error::invalid_timestamp(format!("field '{}' is missing", self.path))
        })?;
        let text = node.as_str().ok_or_else(|| {
            Error::invalid_timestamp(format!("field '{}' is not a string", self.path))
        })?;
        if text.is_empty() {
            return Err(Error::invalid_timestamp(format!(
                "field '{}' is empty",
                self.path
            )));
        }
        let parsed = match &self.format {
            Some(format) => parse_with_format(text, format),
            None => parse_iso(text),
        }
        .ok_or_else(|| Error::invalid_timestamp(format!("cannot parse '{text}'")))?;
        Ok(truncate_to_minute(parsed))
    }
}

impl Default for TimestampFunction {
    fn default() -> Self {
        Self::new(JsonPath::field(DEFAULT_TIMESTAMP_FIELD), None)
    }
}

fn parse_iso(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_ISO_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .map(|naive| naive.and_utc())
}

fn parse_with_format(text: &str, format: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(text, format)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, format)
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_default_iso_utc() {
        let f = TimestampFunction::default();
        let ts = f
            .apply(&doc(json!({"timestamp": "2015-01-01T10:15:42.123Z"})))
            .unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2015, 1, 1, 10, 15, 0).unwrap());
    }

    #[test]
    fn test_offset_converted_to_utc() {
        let f = TimestampFunction::default();
        let ts = f
            .apply(&doc(json!({"timestamp": "2015-01-01T01:30:00+02:00"})))
            .unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2014, 12, 31, 23, 30, 0).unwrap());
    }

    #[test]
    fn test_without_offset_is_utc() {
        let f = TimestampFunction::default();
        let ts = f.apply(&doc(json!({"timestamp": "2015-01-01T00:01"}))).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2015, 1, 1, 0, 1, 0).unwrap());
    }

    #[test]
    fn test_custom_path_and_format() {
        let f = TimestampFunction::new(
            JsonPath::parse("meta.time").unwrap(),
            Some("%d.%m.%Y %H:%M:%S".to_string()),
        );
        let ts = f
            .apply(&doc(json!({"meta": {"time": "02.03.2015 04:05:06"}})))
            .unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2015, 3, 2, 4, 5, 0).unwrap());
    }

    #[test]
    fn test_invalid_timestamps() {
        let f = TimestampFunction::default();
        assert!(f.apply(&doc(json!({"other": 1}))).is_err());
        assert!(f.apply(&doc(json!({"timestamp": 1_420_070_400}))).is_err());
        assert!(f.apply(&doc(json!({"timestamp": ""}))).is_err());
        assert!(f.apply(&doc(json!({"timestamp": "yesterday"}))).is_err());
    }
}
