//! Core data model
//!
//! Buckets partition the store by name, stored metrics are JSON objects
//! addressed by bucket and a UTC minute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A JSON object as stored in a bucket
pub type Document = serde_json::Map<String, serde_json::Value>;

/// A named, optionally typed partition of the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket {
    /// Unique bucket name (also the directory name on disk)
    pub name: String,
    /// Type fixed at creation, `None` when no marker exists
    pub bucket_type: Option<String>,
}

impl Bucket {
    pub fn new(name: impl Into<String>, bucket_type: Option<String>) -> Self {
        Self {
            name: name.into(),
            bucket_type,
        }
    }

    pub fn typed(name: impl Into<String>, bucket_type: impl Into<String>) -> Self {
        Self::new(name, Some(bucket_type.into()))
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bucket_type {
            Some(t) => write!(f, "{}:{}", self.name, t),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A document resolved to its bucket and minute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMetric {
    pub bucket: Bucket,
    /// UTC timestamp truncated to the minute
    pub timestamp: DateTime<Utc>,
    pub document: Document,
}

impl StoredMetric {
    pub const fn new(bucket: Bucket, timestamp: DateTime<Utc>, document: Document) -> Self {
        Self {
            bucket,
            timestamp,
            document,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_display() {
        assert_eq!(Bucket::typed("cpu", "gauge").to_string(), "cpu:gauge");
        assert_eq!(Bucket::new("cpu", None).to_string(), "cpu");
    }
}
