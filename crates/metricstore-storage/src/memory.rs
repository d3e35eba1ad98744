//! Repository that keeps no metric data
//!
//! Only bucket identities are remembered. Useful when the cache alone
//! should hold recent metrics.

use crate::repository::MetricRepository;
use metricstore_common::{Bucket, Document, Interval, Result, StoredMetric, TimestampFunction};
use parking_lot::RwLock;
use std::collections::BTreeMap;

pub struct NonPersistentMetricRepository {
    buckets: RwLock<BTreeMap<String, Bucket>>,
    timestamps: TimestampFunction,
}

impl NonPersistentMetricRepository {
    pub fn new(timestamps: TimestampFunction) -> Self {
        Self {
            buckets: RwLock::new(BTreeMap::new()),
            timestamps,
        }
    }
}

impl Default for NonPersistentMetricRepository {
    fn default() -> Self {
        Self::new(TimestampFunction::default())
    }
}

impl MetricRepository for NonPersistentMetricRepository {
    fn list_buckets(&self) -> Result<Vec<Bucket>> {
        Ok(self.buckets.read().values().cloned().collect())
    }

    fn write(&self, bucket: &str, bucket_type: Option<&str>, document: Document) -> Result<StoredMetric> {
        let timestamp = self.timestamps.apply(&document)?;
        let bucket = self
            .buckets
            .write()
            .entry(bucket.to_string())
            .or_insert_with(|| Bucket::new(bucket, bucket_type.map(str::to_string)))
            .clone();
        Ok(StoredMetric::new(bucket, timestamp, document))
    }

    fn read(
        &self,
        _bucket: &str,
        _interval: &Interval,
        _callback: &mut dyn FnMut(StoredMetric),
    ) -> Result<()> {
        Ok(())
    }
}
