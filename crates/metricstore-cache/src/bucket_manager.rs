//! Minute-keyed cache of every bucket

use crate::expanded::ExpandedBucketManager;
use crate::minute::MinuteBucket;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use metricstore_common::{Bucket, Document, Interval, Result, StoredMetric, truncate_to_minute};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cached minutes of one bucket
pub struct CachedMetricBucket {
    bucket: Bucket,
    minutes: RwLock<BTreeMap<DateTime<Utc>, Arc<MinuteBucket>>>,
    expanded: ExpandedBucketManager,
}

impl CachedMetricBucket {
    pub fn new(bucket: Bucket, max_expanded: usize) -> Self {
        Self {
            bucket,
            minutes: RwLock::new(BTreeMap::new()),
            expanded: ExpandedBucketManager::new(max_expanded),
        }
    }

    pub const fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    pub const fn expanded(&self) -> &ExpandedBucketManager {
        &self.expanded
    }

    /// Cache a document under the UTC minute of `timestamp`
    pub fn write(&self, timestamp: DateTime<Utc>, document: Document) -> Result<()> {
        let key = truncate_to_minute(timestamp);
        let existing = self.minutes.read().get(&key).cloned();
        let minute = match existing {
            Some(minute) => minute,
            None => Arc::clone(self.minutes.write().entry(key).or_default()),
        };
        if minute.write(document)? {
            self.expanded.expanded(&minute);
        }
        Ok(())
    }

    /// The cached minutes within `interval`, ascending
    pub fn range(&self, interval: &Interval) -> Vec<(DateTime<Utc>, Arc<MinuteBucket>)> {
        if interval.is_empty() {
            return Vec::new();
        }
        self.minutes
            .read()
            .range(interval.start()..interval.end())
            .map(|(ts, minute)| (*ts, Arc::clone(minute)))
            .collect()
    }

    /// Drop every minute strictly before `before`; returns the number dropped
    pub fn clear(&self, before: DateTime<Utc>) -> usize {
        let mut minutes = self.minutes.write();
        let kept = minutes.split_off(&before);
        let removed = minutes.len();
        *minutes = kept;
        removed
    }

    /// First cached minute to the end of the last one
    pub fn data_interval(&self) -> Option<Interval> {
        let minutes = self.minutes.read();
        let first = *minutes.keys().next()?;
        let last = *minutes.keys().next_back()?;
        Interval::new(first, last + TimeDelta::minutes(1)).ok()
    }

    pub fn minute_count(&self) -> usize {
        self.minutes.read().len()
    }

    /// Total number of cached documents
    pub fn object_count(&self) -> u64 {
        self.minutes
            .read()
            .values()
            .map(|minute| minute.size() as u64)
            .sum()
    }
}

/// Result of reading a bucket from the cache
pub struct CachedRead {
    /// Part of the requested interval the cache answered for
    ///
    /// Coverage starts at the oldest cached minute, including minutes that
    /// fell out of the window but were not cleaned up yet. A metric written
    /// inside that span while it was not cacheable is not seen by cached reads
    /// until the next cleanup drops the stale minutes.
    pub covered: Interval,
    bucket: Option<Bucket>,
    minutes: Vec<(DateTime<Utc>, Arc<MinuteBucket>)>,
}

impl CachedRead {
    fn empty(interval: &Interval) -> Self {
        Self {
            covered: Interval::empty_at(interval.end()),
            bucket: None,
            minutes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.minutes.is_empty()
    }

    /// Stream the cached metrics in timestamp order, one minute decoded at a time
    pub fn for_each(&self, callback: &mut dyn FnMut(StoredMetric)) -> Result<()> {
        let Some(bucket) = &self.bucket else {
            return Ok(());
        };
        for (timestamp, minute) in &self.minutes {
            for document in minute.documents()? {
                callback(StoredMetric::new(bucket.clone(), *timestamp, document));
            }
        }
        Ok(())
    }
}

/// All cached buckets by name
pub struct BucketManager {
    buckets: DashMap<String, Arc<CachedMetricBucket>>,
    max_expanded: usize,
    created: AtomicU64,
}

impl BucketManager {
    pub fn new(max_expanded: usize) -> Self {
        Self {
            buckets: DashMap::new(),
            max_expanded: max_expanded.max(1),
            created: AtomicU64::new(0),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<CachedMetricBucket>> {
        self.buckets.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Cache a metric, creating its bucket entry on first use
    pub fn write(&self, metric: &StoredMetric) -> Result<()> {
        let bucket = match self.get(&metric.bucket.name) {
            Some(bucket) => bucket,
            None => Arc::clone(
                self.buckets
                    .entry(metric.bucket.name.clone())
                    .or_insert_with(|| {
                        self.created.fetch_add(1, Ordering::Relaxed);
                        Arc::new(CachedMetricBucket::new(
                            metric.bucket.clone(),
                            self.max_expanded,
                        ))
                    })
                    .value(),
            ),
        };
        bucket.write(metric.timestamp, metric.document.clone())
    }

    /// Cached minutes of `interval` plus the part of it they cover
    ///
    /// Coverage runs from the first to the end of the last cached minute;
    /// without cached data it is the empty interval at `interval.end()`.
    pub fn read(&self, name: &str, interval: &Interval) -> CachedRead {
        let Some(bucket) = self.get(name) else {
            return CachedRead::empty(interval);
        };
        let minutes = bucket.range(interval);
        let (Some((first, _)), Some((last, _))) = (minutes.first(), minutes.last()) else {
            return CachedRead::empty(interval);
        };
        let Ok(covered) = Interval::new(*first, *last + TimeDelta::minutes(1)) else {
            return CachedRead::empty(interval);
        };
        CachedRead {
            covered,
            bucket: Some(bucket.bucket().clone()),
            minutes,
        }
    }

    /// Drop all minutes strictly before `before` across all buckets
    pub fn clear(&self, before: DateTime<Utc>) -> usize {
        let buckets: Vec<Arc<CachedMetricBucket>> =
            self.buckets.iter().map(|entry| Arc::clone(entry.value())).collect();
        buckets.iter().map(|bucket| bucket.clear(before)).sum()
    }

    /// Cached buckets sorted by name
    pub fn list_buckets(&self) -> Vec<Bucket> {
        let mut buckets: Vec<Bucket> = self
            .buckets
            .iter()
            .map(|entry| entry.value().bucket().clone())
            .collect();
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        buckets
    }

    /// Number of bucket entries created so far
    pub fn created_buckets(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn data_interval_per_bucket(&self) -> BTreeMap<String, Option<Interval>> {
        self.buckets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().data_interval()))
            .collect()
    }

    pub fn object_count_per_bucket(&self) -> BTreeMap<String, u64> {
        self.buckets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().object_count()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 1, 1, h, m, s).unwrap()
    }

    fn metric(bucket: &str, ts: DateTime<Utc>, n: i64) -> StoredMetric {
        StoredMetric::new(
            Bucket::typed(bucket, "T"),
            ts,
            json!({"n": n}).as_object().cloned().unwrap(),
        )
    }

    fn collect(read: &CachedRead) -> Vec<i64> {
        let mut values = Vec::new();
        read.for_each(&mut |m| values.push(m.document["n"].as_i64().unwrap()))
            .unwrap();
        values
    }

    #[test]
    fn test_read_reports_coverage() {
        let manager = BucketManager::new(5);
        manager.write(&metric("B", at(0, 2, 30), 1)).unwrap();
        manager.write(&metric("B", at(0, 4, 0), 2)).unwrap();
        manager.write(&metric("B", at(0, 2, 0), 3)).unwrap();

        let read = manager.read("B", &Interval::new(at(0, 0, 0), at(1, 0, 0)).unwrap());
        assert_eq!(read.covered, Interval::new(at(0, 2, 0), at(0, 5, 0)).unwrap());
        assert_eq!(collect(&read), vec![1, 3, 2]);

        let missing = manager.read("other", &Interval::new(at(0, 0, 0), at(1, 0, 0)).unwrap());
        assert!(missing.is_empty());
        assert_eq!(missing.covered, Interval::empty_at(at(1, 0, 0)));

        let outside = manager.read("B", &Interval::new(at(0, 5, 0), at(1, 0, 0)).unwrap());
        assert!(outside.is_empty());
        assert_eq!(outside.covered, Interval::empty_at(at(1, 0, 0)));
    }

    #[test]
    fn test_clear_is_exclusive() {
        let manager = BucketManager::new(5);
        for m in 0..5 {
            manager.write(&metric("A", at(0, m, 0), i64::from(m))).unwrap();
            manager.write(&metric("B", at(0, m, 0), i64::from(m))).unwrap();
        }
        assert_eq!(manager.clear(at(0, 3, 0)), 6);
        let read = manager.read("A", &Interval::new(at(0, 0, 0), at(1, 0, 0)).unwrap());
        assert_eq!(collect(&read), vec![3, 4]);
        assert_eq!(
            manager.data_interval_per_bucket()["B"],
            Some(Interval::new(at(0, 3, 0), at(0, 5, 0)).unwrap())
        );
        assert_eq!(manager.object_count_per_bucket()["B"], 2);
        assert_eq!(manager.created_buckets(), 2);
    }

    #[test]
    fn test_eviction_bound_keeps_data() {
        let manager = BucketManager::new(3);
        for m in 1..=5 {
            manager.write(&metric("B", at(0, m, 0), i64::from(m))).unwrap();
        }
        let bucket = manager.get("B").unwrap();
        let states: Vec<bool> = bucket
            .range(&Interval::new(at(0, 0, 0), at(1, 0, 0)).unwrap())
            .iter()
            .map(|(_, minute)| minute.is_compressed())
            .collect();
        assert_eq!(states, vec![true, true, false, false, false]);

        let read = manager.read("B", &Interval::new(at(0, 0, 0), at(1, 0, 0)).unwrap());
        assert_eq!(collect(&read), vec![1, 2, 3, 4, 5]);

        // Writing into a compressed minute expands it and evicts the oldest
        manager.write(&metric("B", at(0, 1, 0), 6)).unwrap();
        let read = manager.read("B", &Interval::new(at(0, 1, 0), at(0, 2, 0)).unwrap());
        assert_eq!(collect(&read), vec![1, 6]);
        assert!(bucket.range(&Interval::new(at(0, 3, 0), at(0, 4, 0)).unwrap())[0].1.is_compressed());
        assert_eq!(bucket.object_count(), 6);
    }
}
