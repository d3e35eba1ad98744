//! Read-through, write-through cache in front of a repository
//!
//! Writes always reach the repository and are additionally cached when they
//! fall into the [`CacheWindow`]. A read answers the part of the interval the
//! cache covers from memory and streams the part before it from the
//! repository, passing both through the request's filters.

use crate::bucket_manager::BucketManager;
use crate::filter::{FilterBuilder, FilterSet};
use crate::window::CacheWindow;
use metricstore_common::{Bucket, Document, Interval, Result, StoredMetric};
use metricstore_storage::MetricRepository;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Counters of cache usage
#[derive(Debug, Default)]
pub struct CacheStats {
    pub read_requests: AtomicU64,
    pub writes: AtomicU64,
    /// Metrics served from memory
    pub read_calls: AtomicU64,
    pub list_calls: AtomicU64,
}

pub struct BucketMetricCache {
    repository: Arc<dyn MetricRepository>,
    buckets: Arc<BucketManager>,
    window: CacheWindow,
    initialized: Mutex<bool>,
    init_done: Condvar,
    stats: CacheStats,
}

impl BucketMetricCache {
    pub fn new(
        repository: Arc<dyn MetricRepository>,
        buckets: Arc<BucketManager>,
        window: CacheWindow,
    ) -> Self {
        Self {
            repository,
            buckets,
            window,
            initialized: Mutex::new(false),
            init_done: Condvar::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn buckets(&self) -> &Arc<BucketManager> {
        &self.buckets
    }

    pub const fn window(&self) -> &CacheWindow {
        &self.window
    }

    pub const fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Load `interval` of every repository bucket into the cache
    ///
    /// Waiters are released even if loading fails; the cache then starts
    /// with whatever was loaded.
    pub fn init(&self, interval: &Interval) -> Result<()> {
        info!("Starting cache init with interval {}", interval);
        let result = self.load(interval);
        match &result {
            Ok(()) => info!("Cache init with interval {} done", interval),
            Err(e) => error!("Cache init with interval {} failed: {}", interval, e),
        }
        *self.initialized.lock() = true;
        self.init_done.notify_all();
        result
    }

    fn load(&self, interval: &Interval) -> Result<()> {
        for bucket in self.repository.list_buckets()? {
            debug!("Loading bucket {} into cache", bucket);
            let mut failed = 0_u64;
            self.repository.read(&bucket.name, interval, &mut |metric| {
                if self.buckets.write(&metric).is_err() {
                    failed += 1;
                }
            })?;
            if failed > 0 {
                warn!("Could not cache {} metrics of bucket {}", failed, bucket);
            }
        }
        Ok(())
    }

    /// Block until [`init`](Self::init) has run
    pub fn await_init(&self) {
        let mut initialized = self.initialized.lock();
        while !*initialized {
            self.init_done.wait(&mut initialized);
        }
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock()
    }

    /// Start a filtered read
    pub fn request(&self) -> CacheRequest<'_> {
        self.stats.read_requests.fetch_add(1, Ordering::Relaxed);
        CacheRequest {
            cache: self,
            filters: FilterSet::new(),
        }
    }

    /// Buckets present in the cache
    pub fn list_buckets(&self) -> Vec<Bucket> {
        self.await_init();
        self.stats.list_calls.fetch_add(1, Ordering::Relaxed);
        self.buckets.list_buckets()
    }

    /// Write through to the repository, caching the metric if it is recent
    pub fn write(&self, bucket: &str, bucket_type: Option<&str>, document: Document) -> Result<StoredMetric> {
        self.await_init();
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        let metric = self.repository.write(bucket, bucket_type, document)?;
        if self.window.is_cacheable(&metric) {
            self.buckets.write(&metric)?;
        }
        Ok(metric)
    }

    /// Dispatch the metrics of `interval` to `filters`
    pub fn read(&self, bucket: &str, interval: &Interval, filters: &mut FilterSet<'_>) -> Result<()> {
        self.await_init();
        let interval = interval.truncated_to_minutes();
        let cached = self.buckets.read(bucket, &interval);
        let covered = cached.covered;
        if interval.start() != covered.start() {
            let cold = Interval::new(interval.start(), covered.start())?;
            debug!("Reading {} of bucket {} from the repository", cold, bucket);
            self.repository
                .read(bucket, &cold, &mut |metric| Self::filtered_call(&metric, filters))?;
        }
        cached.for_each(&mut |metric| {
            self.stats.read_calls.fetch_add(1, Ordering::Relaxed);
            Self::filtered_call(&metric, filters);
        })
    }

    /// Hand `metric` to every filter whose conditions hold
    pub fn filtered_call(metric: &StoredMetric, filters: &mut FilterSet<'_>) {
        filters.dispatch(metric);
    }
}

impl MetricRepository for BucketMetricCache {
    fn list_buckets(&self) -> Result<Vec<Bucket>> {
        Ok(Self::list_buckets(self))
    }

    fn write(&self, bucket: &str, bucket_type: Option<&str>, document: Document) -> Result<StoredMetric> {
        Self::write(self, bucket, bucket_type, document)
    }

    fn read(
        &self,
        bucket: &str,
        interval: &Interval,
        callback: &mut dyn FnMut(StoredMetric),
    ) -> Result<()> {
        let mut request = self.request();
        request.build(|metric: &StoredMetric| callback(metric.clone()));
        request.read(bucket, interval)
    }
}

/// Filters registered for reads from a [`BucketMetricCache`]
///
/// Filters may be added between reads; each read dispatches to all filters
/// registered so far, in registration order.
pub struct CacheRequest<'a> {
    cache: &'a BucketMetricCache,
    filters: FilterSet<'a>,
}

impl<'a> CacheRequest<'a> {
    /// Register a filter without conditions
    pub fn build(&mut self, callback: impl FnMut(&StoredMetric) + 'a) {
        self.filters.add(callback);
    }

    /// Start a filter with conditions
    pub fn builder(&mut self, callback: impl FnMut(&StoredMetric) + 'a) -> FilterBuilder<'_, 'a> {
        self.filters.builder(callback)
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    pub fn read(&mut self, bucket: &str, interval: &Interval) -> Result<()> {
        self.cache.read(bucket, interval, &mut self.filters)
    }
}
