//! Background bootstrap and cleanup of the cache window

use crate::cache::BucketMetricCache;
use metricstore_common::{Interval, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

struct WorkerState {
    running: AtomicBool,
    last_cleanup: Mutex<Option<Interval>>,
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

/// Loads the cache window on start, then drops expired minutes every
/// `cleanup_period` until shut down
pub struct CachePeriodWorker {
    cache: Arc<BucketMetricCache>,
    cleanup_period: Duration,
    state: Arc<WorkerState>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CachePeriodWorker {
    pub fn new(cache: Arc<BucketMetricCache>, cleanup_period: Duration) -> Self {
        Self {
            cache,
            cleanup_period,
            state: Arc::new(WorkerState {
                running: AtomicBool::new(false),
                last_cleanup: Mutex::new(None),
                stopped: Mutex::new(false),
                wakeup: Condvar::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the worker thread
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        let cache = Arc::clone(&self.cache);
        let state = Arc::clone(&self.state);
        let cleanup_period = self.cleanup_period;
        *handle = Some(
            thread::Builder::new()
                .name("metricstore-cache".to_string())
                .spawn(move || run(&cache, &state, cleanup_period))?,
        );
        Ok(())
    }

    /// Drop all cached minutes before the start of `interval`
    pub fn cleanup(&self, interval: Interval) -> usize {
        cleanup(&self.cache, &self.state, interval)
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Relaxed)
    }

    /// Window used by the most recent cleanup
    pub fn last_cleanup(&self) -> Option<Interval> {
        *self.state.last_cleanup.lock()
    }

    pub const fn cleanup_period(&self) -> Duration {
        self.cleanup_period
    }

    /// Interrupt the sleep and join the worker thread
    pub fn shutdown(&self) {
        {
            *self.state.stopped.lock() = true;
            self.state.wakeup.notify_all();
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("Cache period worker panicked");
            }
        }
    }
}

impl Drop for CachePeriodWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(cache: &BucketMetricCache, state: &WorkerState, cleanup_period: Duration) {
    state.running.store(true, Ordering::Relaxed);
    if let Err(e) = cache.init(&cache.window().current()) {
        warn!("Cache starts partially loaded after failed bootstrap: {}", e);
    }
    loop {
        let next = Instant::now() + cleanup_period;
        cleanup(cache, state, cache.window().current());
        let mut stopped = state.stopped.lock();
        while !*stopped && Instant::now() < next {
            state.wakeup.wait_until(&mut stopped, next);
        }
        if *stopped {
            break;
        }
    }
    state.running.store(false, Ordering::Relaxed);
    info!("Cache period worker stopped");
}

fn cleanup(cache: &BucketMetricCache, state: &WorkerState, interval: Interval) -> usize {
    *state.last_cleanup.lock() = Some(interval);
    let removed = cache.buckets().clear(interval.start());
    debug!("Cache cleanup before {} removed {} minutes", interval.start(), removed);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket_manager::BucketManager;
    use crate::window::{CacheWindow, Clock};
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use metricstore_common::{Bucket, Document, Error, StoredMetric};
    use metricstore_storage::{MetricRepository, NonPersistentMetricRepository};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 1, 2, 12, 0, 0).unwrap()
    }

    fn cache() -> Arc<BucketMetricCache> {
        let clock: Arc<dyn Clock> = Arc::new(now);
        Arc::new(BucketMetricCache::new(
            Arc::new(NonPersistentMetricRepository::default()),
            Arc::new(BucketManager::new(5)),
            CacheWindow::new(Duration::from_secs(3600), clock),
        ))
    }

    #[test]
    fn test_worker_inits_and_stops() {
        let cache = cache();
        let worker = CachePeriodWorker::new(Arc::clone(&cache), Duration::from_secs(3600));
        worker.start().unwrap();
        cache.await_init();
        worker.shutdown();
        assert!(!worker.is_running());
        assert_eq!(worker.last_cleanup(), Some(cache.window().current()));
    }

    struct UnavailableRepository;

    impl MetricRepository for UnavailableRepository {
        fn list_buckets(&self) -> Result<Vec<Bucket>> {
            Err(Error::storage("repository unavailable"))
        }

        fn write(&self, _: &str, _: Option<&str>, _: Document) -> Result<StoredMetric> {
            Err(Error::storage("repository unavailable"))
        }

        fn read(&self, _: &str, _: &Interval, _: &mut dyn FnMut(StoredMetric)) -> Result<()> {
            Err(Error::storage("repository unavailable"))
        }
    }

    #[test]
    fn test_worker_survives_failed_bootstrap() {
        let clock: Arc<dyn Clock> = Arc::new(now);
        let cache = Arc::new(BucketMetricCache::new(
            Arc::new(UnavailableRepository),
            Arc::new(BucketManager::new(5)),
            CacheWindow::new(Duration::from_secs(3600), clock),
        ));
        let worker = CachePeriodWorker::new(Arc::clone(&cache), Duration::from_secs(3600));
        worker.start().unwrap();
        cache.await_init();
        assert!(cache.is_initialized());
        worker.shutdown();
        assert_eq!(worker.last_cleanup(), Some(cache.window().current()));
    }

    #[test]
    fn test_cleanup_drops_expired_minutes() {
        let cache = cache();
        let bucket = Bucket::new("B", None);
        for minutes in [90, 30] {
            let metric = StoredMetric::new(
                bucket.clone(),
                now() - TimeDelta::minutes(minutes),
                Document::new(),
            );
            cache.buckets().write(&metric).unwrap();
        }
        let worker = CachePeriodWorker::new(Arc::clone(&cache), Duration::from_secs(60));
        assert_eq!(worker.cleanup(cache.window().current()), 1);
        assert_eq!(cache.buckets().object_count_per_bucket()["B"], 1);
    }
}
