//! Cache over a real filesystem repository

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use metricstore_cache::{BucketManager, BucketMetricCache, CacheWindow, CachePeriodWorker, Clock};
use metricstore_common::{Bucket, Config, Document, Interval, StoredMetric};
use metricstore_storage::{FilesystemMetricRepository, MetricRepository};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2015, 1, 2, 12, 0, 0).unwrap()
}

fn repository(base: &Path) -> Arc<FilesystemMetricRepository> {
    let mut config = Config::default();
    config.storage.base_path = base.to_path_buf();
    Arc::new(FilesystemMetricRepository::open(&config).unwrap())
}

fn cache(repository: Arc<FilesystemMetricRepository>, max_expanded: usize) -> Arc<BucketMetricCache> {
    let clock: Arc<dyn Clock> = Arc::new(now);
    Arc::new(BucketMetricCache::new(
        repository,
        Arc::new(BucketManager::new(max_expanded)),
        CacheWindow::new(Duration::from_secs(2 * 3600), clock),
    ))
}

fn doc(ts: DateTime<Utc>, a: &str) -> Document {
    json!({"timestamp": ts.to_rfc3339(), "a": a})
        .as_object()
        .cloned()
        .unwrap()
}

#[test]
fn test_bootstrap_then_read_cold_and_cached() {
    let dir = tempdir().unwrap();
    let repo = repository(dir.path());
    // Older than the window, only on disk
    repo.write("B", Some("T"), doc(now() - TimeDelta::hours(5), "old"))
        .unwrap();
    // Inside the window, loaded by the bootstrap
    repo.write("B", Some("T"), doc(now() - TimeDelta::hours(1), "boot"))
        .unwrap();

    let cache = cache(Arc::clone(&repo), 5);
    let worker = CachePeriodWorker::new(Arc::clone(&cache), Duration::from_secs(3600));
    worker.start().unwrap();
    cache.await_init();
    assert!(cache.is_initialized());

    cache
        .write("B", Some("T"), doc(now() - TimeDelta::minutes(10), "new"))
        .unwrap();
    assert_eq!(BucketMetricCache::list_buckets(&cache), vec![Bucket::typed("B", "T")]);

    let mut seen = Vec::new();
    {
        let mut request = cache.request();
        request.build(|m: &StoredMetric| seen.push(m.document["a"].as_str().unwrap().to_string()));
        let interval = Interval::new(now() - TimeDelta::hours(6), now()).unwrap();
        request.read("B", &interval).unwrap();
    }
    assert_eq!(seen, vec!["old", "boot", "new"]);

    // Cached metrics were written through
    let mut on_disk = 0;
    let interval = Interval::new(now() - TimeDelta::hours(6), now()).unwrap();
    repo.read("B", &interval, &mut |_| on_disk += 1).unwrap();
    assert_eq!(on_disk, 3);

    worker.shutdown();
}

#[test]
fn test_value_filter_scenario() {
    let dir = tempdir().unwrap();
    let cache = cache(repository(dir.path()), 5);
    cache.init(&cache.window().current()).unwrap();

    let ts = now() - TimeDelta::minutes(5);
    for a in ["a1", "a2", "a3"] {
        cache.write("B", None, doc(ts, a)).unwrap();
    }

    let mut matched = Vec::new();
    {
        let mut request = cache.request();
        request
            .builder(|m: &StoredMetric| matched.push(m.document["a"].clone()))
            .and_value_matches("a", "a[12]")
            .unwrap()
            .build();
        request
            .read("B", &Interval::new(ts, ts + TimeDelta::minutes(1)).unwrap())
            .unwrap();
    }
    assert_eq!(matched, vec![json!("a1"), json!("a2")]);
}

#[test]
fn test_eviction_bound() {
    let dir = tempdir().unwrap();
    let cache = cache(repository(dir.path()), 3);
    cache.init(&cache.window().current()).unwrap();

    let start = now() - TimeDelta::minutes(30);
    for m in 0..5 {
        cache
            .write("B", None, doc(start + TimeDelta::minutes(m), &format!("m{m}")))
            .unwrap();
    }
    let bucket = cache.buckets().get("B").unwrap();
    let interval = Interval::new(start, now()).unwrap();
    let compressed: Vec<bool> = bucket
        .range(&interval)
        .iter()
        .map(|(_, minute)| minute.is_compressed())
        .collect();
    assert_eq!(compressed, vec![true, true, false, false, false]);

    let mut values = Vec::new();
    cache
        .buckets()
        .read("B", &interval)
        .for_each(&mut |m| values.push(m.document["a"].as_str().unwrap().to_string()))
        .unwrap();
    assert_eq!(values, vec!["m0", "m1", "m2", "m3", "m4"]);
}
