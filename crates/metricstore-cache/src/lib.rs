//! Metricstore Cache - In-memory window of recent metrics
//!
//! This crate stacks a read-through/write-through cache on a
//! [`MetricRepository`](metricstore_storage::MetricRepository):
//! - Per-minute entries that toggle between a list and a gzip blob
//! - A per-bucket bound on expanded minutes
//! - A rolling cache window with periodic cleanup
//! - Filtered reads dispatching to callbacks

pub mod bucket_manager;
pub mod cache;
pub mod expanded;
pub mod filter;
pub mod minute;
pub mod window;
pub mod worker;

// Re-exports
pub use bucket_manager::{BucketManager, CachedMetricBucket, CachedRead};
pub use cache::{BucketMetricCache, CacheRequest, CacheStats};
pub use expanded::ExpandedBucketManager;
pub use filter::{FilterBuilder, FilterSet, ReadFilter, ValueFilterBuilder};
pub use minute::MinuteBucket;
pub use window::{CacheWindow, Clock, SystemClock};
pub use worker::CachePeriodWorker;
