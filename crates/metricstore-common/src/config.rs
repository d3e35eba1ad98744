//! Configuration types for Metricstore
//!
//! This module defines configuration structures used across components.
//! A configuration is read from an optional TOML file and then overridden by
//! `METRICSTORE__<SECTION>__<KEY>` environment variables.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Root configuration for Metricstore
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filesystem storage configuration
    pub storage: StorageConfig,
    /// Timestamp extraction configuration
    pub timestamp: TimestampConfig,
    /// Command queue configuration
    pub queue: QueueConfig,
    /// Cache configuration
    pub cache: CacheConfig,
    /// Maintenance task configuration
    pub tasks: TasksConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix("METRICSTORE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config.validate())
    }

    /// Raise settings below their minimum to the minimum
    #[must_use]
    pub fn validate(mut self) -> Self {
        self.storage.max_cached_writers =
            at_least("storage.max_cached_writers", self.storage.max_cached_writers, 1);
        self.storage.read_buffer_size =
            at_least("storage.read_buffer_size", self.storage.read_buffer_size, 1);
        self.queue.capacity = at_least("queue.capacity", self.queue.capacity, 1);
        self.cache.max_expanded_buckets = at_least(
            "cache.max_expanded_buckets",
            self.cache.max_expanded_buckets,
            1,
        );
        self
    }
}

fn at_least(name: &str, value: usize, minimum: usize) -> usize {
    if value < minimum {
        warn!("{} = {} is below minimum, using {}", name, value, minimum);
        minimum
    } else {
        value
    }
}

/// Filesystem storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding one directory per bucket
    pub base_path: PathBuf,
    /// Open segment writers kept per bucket
    pub max_cached_writers: usize,
    /// Capacity of the hand-off buffer between the worker and a reader
    pub read_buffer_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./metricstore-data"),
            max_cached_writers: 5,
            read_buffer_size: 100_000,
        }
    }
}

/// Timestamp extraction configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampConfig {
    /// Dot path of the timestamp field
    pub field: String,
    /// chrono format string, ISO-8601 when absent
    pub format: Option<String>,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            field: crate::timestamp::DEFAULT_TIMESTAMP_FIELD.to_string(),
            format: None,
        }
    }
}

/// Queue implementation feeding the storage worker
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// Bounded blocking channel
    #[default]
    Blocking,
    /// Lock-free ring buffer
    Ring,
}

/// How the ring buffer worker waits for new commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategyKind {
    /// Park on a condition variable until a producer signals
    #[default]
    Blocking,
    /// Spin without yielding
    BusySpin,
    /// Spin, then yield the thread
    Yielding,
    /// Spin, yield, then sleep in short naps
    Sleeping,
    /// Spin and yield for bounded times, then fall back
    PhasedBackoff,
    /// Park with a timeout
    TimeoutBlocking,
}

/// Command queue configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Queue capacity (ring buffers round up to a power of two)
    pub capacity: usize,
    pub wait_strategy: WaitStrategyKind,
    /// Retries before sleeping (sleeping strategy)
    pub sleeping_retries: u32,
    /// Spin phase length (phased back-off)
    pub spin_timeout_ms: u64,
    /// Yield phase length (phased back-off)
    pub yield_timeout_ms: u64,
    /// Strategy used once the phased back-off phases are exhausted
    pub fallback: WaitStrategyKind,
    /// Park timeout (timeout blocking)
    pub timeout_ms: u64,
}

impl QueueConfig {
    pub const fn spin_timeout(&self) -> Duration {
        Duration::from_millis(self.spin_timeout_ms)
    }

    pub const fn yield_timeout(&self) -> Duration {
        Duration::from_millis(self.yield_timeout_ms)
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Blocking,
            capacity: 1 << 14,
            wait_strategy: WaitStrategyKind::Blocking,
            sleeping_retries: 200,
            spin_timeout_ms: 1,
            yield_timeout_ms: 10,
            fallback: WaitStrategyKind::Blocking,
            timeout_ms: 10,
        }
    }
}

/// Cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve reads through the in-memory cache
    pub enabled: bool,
    /// Length of the rolling cache window
    pub period_secs: u64,
    /// Pause between cache cleanups
    pub cleanup_period_secs: u64,
    /// Minute entries per bucket kept expanded
    pub max_expanded_buckets: usize,
}

impl CacheConfig {
    pub const fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub const fn cleanup_period(&self) -> Duration {
        Duration::from_secs(self.cleanup_period_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_secs: 28 * 60 * 60,
            cleanup_period_secs: 60,
            max_expanded_buckets: 5,
        }
    }
}

/// Maintenance task configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Days before today that stay expanded
    pub max_uncompressed_days: u32,
    /// Days before today that are retained
    pub days_to_keep: u32,
    pub compress_interval_secs: u64,
    pub delete_interval_secs: u64,
}

impl TasksConfig {
    pub const fn compress_interval(&self) -> Duration {
        Duration::from_secs(self.compress_interval_secs)
    }

    pub const fn delete_interval(&self) -> Duration {
        Duration::from_secs(self.delete_interval_secs)
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            max_uncompressed_days: 2,
            days_to_keep: 365,
            compress_interval_secs: 24 * 60 * 60,
            delete_interval_secs: 24 * 60 * 60,
        }
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.max_cached_writers, 5);
        assert_eq!(config.storage.read_buffer_size, 100_000);
        assert_eq!(config.queue.capacity, 16_384);
        assert_eq!(config.cache.period(), Duration::from_secs(28 * 3600));
        assert_eq!(config.cache.max_expanded_buckets, 5);
        assert_eq!(config.tasks.max_uncompressed_days, 2);
        assert_eq!(config.tasks.days_to_keep, 365);
        assert_eq!(config.timestamp.field, "timestamp");
    }

    #[test]
    fn test_validate_clamps_minimums() {
        let mut config = Config::default();
        config.storage.max_cached_writers = 0;
        config.cache.max_expanded_buckets = 0;
        let config = config.validate();
        assert_eq!(config.storage.max_cached_writers, 1);
        assert_eq!(config.cache.max_expanded_buckets, 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metricstore.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[storage]\nbase_path = \"/tmp/metrics\"\nmax_cached_writers = 9").unwrap();
        writeln!(file, "[queue]\nbackend = \"ring\"\nwait_strategy = \"phased_backoff\"").unwrap();
        drop(file);

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.storage.base_path, PathBuf::from("/tmp/metrics"));
        assert_eq!(config.storage.max_cached_writers, 9);
        assert_eq!(config.queue.backend, QueueBackend::Ring);
        assert_eq!(config.queue.wait_strategy, WaitStrategyKind::PhasedBackoff);
        assert_eq!(config.cache.max_expanded_buckets, 5);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.storage.read_buffer_size, 100_000);
    }
}
