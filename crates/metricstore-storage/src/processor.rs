//! Command processor owning all filesystem buckets
//!
//! The processor lives on the storage worker thread. It owns the map of
//! [`FilesystemBucket`]s and is therefore the only code that touches the data
//! directory. A failing command is logged, counted and answered with its
//! error; the worker keeps going. A panic inside a command, such as one raised
//! by a read sink, is contained the same way.

use crate::bucket::{BucketData, FilesystemBucket, ReadStatus};
use crate::command::{Command, CommandKind, ReadSink};
use metricstore_common::config::StorageConfig;
use metricstore_common::{Bucket, Document, Error, Interval, Result, StoredMetric, TimestampFunction};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Counters maintained by the processor
#[derive(Debug, Default)]
pub struct ProcessorStats {
    pub total: AtomicU64,
    pub list_buckets: AtomicU64,
    pub writes: AtomicU64,
    pub reads: AtomicU64,
    pub compressions: AtomicU64,
    pub deletions: AtomicU64,
    pub failed: AtomicU64,
    /// Records skipped while reading
    pub ignored_records: AtomicU64,
    /// Description of the command being executed, if any
    running: Mutex<Option<String>>,
}

impl ProcessorStats {
    fn counter(&self, kind: CommandKind) -> &AtomicU64 {
        match kind {
            CommandKind::ListBuckets => &self.list_buckets,
            CommandKind::Write => &self.writes,
            CommandKind::Read => &self.reads,
            CommandKind::Compress => &self.compressions,
            CommandKind::Delete => &self.deletions,
        }
    }

    /// Number of processed commands of one kind
    pub fn processed(&self, kind: CommandKind) -> u64 {
        self.counter(kind).load(Ordering::Relaxed)
    }

    pub fn running_command(&self) -> Option<String> {
        self.running.lock().clone()
    }
}

/// Executes commands against the buckets below one base directory
pub struct BucketCommandProcessor {
    base_path: PathBuf,
    timestamps: Arc<TimestampFunction>,
    max_cached_writers: usize,
    buckets: HashMap<String, FilesystemBucket>,
    stats: Arc<ProcessorStats>,
}

impl BucketCommandProcessor {
    pub fn new(config: &StorageConfig, timestamps: TimestampFunction) -> Self {
        Self {
            base_path: config.base_path.clone(),
            timestamps: Arc::new(timestamps),
            max_cached_writers: config.max_cached_writers,
            buckets: HashMap::new(),
            stats: Arc::new(ProcessorStats::default()),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn stats(&self) -> Arc<ProcessorStats> {
        Arc::clone(&self.stats)
    }

    /// Create the base directory and load the buckets found in it
    pub fn init(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.base_path).map_err(|e| {
            Error::storage(format!(
                "failed to create base dir {}: {}",
                self.base_path.display(),
                e
            ))
        })?;
        for entry in std::fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            match BucketData::load(&path) {
                Ok(data) => {
                    debug!("Loaded bucket {}", data.bucket());
                    let name = data.bucket().name.clone();
                    let bucket = FilesystemBucket::new(
                        data,
                        Arc::clone(&self.timestamps),
                        self.max_cached_writers,
                    );
                    self.buckets.insert(name, bucket);
                }
                Err(e) => warn!("Skipping unreadable bucket dir {:?}: {}", path, e),
            }
        }
        info!(
            "Loaded {} buckets from {:?}",
            self.buckets.len(),
            self.base_path
        );
        Ok(())
    }

    /// Execute one command and complete it
    pub fn run_command(&mut self, command: Command) {
        let kind = command.kind();
        self.stats.total.fetch_add(1, Ordering::Relaxed);
        self.stats.counter(kind).fetch_add(1, Ordering::Relaxed);
        let description = command.to_string();
        *self.stats.running.lock() = Some(description.clone());

        // Replies of a command that panicked are dropped, failing its handle
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(kind, command))) {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            error!("Command {} panicked: {}", description, panic_message(&*panic));
        }

        *self.stats.running.lock() = None;
    }

    fn dispatch(&mut self, kind: CommandKind, command: Command) {
        match command {
            Command::ListBuckets { reply } => {
                let _ = reply.send(Ok(self.list_buckets()));
            }
            Command::Write {
                bucket,
                bucket_type,
                document,
                reply,
            } => {
                let result = self.write(&bucket, bucket_type.as_deref(), document);
                let _ = reply.send(self.observe(kind, &bucket, result));
            }
            Command::Read {
                bucket,
                interval,
                mut sink,
            } => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    self.read(&bucket, &interval, &mut *sink)
                }))
                .unwrap_or_else(|panic| {
                    Err(Error::internal(format!(
                        "read sink panicked: {}",
                        panic_message(&*panic)
                    )))
                });
                if let Ok(status) = &result {
                    self.stats
                        .ignored_records
                        .fetch_add(status.ignored, Ordering::Relaxed);
                }
                sink.complete(self.observe(kind, &bucket, result));
            }
            Command::Compress {
                bucket,
                until,
                reply,
            } => {
                let result = self
                    .buckets
                    .get_mut(&bucket)
                    .map_or(Ok(0), |b| b.compress_all(until));
                let _ = reply.send(self.observe(kind, &bucket, result));
            }
            Command::Delete {
                bucket,
                until,
                reply,
            } => {
                let result = self
                    .buckets
                    .get_mut(&bucket)
                    .map_or(Ok(0), |b| b.delete_all(until));
                let _ = reply.send(self.observe(kind, &bucket, result));
            }
        }
    }

    fn read(&mut self, bucket: &str, interval: &Interval, sink: &mut dyn ReadSink) -> Result<ReadStatus> {
        match self.buckets.get_mut(bucket) {
            Some(b) => b.read(interval, &mut |metric| sink.accept(metric)),
            None => Ok(ReadStatus::default()),
        }
    }

    fn observe<T>(&self, kind: CommandKind, bucket: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            error!("Command {} on bucket {} failed: {}", kind.as_str(), bucket, e);
        }
        result
    }

    fn list_buckets(&self) -> Vec<Bucket> {
        let mut buckets: Vec<Bucket> = self.buckets.values().map(|b| b.bucket().clone()).collect();
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        buckets
    }

    fn write(&mut self, name: &str, bucket_type: Option<&str>, document: Document) -> Result<StoredMetric> {
        if !self.buckets.contains_key(name) {
            let data = BucketData::create(&self.base_path, name, bucket_type)?;
            let bucket = FilesystemBucket::new(
                data,
                Arc::clone(&self.timestamps),
                self.max_cached_writers,
            );
            self.buckets.insert(name.to_string(), bucket);
        }
        let bucket = self
            .buckets
            .get_mut(name)
            .ok_or_else(|| Error::internal(format!("bucket {name} vanished")))?;
        if bucket_type.is_some() && bucket.bucket().bucket_type.as_deref() != bucket_type {
            debug!(
                "Ignoring type {:?} for existing bucket {}",
                bucket_type,
                bucket.bucket()
            );
        }
        bucket.write(document)
    }

    /// Close every bucket's writers
    pub fn close(&mut self) {
        for bucket in self.buckets.values_mut() {
            bucket.close();
        }
        info!("Closed {} buckets", self.buckets.len());
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use metricstore_common::Interval;
    use serde_json::json;
    use tempfile::tempdir;

    fn processor(base: &Path) -> BucketCommandProcessor {
        let config = StorageConfig {
            base_path: base.to_path_buf(),
            ..StorageConfig::default()
        };
        let mut processor = BucketCommandProcessor::new(&config, TimestampFunction::default());
        processor.init().unwrap();
        processor
    }

    fn doc(ts: &str) -> Document {
        json!({"timestamp": ts}).as_object().cloned().unwrap()
    }

    #[test]
    fn test_write_creates_bucket_lazily() {
        let dir = tempdir().unwrap();
        let mut processor = processor(dir.path());

        let (command, handle) = Command::write("B", Some("T".to_string()), doc("2015-01-01T00:00:00Z"));
        processor.run_command(command);
        let stored = handle.wait().unwrap();
        assert_eq!(stored.bucket, Bucket::typed("B", "T"));
        assert!(dir.path().join("B/T.type").is_file());

        let (command, handle) = Command::list_buckets();
        processor.run_command(command);
        assert_eq!(handle.wait().unwrap(), vec![Bucket::typed("B", "T")]);
        assert_eq!(processor.stats().processed(CommandKind::Write), 1);
        assert_eq!(processor.stats().total.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_init_loads_existing_buckets() {
        let dir = tempdir().unwrap();
        {
            let mut processor = processor(dir.path());
            let (command, handle) = Command::write("cpu", Some("gauge".to_string()), doc("2015-01-01T00:00:00Z"));
            processor.run_command(command);
            handle.wait().unwrap();
            processor.close();
        }
        std::fs::write(dir.path().join("stray-file"), b"").unwrap();

        let mut processor = processor(dir.path());
        let (command, handle) = Command::list_buckets();
        processor.run_command(command);
        assert_eq!(handle.wait().unwrap(), vec![Bucket::typed("cpu", "gauge")]);
    }

    #[test]
    fn test_failures_are_counted_and_reported() {
        let dir = tempdir().unwrap();
        let mut processor = processor(dir.path());
        let document = json!({"no": "timestamp"}).as_object().cloned().unwrap();
        let (command, handle) = Command::write("B", None, document);
        processor.run_command(command);
        assert!(handle.wait().is_err());
        assert_eq!(processor.stats().failed.load(Ordering::Relaxed), 1);
        assert!(processor.stats().running_command().is_none());
    }

    #[test]
    fn test_unknown_bucket_is_noop() {
        let dir = tempdir().unwrap();
        let mut processor = processor(dir.path());
        let until = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();

        let (command, handle) = Command::compress("missing", until);
        processor.run_command(command);
        assert_eq!(handle.wait().unwrap(), 0);

        let (command, handle) = Command::delete("missing", until);
        processor.run_command(command);
        assert_eq!(handle.wait().unwrap(), 0);

        let interval = Interval::new(
            Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2015, 1, 2, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let (command, handle) = Command::read_with("missing", interval, |_| true);
        processor.run_command(command);
        assert_eq!(handle.wait().unwrap().delivered, 0);
    }

    #[test]
    fn test_panicking_sink_keeps_processor_serving() {
        let dir = tempdir().unwrap();
        let mut processor = processor(dir.path());
        let (command, handle) = Command::write("B", None, doc("2015-01-01T00:00:00Z"));
        processor.run_command(command);
        handle.wait().unwrap();

        let interval = Interval::new(
            Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2015, 1, 2, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let (command, handle) = Command::read_with("B", interval, |_| panic!("sink failed"));
        processor.run_command(command);
        assert!(matches!(handle.wait(), Err(Error::Internal(_))));
        assert_eq!(processor.stats().failed.load(Ordering::Relaxed), 1);
        assert!(processor.stats().running_command().is_none());

        let (command, handle) = Command::write("B", None, doc("2015-01-01T00:01:00Z"));
        processor.run_command(command);
        handle.wait().unwrap();
        let (command, handle) = Command::read_with("B", interval, |_| true);
        processor.run_command(command);
        assert_eq!(handle.wait().unwrap().delivered, 2);
    }

    #[test]
    fn test_later_type_is_ignored() {
        let dir = tempdir().unwrap();
        let mut processor = processor(dir.path());
        let (command, handle) = Command::write("B", Some("T".to_string()), doc("2015-01-01T00:00:00Z"));
        processor.run_command(command);
        handle.wait().unwrap();

        let (command, handle) = Command::write("B", Some("other".to_string()), doc("2015-01-01T00:01:00Z"));
        processor.run_command(command);
        assert_eq!(handle.wait().unwrap().bucket, Bucket::typed("B", "T"));
    }
}
