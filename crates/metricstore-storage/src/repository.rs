//! Repository facade over the storage worker
//!
//! [`FilesystemMetricRepository`] turns synchronous API calls into commands,
//! submits them to the configured [`CommandQueue`] and blocks on their
//! completion. Reads are split at day boundaries so that one read command
//! never keeps the worker busy for more than a calendar day of data; each
//! day is streamed through its own bounded [`ReadBuffer`].

use crate::command::{Command, CommandHandle};
use crate::processor::{BucketCommandProcessor, ProcessorStats};
use crate::queue::{CommandQueue, start_queue};
use crate::read_buffer::{BufferSink, CloseOnDrop, ReadBuffer};
use chrono::NaiveDate;
use metricstore_common::config::{QueueConfig, StorageConfig};
use metricstore_common::{
    Bucket, Config, Document, Error, Interval, Result, StoredMetric, TimestampFunction, split_by_day,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Access to stored metrics
pub trait MetricRepository: Send + Sync {
    fn list_buckets(&self) -> Result<Vec<Bucket>>;

    /// Store a document, creating the bucket on first use
    fn write(&self, bucket: &str, bucket_type: Option<&str>, document: Document) -> Result<StoredMetric>;

    /// Stream the metrics of `interval` into `callback` in timestamp order
    fn read(
        &self,
        bucket: &str,
        interval: &Interval,
        callback: &mut dyn FnMut(StoredMetric),
    ) -> Result<()>;
}

impl<T: MetricRepository + ?Sized> MetricRepository for Arc<T> {
    fn list_buckets(&self) -> Result<Vec<Bucket>> {
        (**self).list_buckets()
    }

    fn write(&self, bucket: &str, bucket_type: Option<&str>, document: Document) -> Result<StoredMetric> {
        (**self).write(bucket, bucket_type, document)
    }

    fn read(
        &self,
        bucket: &str,
        interval: &Interval,
        callback: &mut dyn FnMut(StoredMetric),
    ) -> Result<()> {
        (**self).read(bucket, interval, callback)
    }
}

#[derive(Debug, Default)]
pub struct RepositoryStats {
    pub submitted: AtomicU64,
    pub rejected: AtomicU64,
}

/// Repository persisting to a directory tree through one worker thread
pub struct FilesystemMetricRepository {
    base_path: PathBuf,
    queue: Box<dyn CommandQueue>,
    read_buffer_size: usize,
    stats: RepositoryStats,
    processor_stats: Arc<ProcessorStats>,
}

impl FilesystemMetricRepository {
    /// Open the repository described by `config`
    pub fn open(config: &Config) -> Result<Self> {
        let timestamps = TimestampFunction::from_config(&config.timestamp)?;
        Self::start(&config.storage, &config.queue, timestamps)
    }

    /// Start the worker for `storage` using `queue` and the given timestamp function
    pub fn start(
        storage: &StorageConfig,
        queue: &QueueConfig,
        timestamps: TimestampFunction,
    ) -> Result<Self> {
        let processor = BucketCommandProcessor::new(storage, timestamps);
        let processor_stats = processor.stats();
        let command_queue = start_queue(queue, processor)?;
        info!(
            "Opened metric repository at {:?} ({:?} queue)",
            storage.base_path, queue.backend
        );
        Ok(Self {
            base_path: storage.base_path.clone(),
            queue: command_queue,
            read_buffer_size: storage.read_buffer_size.max(1),
            stats: RepositoryStats::default(),
            processor_stats,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub const fn stats(&self) -> &RepositoryStats {
        &self.stats
    }

    pub fn processor_stats(&self) -> &ProcessorStats {
        &self.processor_stats
    }

    /// Commands waiting for the worker
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Hand a command to the worker; rejected once the repository is closed
    pub fn submit(&self, command: Command) -> Result<()> {
        if self.queue.apply(command) {
            self.stats.submitted.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            Err(Error::QueueClosed)
        }
    }

    /// Compact all days of `bucket` before `until` without waiting
    pub fn compress(&self, bucket: &str, until: NaiveDate) -> Result<CommandHandle<usize>> {
        let (command, handle) = Command::compress(bucket, until);
        self.submit(command)?;
        Ok(handle)
    }

    /// Delete all days of `bucket` before `until` without waiting
    pub fn delete(&self, bucket: &str, until: NaiveDate) -> Result<CommandHandle<usize>> {
        let (command, handle) = Command::delete(bucket, until);
        self.submit(command)?;
        Ok(handle)
    }

    fn read_day(
        &self,
        bucket: &str,
        day: Interval,
        callback: &mut dyn FnMut(StoredMetric),
    ) -> Result<()> {
        let buffer = Arc::new(ReadBuffer::new(self.read_buffer_size));
        let sink = BufferSink::new(Arc::clone(&buffer));
        self.submit(Command::read(bucket, day, Box::new(sink)))?;

        // Stops the worker's read if the callback unwinds
        let _guard = CloseOnDrop(&buffer);
        while let Some(metric) = buffer.next() {
            callback(metric);
        }
        match buffer.take_result() {
            Some(Err(e)) => Err(e),
            _ => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Reject new commands, finish queued ones and stop the worker
    pub fn close(&self) {
        if !self.queue.is_closed() {
            self.queue.close();
            info!("Closed metric repository at {:?}", self.base_path);
        }
    }
}

impl MetricRepository for FilesystemMetricRepository {
    fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let (command, handle) = Command::list_buckets();
        self.submit(command)?;
        handle.wait()
    }

    fn write(&self, bucket: &str, bucket_type: Option<&str>, document: Document) -> Result<StoredMetric> {
        let (command, handle) = Command::write(bucket, bucket_type.map(str::to_string), document);
        self.submit(command)?;
        handle.wait()
    }

    fn read(
        &self,
        bucket: &str,
        interval: &Interval,
        callback: &mut dyn FnMut(StoredMetric),
    ) -> Result<()> {
        let days = split_by_day(interval);
        debug!("Reading {} from bucket {} in {} parts", interval, bucket, days.len());
        for day in days {
            self.read_day(bucket, day, callback)?;
        }
        Ok(())
    }
}

impl Drop for FilesystemMetricRepository {
    fn drop(&mut self) {
        self.close();
    }
}
