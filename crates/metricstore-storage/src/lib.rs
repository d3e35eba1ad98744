//! Metricstore Storage Engine - Filesystem metric buckets
//!
//! This crate implements the persistent side of Metricstore including:
//! - On-disk layout of buckets, days and minute segments
//! - Gzip NDJSON segment codec
//! - Bounded LRU of open segment writers
//! - Expand/compress/delete of bucket days
//! - Single worker command processing behind a blocking or ring buffer queue
//! - Repository facade with day-split streaming reads
//! - Scheduled compress and delete maintenance

pub mod bucket;
pub mod codec;
pub mod command;
pub mod layout;
pub mod memory;
pub mod processor;
pub mod queue;
pub mod read_buffer;
pub mod repository;
pub mod tasks;
pub mod writer_cache;

// Re-exports
pub use bucket::{BucketData, FilesystemBucket, ReadStatus};
pub use codec::{DocumentReader, DocumentWriter, SegmentWriter, StoredMetricReader};
pub use command::{Command, CommandHandle, CommandKind, ReadSink};
pub use layout::PathLayout;
pub use memory::NonPersistentMetricRepository;
pub use processor::{BucketCommandProcessor, ProcessorStats};
pub use queue::{BlockingCommandQueue, CommandQueue, RingCommandQueue, WaitStrategy, start_queue};
pub use read_buffer::{BufferSink, ReadBuffer};
pub use repository::{FilesystemMetricRepository, MetricRepository, RepositoryStats};
pub use tasks::{CompressTask, DeleteTask, MaintenanceTask, TaskScheduler, TaskStats};
pub use writer_cache::{WriterCache, WriterCacheStats};
