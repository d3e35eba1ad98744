//! Command queues feeding the storage worker
//!
//! Both backends run exactly one worker thread that owns a
//! [`BucketCommandProcessor`]. A queue is open until [`CommandQueue::close`];
//! afterwards `apply` rejects commands, and commands accepted before the close
//! are still executed before the worker exits.

mod blocking;
mod ring;
mod wait;

pub use blocking::BlockingCommandQueue;
pub use ring::RingCommandQueue;
pub use wait::WaitStrategy;

use crate::command::Command;
use crate::processor::BucketCommandProcessor;
use metricstore_common::Result;
use metricstore_common::config::{QueueBackend, QueueConfig};

/// Name of the storage worker thread
pub const WORKER_THREAD_NAME: &str = "metricstore-worker";

/// Submission side of a command queue
pub trait CommandQueue: Send + Sync {
    /// Enqueue a command, blocking while the queue is full
    ///
    /// Returns `false` once the queue is closed; the command is dropped, which
    /// completes its handle with an error.
    fn apply(&self, command: Command) -> bool;

    /// Stop accepting commands, drain the queue and join the worker
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Commands waiting to be executed
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Start the configured queue backend around `processor`
pub fn start_queue(
    config: &QueueConfig,
    processor: BucketCommandProcessor,
) -> Result<Box<dyn CommandQueue>> {
    Ok(match config.backend {
        QueueBackend::Blocking => Box::new(BlockingCommandQueue::start(processor, config.capacity)?),
        QueueBackend::Ring => Box::new(RingCommandQueue::start(
            processor,
            config.capacity,
            WaitStrategy::from_config(config),
        )?),
    })
}
