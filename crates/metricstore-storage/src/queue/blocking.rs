//! Bounded blocking queue backend

use super::{CommandQueue, WORKER_THREAD_NAME};
use crate::command::Command;
use crate::processor::BucketCommandProcessor;
use crossbeam_channel::Sender;
use metricstore_common::Result;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::info;

/// Commands flow through a bounded channel to the worker
///
/// Closing drops the queue's sender; the worker drains the channel and exits
/// once the last in-flight `apply` has released its sender clone.
pub struct BlockingCommandQueue {
    sender: RwLock<Option<Sender<Command>>>,
    closed: AtomicBool,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl BlockingCommandQueue {
    /// Initialise the processor and start its worker thread
    pub fn start(mut processor: BucketCommandProcessor, capacity: usize) -> Result<Self> {
        processor.init()?;
        let (sender, receiver) = crossbeam_channel::bounded::<Command>(capacity.max(1));
        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                info!("Blocking command queue worker started");
                for command in receiver.iter() {
                    processor.run_command(command);
                }
                processor.close();
                info!("Blocking command queue worker stopped");
            })?;
        Ok(Self {
            sender: RwLock::new(Some(sender)),
            closed: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
        })
    }
}

impl CommandQueue for BlockingCommandQueue {
    fn apply(&self, command: Command) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let sender = self.sender.read().clone();
        match sender {
            Some(sender) => sender.send(command).is_ok(),
            None => false,
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        drop(self.sender.write().take());
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn len(&self) -> usize {
        self.sender.read().as_ref().map_or(0, Sender::len)
    }
}

impl Drop for BlockingCommandQueue {
    fn drop(&mut self) {
        self.close();
    }
}
