//! Ring buffer queue backend
//!
//! Producers push into a fixed-size lock-free ring and the worker polls it,
//! idling according to its [`WaitStrategy`]. The worker only exits once the
//! queue is closed, no producer is inside `apply` and the ring is drained, so
//! an accepted command is never stranded.

use super::wait::{Signal, WaitStrategy, Waiter};
use super::{CommandQueue, WORKER_THREAD_NAME};
use crate::command::Command;
use crate::processor::BucketCommandProcessor;
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::Backoff;
use metricstore_common::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use tracing::info;

struct Shared {
    ring: ArrayQueue<Command>,
    closed: AtomicBool,
    /// Producers currently inside `apply`
    publishers: AtomicUsize,
    signal: Signal,
    needs_signal: bool,
}

impl Shared {
    fn drained(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
            && self.publishers.load(Ordering::SeqCst) == 0
            && self.ring.is_empty()
    }

    fn notify(&self) {
        if self.needs_signal {
            self.signal.notify();
        }
    }
}

pub struct RingCommandQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl RingCommandQueue {
    /// Initialise the processor and start polling a ring of at least
    /// `capacity` slots, rounded up to a power of two
    pub fn start(
        mut processor: BucketCommandProcessor,
        capacity: usize,
        strategy: WaitStrategy,
    ) -> Result<Self> {
        processor.init()?;
        let capacity = capacity.max(1).next_power_of_two();
        let shared = Arc::new(Shared {
            ring: ArrayQueue::new(capacity),
            closed: AtomicBool::new(false),
            publishers: AtomicUsize::new(0),
            signal: Signal::default(),
            needs_signal: strategy.needs_signal(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                info!(
                    "Ring command queue worker started (capacity {}, {:?})",
                    capacity, strategy
                );
                let shared = worker_shared;
                let mut waiter = Waiter::new(strategy);
                loop {
                    if let Some(command) = shared.ring.pop() {
                        waiter.reset();
                        processor.run_command(command);
                        continue;
                    }
                    if shared.drained() {
                        break;
                    }
                    waiter.wait(&shared.signal, || {
                        !shared.ring.is_empty() || shared.closed.load(Ordering::SeqCst)
                    });
                }
                processor.close();
                info!("Ring command queue worker stopped");
            })?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }
}

impl CommandQueue for RingCommandQueue {
    fn apply(&self, command: Command) -> bool {
        let shared = &self.shared;
        shared.publishers.fetch_add(1, Ordering::SeqCst);
        if shared.closed.load(Ordering::SeqCst) {
            shared.publishers.fetch_sub(1, Ordering::SeqCst);
            return false;
        }

        let backoff = Backoff::new();
        let mut command = command;
        while let Err(rejected) = shared.ring.push(command) {
            command = rejected;
            // Full: make sure a parked worker is draining
            shared.notify();
            backoff.snooze();
        }

        shared.publishers.fetch_sub(1, Ordering::SeqCst);
        shared.notify();
        true
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn len(&self) -> usize {
        self.shared.ring.len()
    }
}

impl Drop for RingCommandQueue {
    fn drop(&mut self) {
        self.close();
    }
}
