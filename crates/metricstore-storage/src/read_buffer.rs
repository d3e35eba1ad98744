//! Bounded hand-off buffer between the worker and a reading caller
//!
//! The worker pushes records through a [`BufferSink`] and blocks while the
//! buffer is full; the caller drains it with [`ReadBuffer::next`] and blocks
//! while it is empty. Closing from either side unblocks the other: a closed
//! buffer rejects further pushes, which stops the read on the worker.

use crate::bucket::ReadStatus;
use crate::command::ReadSink;
use metricstore_common::{Result, StoredMetric};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

struct State {
    items: VecDeque<StoredMetric>,
    closed: bool,
    result: Option<Result<ReadStatus>>,
}

pub struct ReadBuffer {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl ReadBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
                result: None,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, waiting for room; `false` once the buffer is closed
    pub fn push(&self, metric: StoredMetric) -> bool {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return false;
        }
        state.items.push_back(metric);
        self.not_empty.notify_one();
        true
    }

    /// Next record, waiting for one; `None` once closed and drained
    pub fn next(&self) -> Option<StoredMetric> {
        let mut state = self.state.lock();
        loop {
            if let Some(metric) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(metric);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Mark end of stream; buffered records can still be drained
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Record the outcome of the read and close
    pub fn finish(&self, result: Result<ReadStatus>) {
        let mut state = self.state.lock();
        state.result = Some(result);
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outcome recorded by [`finish`](Self::finish), if any
    pub fn take_result(&self) -> Option<Result<ReadStatus>> {
        self.state.lock().result.take()
    }
}

/// Worker side of a [`ReadBuffer`]
///
/// Dropping the sink without completing it (the command was discarded)
/// still closes the buffer so the caller never waits forever.
pub struct BufferSink {
    buffer: Arc<ReadBuffer>,
}

impl BufferSink {
    pub const fn new(buffer: Arc<ReadBuffer>) -> Self {
        Self { buffer }
    }
}

impl ReadSink for BufferSink {
    fn accept(&mut self, metric: StoredMetric) -> bool {
        self.buffer.push(metric)
    }

    fn complete(self: Box<Self>, result: Result<ReadStatus>) {
        self.buffer.finish(result);
    }
}

impl Drop for BufferSink {
    fn drop(&mut self) {
        self.buffer.close();
    }
}

/// Caller side guard closing the buffer when the caller stops draining
pub(crate) struct CloseOnDrop<'a>(pub(crate) &'a ReadBuffer);

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}
