//! Commands executed by the storage worker
//!
//! Every mutation and read of the filesystem store is expressed as a
//! [`Command`] and executed by the single worker thread. Commands carry their
//! own reply channel; the submitting thread keeps the matching
//! [`CommandHandle`] and may block on it.

use crate::bucket::ReadStatus;
use chrono::NaiveDate;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use metricstore_common::{Bucket, Document, Error, Interval, Result, StoredMetric};
use std::fmt;
use std::time::Duration;

/// Receives the records of a read command on the worker thread
pub trait ReadSink: Send {
    /// Accept one record; `false` stops the read
    fn accept(&mut self, metric: StoredMetric) -> bool;

    /// Called exactly once when the command has finished
    fn complete(self: Box<Self>, result: Result<ReadStatus>);
}

/// Work item for the storage worker
pub enum Command {
    ListBuckets {
        reply: Sender<Result<Vec<Bucket>>>,
    },
    Write {
        bucket: String,
        bucket_type: Option<String>,
        document: Document,
        reply: Sender<Result<StoredMetric>>,
    },
    Read {
        bucket: String,
        interval: Interval,
        sink: Box<dyn ReadSink>,
    },
    Compress {
        bucket: String,
        until: NaiveDate,
        reply: Sender<Result<usize>>,
    },
    Delete {
        bucket: String,
        until: NaiveDate,
        reply: Sender<Result<usize>>,
    },
}

/// Command variant without payload, used for accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    ListBuckets,
    Write,
    Read,
    Compress,
    Delete,
}

impl CommandKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ListBuckets => "list_buckets",
            Self::Write => "write",
            Self::Read => "read",
            Self::Compress => "compress",
            Self::Delete => "delete",
        }
    }
}

impl Command {
    pub fn list_buckets() -> (Self, CommandHandle<Vec<Bucket>>) {
        let (reply, handle) = CommandHandle::channel();
        (Self::ListBuckets { reply }, handle)
    }

    pub fn write(
        bucket: impl Into<String>,
        bucket_type: Option<String>,
        document: Document,
    ) -> (Self, CommandHandle<StoredMetric>) {
        let (reply, handle) = CommandHandle::channel();
        (
            Self::Write {
                bucket: bucket.into(),
                bucket_type,
                document,
                reply,
            },
            handle,
        )
    }

    pub fn read(bucket: impl Into<String>, interval: Interval, sink: Box<dyn ReadSink>) -> Self {
        Self::Read {
            bucket: bucket.into(),
            interval,
            sink,
        }
    }

    /// Read command delivering records to a closure
    pub fn read_with<F>(
        bucket: impl Into<String>,
        interval: Interval,
        callback: F,
    ) -> (Self, CommandHandle<ReadStatus>)
    where
        F: FnMut(StoredMetric) -> bool + Send + 'static,
    {
        let (reply, handle) = CommandHandle::channel();
        let sink = CallbackSink { callback, reply };
        (Self::read(bucket, interval, Box::new(sink)), handle)
    }

    pub fn compress(bucket: impl Into<String>, until: NaiveDate) -> (Self, CommandHandle<usize>) {
        let (reply, handle) = CommandHandle::channel();
        (
            Self::Compress {
                bucket: bucket.into(),
                until,
                reply,
            },
            handle,
        )
    }

    pub fn delete(bucket: impl Into<String>, until: NaiveDate) -> (Self, CommandHandle<usize>) {
        let (reply, handle) = CommandHandle::channel();
        (
            Self::Delete {
                bucket: bucket.into(),
                until,
                reply,
            },
            handle,
        )
    }

    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::ListBuckets { .. } => CommandKind::ListBuckets,
            Self::Write { .. } => CommandKind::Write,
            Self::Read { .. } => CommandKind::Read,
            Self::Compress { .. } => CommandKind::Compress,
            Self::Delete { .. } => CommandKind::Delete,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListBuckets { .. } => write!(f, "list_buckets"),
            Self::Write { bucket, .. } => write!(f, "write({bucket})"),
            Self::Read {
                bucket, interval, ..
            } => write!(f, "read({bucket}, {interval})"),
            Self::Compress { bucket, until, .. } => write!(f, "compress({bucket}, until {until})"),
            Self::Delete { bucket, until, .. } => write!(f, "delete({bucket}, until {until})"),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Caller side of a submitted command
#[derive(Debug)]
pub struct CommandHandle<T> {
    receiver: Receiver<Result<T>>,
}

impl<T> CommandHandle<T> {
    fn channel() -> (Sender<Result<T>>, Self) {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        (sender, Self { receiver })
    }

    /// Block until the worker has completed the command
    pub fn wait(self) -> Result<T> {
        self.receiver.recv().map_err(|_| Error::CommandDropped)?
    }

    /// Block for at most `timeout`; `None` if the command is still pending
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(Error::CommandDropped)),
        }
    }

    /// Result if the command already completed
    pub fn try_result(&self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(Error::CommandDropped)),
        }
    }
}

struct CallbackSink<F> {
    callback: F,
    reply: Sender<Result<ReadStatus>>,
}

impl<F> ReadSink for CallbackSink<F>
where
    F: FnMut(StoredMetric) -> bool + Send,
{
    fn accept(&mut self, metric: StoredMetric) -> bool {
        (self.callback)(metric)
    }

    fn complete(self: Box<Self>, result: Result<ReadStatus>) {
        let _ = self.reply.send(result);
    }
}
