//! Cached documents of one bucket minute
//!
//! A minute is either expanded (a plain list accepting writes) or compressed
//! (an immutable gzip blob). Writing to a compressed minute expands it again;
//! the caller then reports the expansion to its
//! [`ExpandedBucketManager`](crate::expanded::ExpandedBucketManager).

use metricstore_common::{Document, Result};
use metricstore_storage::codec::{decode_documents, encode_documents};
use parking_lot::RwLock;
use std::sync::Arc;

enum MinuteState {
    Empty,
    Expanded(Vec<Document>),
    Compressed { blob: Arc<[u8]>, count: usize },
}

pub struct MinuteBucket {
    state: RwLock<MinuteState>,
}

impl Default for MinuteBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl MinuteBucket {
    pub const fn new() -> Self {
        Self {
            state: RwLock::new(MinuteState::Empty),
        }
    }

    /// Append a document; `true` if the minute was not expanded before
    pub fn write(&self, document: Document) -> Result<bool> {
        let mut state = self.state.write();
        let newly_expanded = match &*state {
            MinuteState::Expanded(_) => false,
            MinuteState::Empty => {
                *state = MinuteState::Expanded(Vec::new());
                true
            }
            MinuteState::Compressed { blob, count } => {
                let mut documents = Vec::with_capacity(count + 16);
                documents.extend(decode_documents(blob)?);
                *state = MinuteState::Expanded(documents);
                true
            }
        };
        if let MinuteState::Expanded(documents) = &mut *state {
            documents.push(document);
        }
        Ok(newly_expanded)
    }

    /// Replace the expanded list by a gzip blob
    pub fn compress(&self) -> Result<()> {
        let mut state = self.state.write();
        if let MinuteState::Expanded(documents) = &*state {
            let count = documents.len();
            let blob = encode_documents(documents)?;
            *state = MinuteState::Compressed {
                blob: blob.into(),
                count,
            };
        }
        Ok(())
    }

    /// Snapshot of the cached documents in write order
    ///
    /// A compressed minute is decoded after the lock is released.
    pub fn documents(&self) -> Result<Vec<Document>> {
        let blob = match &*self.state.read() {
            MinuteState::Empty => return Ok(Vec::new()),
            MinuteState::Expanded(documents) => return Ok(documents.clone()),
            MinuteState::Compressed { blob, .. } => Arc::clone(blob),
        };
        decode_documents(&blob)
    }

    /// Whether the minute holds a gzip blob
    pub fn is_compressed(&self) -> bool {
        matches!(&*self.state.read(), MinuteState::Compressed { .. })
    }

    pub fn is_expanded(&self) -> bool {
        matches!(&*self.state.read(), MinuteState::Expanded(_))
    }

    /// Number of cached documents
    pub fn size(&self) -> usize {
        match &*self.state.read() {
            MinuteState::Empty => 0,
            MinuteState::Expanded(documents) => documents.len(),
            MinuteState::Compressed { count, .. } => *count,
        }
    }
}
