//! Bound on the number of expanded minutes per bucket

use crate::minute::MinuteBucket;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tracing::warn;

/// FIFO of the minutes of one bucket that are currently expanded
///
/// Reporting an expansion that would exceed `max_expanded` compresses the
/// oldest expanded minutes. They are taken off the queue under the lock and
/// compressed after it is released.
pub struct ExpandedBucketManager {
    max_expanded: usize,
    expanded: Mutex<VecDeque<Weak<MinuteBucket>>>,
}

impl ExpandedBucketManager {
    pub fn new(max_expanded: usize) -> Self {
        Self {
            max_expanded,
            expanded: Mutex::new(VecDeque::new()),
        }
    }

    pub const fn max_expanded(&self) -> usize {
        self.max_expanded
    }

    /// Minutes currently tracked as expanded
    pub fn len(&self) -> usize {
        self.expanded.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Track a minute that just became expanded
    pub fn expanded(&self, minute: &Arc<MinuteBucket>) {
        let evicted: Vec<Weak<MinuteBucket>> = {
            let mut expanded = self.expanded.lock();
            let len = expanded.len();
            let overflow = (len + 1).saturating_sub(self.max_expanded).min(len);
            let evicted = expanded.drain(..overflow).collect();
            expanded.push_back(Arc::downgrade(minute));
            evicted
        };
        // Minutes dropped from the cache meanwhile need no compression
        for minute in evicted.iter().filter_map(Weak::upgrade) {
            if let Err(e) = minute.compress() {
                warn!("Failed to compress cached minute: {}", e);
            }
        }
    }
}
