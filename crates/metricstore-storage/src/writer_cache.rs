//! Bounded LRU cache of open segment writers
//!
//! Each bucket keeps its most recently used minute writers open so that
//! consecutive writes to the same minute do not reopen the file. Entries carry
//! a logical access clock; overflowing the capacity evicts the entries with the
//! oldest access and hands them back to the caller to close.

use crate::codec::SegmentWriter;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of writers kept open per bucket
pub const DEFAULT_MAX_CACHED_WRITERS: usize = 5;

struct CacheEntry {
    writer: SegmentWriter,
    /// Logical clock value of the last get or put
    last_access: u64,
}

/// Writer cache statistics
#[derive(Debug, Default)]
pub struct WriterCacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl WriterCacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

/// LRU map from segment path to open writer
pub struct WriterCache {
    entries: HashMap<PathBuf, CacheEntry>,
    max_entries: usize,
    clock: u64,
    stats: WriterCacheStats,
}

impl WriterCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
            clock: 0,
            stats: WriterCacheStats::default(),
        }
    }

    pub const fn stats(&self) -> &WriterCacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look up a writer, refreshing its recency
    pub fn get(&mut self, path: &Path) -> Option<&mut SegmentWriter> {
        let clock = self.tick();
        match self.entries.get_mut(path) {
            Some(entry) => {
                entry.last_access = clock;
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(&mut entry.writer)
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a writer and return the writers evicted to stay within capacity
    ///
    /// A writer already cached under the same path is returned as well.
    pub fn put(&mut self, writer: SegmentWriter) -> Vec<SegmentWriter> {
        let clock = self.tick();
        let mut evicted = Vec::new();
        let path = writer.path().to_path_buf();
        if let Some(old) = self.entries.insert(
            path,
            CacheEntry {
                writer,
                last_access: clock,
            },
        ) {
            evicted.push(old.writer);
        }
        while self.entries.len() > self.max_entries {
            let Some(lru) = self.find_lru_entry() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&lru) {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                evicted.push(entry.writer);
            }
        }
        evicted
    }

    /// Remove the writer for `path` without closing it
    pub fn remove(&mut self, path: &Path) -> Option<SegmentWriter> {
        self.entries.remove(path).map(|entry| entry.writer)
    }

    /// Remove every writer, least recently used first
    pub fn drain(&mut self) -> Vec<SegmentWriter> {
        let mut entries: Vec<CacheEntry> = self.entries.drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|e| e.last_access);
        entries.into_iter().map(|e| e.writer).collect()
    }

    fn find_lru_entry(&self) -> Option<PathBuf> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(path, _)| path.clone())
    }
}
