//! The in-memory representation cache (`spec.md` §4.4.4, §4.7): decoded
//! fulltexts keyed by representation location, bounded in size so that
//! deep skip-delta chains don't force repeated reconstruction walks
//! within a single process lifetime. Purely an optimization — losing an
//! entry never changes observable behavior.

use std::collections::HashMap;
use std::sync::Mutex;

/// Bounds the cache's total footprint rather than its entry count, since
/// fulltexts vary wildly in size.
const DEFAULT_MAX_BYTES: usize = 64 * 1024 * 1024;

#[derive(Default)]
struct Inner {
    entries: HashMap<(u64, u64), Vec<u8>>,
    order: Vec<(u64, u64)>,
    bytes: usize,
}

/// A bounded, thread-safe cache from `(revision, item_offset)` to decoded
/// fulltext bytes.
pub struct RepresentationCache {
    max_bytes: usize,
    inner: Mutex<Inner>,
}

impl RepresentationCache {
    pub fn new() -> Self {
        Self::with_max_bytes(DEFAULT_MAX_BYTES)
    }

    pub fn with_max_bytes(max_bytes: usize) -> Self {
        RepresentationCache { max_bytes, inner: Mutex::new(Inner::default()) }
    }

    pub fn get(&self, revision: u64, item_offset: u64) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.entries.get(&(revision, item_offset)).cloned()
    }

    pub fn insert(&self, revision: u64, item_offset: u64, fulltext: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        let key = (revision, item_offset);
        if inner.entries.contains_key(&key) {
            return;
        }
        let size = fulltext.len();
        while !inner.order.is_empty() && inner.bytes + size > self.max_bytes {
            let evicted = inner.order.remove(0);
            if let Some(removed) = inner.entries.remove(&evicted) {
                inner.bytes -= removed.len();
            }
        }
        inner.bytes += size;
        inner.order.push(key);
        inner.entries.insert(key, fulltext);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}

impl Default for RepresentationCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_and_returns_entries() {
        let cache = RepresentationCache::new();
        assert!(cache.get(1, 0).is_none());
        cache.insert(1, 0, vec![1, 2, 3]);
        assert_eq!(cache.get(1, 0), Some(vec![1, 2, 3]));
    }

    #[test]
    fn evicts_oldest_entries_once_bound_exceeded() {
        let cache = RepresentationCache::with_max_bytes(10);
        cache.insert(1, 0, vec![0u8; 6]);
        cache.insert(1, 1, vec![0u8; 6]);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(1, 0).is_none());
        assert!(cache.get(1, 1).is_some());
    }
}
