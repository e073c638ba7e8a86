//! LRU cache of loaded patches that are out of view.
//!
//! The cache holds patch ids only; the data stays in the catalog. When an
//! entry is pushed out by capacity, its id is collected so the owner can
//! unload that patch's samples. Explicit removal (a patch coming back into
//! view) is not an eviction.

use std::sync::Arc;

use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache as MokaCache;
use parking_lot::Mutex;

use crate::model::PatchId;

/// Default number of out-of-view patches kept loaded.
pub const DEFAULT_CACHE_CAPACITY: u64 = 100;

pub struct PatchCache {
    cache: MokaCache<PatchId, ()>,
    evicted: Arc<Mutex<Vec<PatchId>>>,
    capacity: u64,
}

impl PatchCache {
    pub fn new(capacity: u64) -> Self {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        let cache = MokaCache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |key: Arc<PatchId>, _value: (), cause: RemovalCause| {
                if cause.was_evicted() {
                    sink.lock().push(*key);
                }
            })
            .build();
        Self {
            cache,
            evicted,
            capacity,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Inserts or refreshes a patch. Returns the patches pushed out, oldest
    /// first; their data must be unloaded.
    pub fn add(&self, patch: PatchId) -> Vec<PatchId> {
        self.cache.insert(patch, ());
        self.cache.run_pending_tasks();
        self.drain_evicted()
    }

    /// Removes a patch for reuse. Returns false when it was not cached.
    pub fn try_remove(&self, patch: PatchId) -> bool {
        let removed = self.cache.remove(&patch).is_some();
        self.cache.run_pending_tasks();
        removed
    }

    pub fn contains(&self, patch: PatchId) -> bool {
        self.cache.contains_key(&patch)
    }

    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties the cache. Every removed patch is returned for unloading.
    pub fn clear(&self) -> Vec<PatchId> {
        let ids: Vec<PatchId> = self.cache.iter().map(|(k, _)| *k).collect();
        for id in &ids {
            self.cache.remove(id);
        }
        self.cache.run_pending_tasks();
        self.drain_evicted();
        ids
    }

    fn drain_evicted(&self) -> Vec<PatchId> {
        std::mem::take(&mut *self.evicted.lock())
    }
}

impl std::fmt::Debug for PatchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchCache")
            .field("capacity", &self.capacity)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_evicts_least_recently_used() {
        let cache = PatchCache::new(3);
        for i in 0..3 {
            assert!(cache.add(PatchId::new(i)).is_empty());
        }
        let evicted = cache.add(PatchId::new(3));
        assert_eq!(evicted, vec![PatchId::new(0)]);
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(PatchId::new(0)));
    }

    #[test]
    fn test_add_refreshes_recency() {
        let cache = PatchCache::new(2);
        cache.add(PatchId::new(0));
        cache.add(PatchId::new(1));
        cache.add(PatchId::new(0));
        let evicted = cache.add(PatchId::new(2));
        assert_eq!(evicted, vec![PatchId::new(1)]);
    }

    #[test]
    fn test_try_remove_is_not_eviction() {
        let cache = PatchCache::new(2);
        cache.add(PatchId::new(0));
        assert!(cache.try_remove(PatchId::new(0)));
        assert!(!cache.try_remove(PatchId::new(0)));
        assert!(cache.drain_evicted().is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_returns_everything() {
        let cache = PatchCache::new(4);
        cache.add(PatchId::new(5));
        cache.add(PatchId::new(6));
        let mut cleared = cache.clear();
        cleared.sort();
        assert_eq!(cleared, vec![PatchId::new(5), PatchId::new(6)]);
        assert!(cache.is_empty());
    }
}
