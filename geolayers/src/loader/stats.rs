//! Load counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters updated by the worker and the manager.
#[derive(Debug, Default)]
pub struct LoadStats {
    requested: AtomicU64,
    csv_parsed: AtomicU64,
    bin_read: AtomicU64,
    failed: AtomicU64,
    canceled: AtomicU64,
    cache_hits: AtomicU64,
    evicted: AtomicU64,
}

/// Point-in-time copy of [`LoadStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStatsSnapshot {
    pub requested: u64,
    pub csv_parsed: u64,
    pub bin_read: u64,
    pub failed: u64,
    pub canceled: u64,
    pub cache_hits: u64,
    pub evicted: u64,
}

impl LoadStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_submitted(&self) {
        self.requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn csv_parsed(&self) {
        self.csv_parsed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bin_read(&self) {
        self.bin_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load_canceled(&self) {
        self.canceled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn patches_evicted(&self, count: usize) {
        self.evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LoadStatsSnapshot {
        LoadStatsSnapshot {
            requested: self.requested.load(Ordering::Relaxed),
            csv_parsed: self.csv_parsed.load(Ordering::Relaxed),
            bin_read: self.bin_read.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = LoadStats::new();
        stats.request_submitted();
        stats.request_submitted();
        stats.bin_read();
        stats.patches_evicted(3);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requested, 2);
        assert_eq!(snapshot.bin_read, 1);
        assert_eq!(snapshot.evicted, 3);
        assert_eq!(snapshot.failed, 0);
    }
}
