/// Per-router counters.
///
/// Relaxed atomics: the numbers are for operators and tests, nothing
/// synchronizes on them.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by every router kind.
///
/// `cache_hits`/`cache_misses` only move for the server router.
#[derive(Debug, Default)]
pub struct RouterStats {
    routed: AtomicU64,
    dropped: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl RouterStats {
    /// A message left this router toward its next hop or Module.
    pub fn record_routed(&self) {
        self.routed.fetch_add(1, Ordering::Relaxed);
    }

    /// A message was discarded here, by error or by a non-fatal drop.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            routed: self.routed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RouterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStatsSnapshot {
    pub routed: u64,
    pub dropped: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl fmt::Display for RouterStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "routed={} dropped={} cache_hits={} cache_misses={}",
            self.routed, self.dropped, self.cache_hits, self.cache_misses
        )
    }
}
