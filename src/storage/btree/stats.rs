use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BTreeStatsSnapshot {
    /// Leaf splits performed.
    pub leaf_splits: u64,
    /// Internal node splits performed.
    pub internal_splits: u64,
    /// Sibling merges performed after removals.
    pub merges: u64,
    /// Nodes copied because they belonged to a sealed generation.
    pub copies: u64,
    /// Node loads served by the cache.
    pub cache_hits: u64,
    /// Node loads that read a block.
    pub cache_misses: u64,
}

/// Thread-safe counters shared by every tree in a block file.
#[derive(Default, Debug)]
pub struct BTreeStats {
    leaf_splits: AtomicU64,
    internal_splits: AtomicU64,
    merges: AtomicU64,
    copies: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl BTreeStats {
    pub(crate) fn inc_leaf_splits(&self) {
        self.leaf_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_internal_splits(&self) {
        self.internal_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_merges(&self) {
        self.merges.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_copies(&self) {
        self.copies.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_cache_misses(&self) {
        self.cache_misses.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        BTreeStatsSnapshot {
            leaf_splits: self.leaf_splits.load(AtomicOrdering::Relaxed),
            internal_splits: self.internal_splits.load(AtomicOrdering::Relaxed),
            merges: self.merges.load(AtomicOrdering::Relaxed),
            copies: self.copies.load(AtomicOrdering::Relaxed),
            cache_hits: self.cache_hits.load(AtomicOrdering::Relaxed),
            cache_misses: self.cache_misses.load(AtomicOrdering::Relaxed),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "quadstore::btree::stats",
            leaf_splits = snapshot.leaf_splits,
            internal_splits = snapshot.internal_splits,
            merges = snapshot.merges,
            copies = snapshot.copies,
            cache_hits = snapshot.cache_hits,
            cache_misses = snapshot.cache_misses,
            "btree stats snapshot"
        );
    }
}
