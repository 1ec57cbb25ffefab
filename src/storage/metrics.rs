use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sink for counters emitted by statement stores, node pools and the coordinator.
///
/// Every component receives one of these at construction; nothing reports through
/// process-wide state.
pub trait StoreMetrics: Send + Sync {
    /// A quad was inserted (duplicates are not counted).
    fn quad_added(&self);

    /// A quad was removed.
    fn quad_removed(&self);

    /// A tuple cursor was opened on the named index.
    fn tuples_opened(&self, index: &'static str);

    /// A block was read from disk rather than the cache.
    fn block_read(&self);

    /// A block was written to disk.
    fn block_written(&self);

    /// A node was copied on write.
    fn block_copied(&self);

    /// A resource prepared a phase.
    fn phase_prepared(&self);

    /// A resource committed a phase.
    fn phase_committed(&self);

    /// A resource rolled back its write phase.
    fn phase_rolled_back(&self);
}

/// Discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl StoreMetrics for NoopMetrics {
    fn quad_added(&self) {}
    fn quad_removed(&self) {}
    fn tuples_opened(&self, _index: &'static str) {}
    fn block_read(&self) {}
    fn block_written(&self) {}
    fn block_copied(&self) {}
    fn phase_prepared(&self) {}
    fn phase_committed(&self) {}
    fn phase_rolled_back(&self) {}
}

/// Thread-safe atomic counters.
#[derive(Default)]
pub struct CounterMetrics {
    /// Quads inserted.
    pub quads_added: AtomicU64,

    /// Quads removed.
    pub quads_removed: AtomicU64,

    /// Tuple cursors opened, across all indexes.
    pub tuples_opened: AtomicU64,

    /// Blocks read from disk.
    pub blocks_read: AtomicU64,

    /// Blocks written to disk.
    pub blocks_written: AtomicU64,

    /// Nodes copied on write.
    pub blocks_copied: AtomicU64,

    /// Phases prepared.
    pub phases_prepared: AtomicU64,

    /// Phases committed.
    pub phases_committed: AtomicU64,

    /// Write phases rolled back.
    pub phases_rolled_back: AtomicU64,
}

impl StoreMetrics for CounterMetrics {
    fn quad_added(&self) {
        self.quads_added.fetch_add(1, Ordering::Relaxed);
    }

    fn quad_removed(&self) {
        self.quads_removed.fetch_add(1, Ordering::Relaxed);
    }

    fn tuples_opened(&self, _index: &'static str) {
        self.tuples_opened.fetch_add(1, Ordering::Relaxed);
    }

    fn block_read(&self) {
        self.blocks_read.fetch_add(1, Ordering::Relaxed);
    }

    fn block_written(&self) {
        self.blocks_written.fetch_add(1, Ordering::Relaxed);
    }

    fn block_copied(&self) {
        self.blocks_copied.fetch_add(1, Ordering::Relaxed);
    }

    fn phase_prepared(&self) {
        self.phases_prepared.fetch_add(1, Ordering::Relaxed);
    }

    fn phase_committed(&self) {
        self.phases_committed.fetch_add(1, Ordering::Relaxed);
    }

    fn phase_rolled_back(&self) {
        self.phases_rolled_back.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation, [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn StoreMetrics> {
    Arc::new(NoopMetrics)
}
