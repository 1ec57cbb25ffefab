use std::sync::Arc;

use super::metrics::{default_metrics, StoreMetrics};
use super::order::IndexId;
use super::planner::{IndexSelector, PrefixCoverage};
use crate::primitives::blockfile::{DEFAULT_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::types::{Result, StoreError};

/// Configuration supplied when opening a [`super::StatementStore`].
#[derive(Clone)]
pub struct StoreOptions {
    /// Block size in bytes; a power of two of at least 256.
    pub block_size: usize,
    /// Number of decoded nodes kept in the cache.
    pub cache_blocks: usize,
    /// Physical indexes to maintain.
    pub indexes: Vec<IndexId>,
    /// Whether prepare fsyncs the block file before writing the metaroot.
    pub sync: bool,
    /// Counter sink.
    pub metrics: Arc<dyn StoreMetrics>,
    /// Index selection strategy.
    pub selector: Arc<dyn IndexSelector>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            cache_blocks: 1024,
            indexes: IndexId::ALL.to_vec(),
            sync: true,
            metrics: default_metrics(),
            selector: Arc::new(PrefixCoverage),
        }
    }
}

impl StoreOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the block size.
    pub fn block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// Sets the node cache capacity.
    pub fn cache_blocks(mut self, blocks: usize) -> Self {
        self.cache_blocks = blocks;
        self
    }

    /// Sets the maintained indexes.
    pub fn indexes(mut self, indexes: impl IntoIterator<Item = IndexId>) -> Self {
        self.indexes = indexes.into_iter().collect();
        self
    }

    /// Enables or disables fsync of the block file at prepare.
    pub fn sync(mut self, enabled: bool) -> Self {
        self.sync = enabled;
        self
    }

    /// Sets the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn StoreMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the index selection strategy.
    pub fn selector(mut self, selector: Arc<dyn IndexSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Sorts and deduplicates the index list and checks the block size.
    pub(crate) fn normalized(mut self) -> Result<Self> {
        self.indexes.sort();
        self.indexes.dedup();
        if self.indexes.is_empty() {
            return Err(StoreError::invalid("at least one index must be registered"));
        }
        if self.block_size < MIN_BLOCK_SIZE || !self.block_size.is_power_of_two() {
            return Err(StoreError::invalid(format!(
                "block size {} must be a power of two of at least {MIN_BLOCK_SIZE}",
                self.block_size
            )));
        }
        Ok(self)
    }
}
