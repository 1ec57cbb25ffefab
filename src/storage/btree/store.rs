use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::node::{Capacity, Node};
use super::stats::BTreeStats;
use crate::phase::PhaseTracker;
use crate::primitives::blockfile::BlockFile;
use crate::primitives::freelist::FreeList;
use crate::storage::metrics::StoreMetrics;
use crate::types::{BlockId, Result};

/// Anything nodes can be loaded from.
pub trait NodeSource {
    /// Loads node `id`.
    fn node(&self, id: BlockId) -> Result<Arc<Node>>;
}

impl<T: NodeSource + ?Sized> NodeSource for &T {
    fn node(&self, id: BlockId) -> Result<Arc<Node>> {
        (**self).node(id)
    }
}

impl<T: NodeSource + ?Sized> NodeSource for Arc<T> {
    fn node(&self, id: BlockId) -> Result<Arc<Node>> {
        (**self).node(id)
    }
}

/// Sealed nodes: the block file plus a decoded-node cache. Shared by the writer and every
/// reader, which only ever see blocks of sealed generations.
pub struct NodeStore {
    blocks: BlockFile,
    cache: Mutex<LruCache<BlockId, Arc<Node>>>,
    capacity: Capacity,
    metrics: Arc<dyn StoreMetrics>,
    stats: BTreeStats,
}

impl NodeStore {
    /// Wraps a block file with an LRU cache of `cache_blocks` decoded nodes.
    pub fn new(blocks: BlockFile, cache_blocks: usize, metrics: Arc<dyn StoreMetrics>) -> Self {
        let capacity = Capacity::for_body(blocks.body_len());
        let size = NonZeroUsize::new(cache_blocks.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            blocks,
            cache: Mutex::new(LruCache::new(size)),
            capacity,
            metrics,
            stats: BTreeStats::default(),
        }
    }

    /// Entries per node kind.
    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Underlying block file.
    pub fn blocks(&self) -> &BlockFile {
        &self.blocks
    }

    /// Split, merge, copy and cache counters.
    pub fn stats(&self) -> &BTreeStats {
        &self.stats
    }

    pub(crate) fn write(&self, id: BlockId, node: Arc<Node>) -> Result<()> {
        let (kind, count, body) = node.encode();
        self.blocks.write(id, kind, count, &body)?;
        self.metrics.block_written();
        self.cache.lock().put(id, node);
        Ok(())
    }

    pub(crate) fn forget(&self, id: BlockId) {
        self.cache.lock().pop(&id);
    }

    pub(crate) fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}

impl NodeSource for NodeStore {
    fn node(&self, id: BlockId) -> Result<Arc<Node>> {
        if let Some(node) = self.cache.lock().get(&id) {
            self.stats.inc_cache_hits();
            return Ok(Arc::clone(node));
        }
        self.stats.inc_cache_misses();
        let raw = self.blocks.read(id)?;
        self.metrics.block_read();
        let node = Arc::new(Node::decode(id, &raw)?);
        self.cache.lock().put(id, Arc::clone(&node));
        Ok(node)
    }
}

/// The writer's view: unsealed nodes in memory over the sealed [`NodeStore`], plus the
/// block allocator.
pub struct WriteSpace {
    store: Arc<NodeStore>,
    dirty: FxHashMap<BlockId, Arc<Node>>,
    alloc: FreeList,
    tracker: Arc<PhaseTracker>,
}

impl WriteSpace {
    /// Creates a writer over `store` with an empty allocator.
    pub fn new(store: Arc<NodeStore>, tracker: Arc<PhaseTracker>) -> Self {
        Self {
            store,
            dirty: FxHashMap::default(),
            alloc: FreeList::new(1),
            tracker,
        }
    }

    /// Shared sealed-node store.
    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    /// Block allocator.
    pub fn alloc(&self) -> &FreeList {
        &self.alloc
    }

    /// Number of unsealed nodes held in memory.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    pub(crate) fn capacity(&self) -> Capacity {
        self.store.capacity
    }

    /// Replaces the allocator and drops every unsealed node, after select or clear.
    pub(crate) fn reset(&mut self, alloc: FreeList) {
        self.dirty.clear();
        self.store.clear_cache();
        self.alloc = alloc;
    }

    pub(crate) fn allocate(&mut self, node: Node) -> BlockId {
        if self.alloc.starved() {
            self.alloc.reclaim(self.tracker.oldest());
        }
        let id = BlockId(self.alloc.allocate());
        self.store.forget(id);
        self.dirty.insert(id, Arc::new(node));
        id
    }

    pub(crate) fn free(&mut self, id: BlockId) -> Result<()> {
        if self.alloc.is_fresh(id.0) {
            self.dirty.remove(&id);
        }
        self.alloc.free(id.0)
    }

    /// Stores `node` as the new content of `id`: in place when `id` is unsealed, otherwise
    /// in a newly allocated block.
    pub(crate) fn rewrite(&mut self, id: BlockId, node: Node) -> Result<BlockId> {
        if self.alloc.is_fresh(id.0) {
            self.dirty.insert(id, Arc::new(node));
            return Ok(id);
        }
        self.free(id)?;
        self.store.stats.inc_copies();
        self.store.metrics.block_copied();
        Ok(self.allocate(node))
    }

    /// True when nodes changed since the last seal.
    pub fn needs_seal(&self) -> bool {
        self.alloc.mutated_since_seal()
    }

    /// Writes every unsealed node to the block file and closes the generation.
    pub(crate) fn seal(&mut self) -> Result<u64> {
        let mut ids: Vec<BlockId> = self.dirty.keys().copied().collect();
        ids.sort_unstable();
        for id in &ids {
            if let Some(node) = self.dirty.get(id) {
                self.store.write(*id, Arc::clone(node))?;
            }
        }
        self.dirty.clear();
        Ok(self.alloc.seal())
    }

    /// Keeps the transaction's allocations and releases what no pin still needs.
    pub(crate) fn commit(&mut self) {
        self.alloc.commit_tx();
        self.alloc.reclaim(self.tracker.oldest());
    }

    /// Discards unsealed nodes and undoes the transaction's allocations.
    pub(crate) fn rollback(&mut self) {
        for id in self.alloc.rollback_tx() {
            self.dirty.remove(&BlockId(id));
        }
        self.dirty.clear();
    }
}

impl NodeSource for WriteSpace {
    fn node(&self, id: BlockId) -> Result<Arc<Node>> {
        match self.dirty.get(&id) {
            Some(node) => Ok(Arc::clone(node)),
            None => self.store.node(id),
        }
    }
}
