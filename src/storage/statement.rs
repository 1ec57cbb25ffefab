use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info, trace, warn, Span};

use super::btree::{insert, remove, NodeStore, WriteSpace};
use super::options::StoreOptions;
use super::order::{index_mask, indexes_from_mask, IndexId};
use super::tuples::{Pattern, QueryContext, StoreTuples};
use crate::phase::{
    PhaseFiles, PhaseImage, PhaseManager, PhasePayload, PhaseResource, PhaseState, PhaseTracker,
    PinnedPhase, Published, Refreshable, ResourceKind, SlotState,
};
use crate::primitives::blockfile::BlockFile;
use crate::primitives::bytes::ord;
use crate::primitives::freelist::FreeList;
use crate::primitives::io::{FileIo, MemFileIo, StdFileIo};
use crate::types::{BlockId, NodeId, PhaseNumber, Quad, Result, StoreError};

const NR_QUADS: std::ops::Range<usize> = 0..8;
const INDEX_MASK: std::ops::Range<usize> = 8..12;
const ROOTS_START: usize = 16;

/// Per-phase roots of a statement store: quad count, maintained indexes and one tree root
/// per index id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatementRoots {
    /// Number of stored quads.
    pub nr_quads: u64,
    /// Bit `i` set when index id `i` is maintained.
    pub index_mask: u32,
    /// Root block per index id; null when empty or not maintained.
    pub roots: [BlockId; 6],
}

impl StatementRoots {
    /// Empty roots for the given index set.
    pub fn empty(indexes: &[IndexId]) -> Self {
        Self {
            nr_quads: 0,
            index_mask: index_mask(indexes),
            roots: [BlockId::NULL; 6],
        }
    }

    /// Root of one index.
    pub fn root(&self, index: IndexId) -> BlockId {
        self.roots[index.id()]
    }

    /// Maintained indexes in id order.
    pub fn indexes(&self) -> Vec<IndexId> {
        indexes_from_mask(self.index_mask)
    }
}

impl PhasePayload for StatementRoots {
    fn encode(&self, dst: &mut [u8]) -> Result<()> {
        ord::put_u64_be(&mut dst[NR_QUADS], self.nr_quads);
        ord::put_u32_be(&mut dst[INDEX_MASK], self.index_mask);
        for (i, root) in self.roots.iter().enumerate() {
            let at = ROOTS_START + i * 8;
            ord::put_u64_be(&mut dst[at..at + 8], root.0);
        }
        Ok(())
    }

    fn decode(src: &[u8]) -> Result<Self> {
        let nr_quads = ord::get_u64_be(src.get(NR_QUADS).unwrap_or_default())?;
        let index_mask = ord::get_u32_be(src.get(INDEX_MASK).unwrap_or_default())?;
        if index_mask == 0 || index_mask >> IndexId::ALL.len() != 0 {
            return Err(StoreError::corruption(format!(
                "statement roots carry invalid index mask {index_mask:#x}"
            )));
        }
        let mut roots = [BlockId::NULL; 6];
        for (i, root) in roots.iter_mut().enumerate() {
            let at = ROOTS_START + i * 8;
            *root = BlockId(ord::get_u64_be(src.get(at..at + 8).unwrap_or_default())?);
            if index_mask & (1 << i) == 0 && !root.is_null() {
                return Err(StoreError::corruption(format!(
                    "unmaintained index {i} has root {}",
                    root.0
                )));
            }
        }
        Ok(Self {
            nr_quads,
            index_mask,
            roots,
        })
    }
}

/// Files backing a statement store.
#[derive(Clone)]
pub struct StoreIo {
    /// Two-slot metaroot file.
    pub meta: Arc<dyn FileIo>,
    /// Block file holding every index tree.
    pub blocks: Arc<dyn FileIo>,
    /// Free-list sidecars, one per metaroot slot.
    pub free: [Arc<dyn FileIo>; 2],
}

impl StoreIo {
    /// Opens `<stem>.meta`, `<stem>.blocks`, `<stem>.free0` and `<stem>.free1` under `dir`.
    pub fn open_dir(dir: &Path, stem: &str) -> Result<Self> {
        let files = PhaseFiles::open_dir(dir, stem)?;
        let blocks = StdFileIo::open(dir.join(format!("{stem}.blocks")))?;
        Ok(Self {
            meta: files.meta,
            blocks: Arc::new(blocks),
            free: files.free,
        })
    }

    /// Fresh in-memory files. Clones share contents, so a clone reopens the same store.
    pub fn memory() -> Self {
        let files = PhaseFiles::memory();
        Self {
            meta: files.meta,
            blocks: Arc::new(MemFileIo::new()),
            free: files.free,
        }
    }

    fn phase_files(&self) -> PhaseFiles {
        PhaseFiles {
            meta: Arc::clone(&self.meta),
            free: [Arc::clone(&self.free[0]), Arc::clone(&self.free[1])],
        }
    }
}

/// Persistent, phase-versioned set of quads with up to six permuted indexes.
///
/// Writes go to an in-memory write phase layered over the committed phase. Each
/// [`PhaseResource::prepare`] / [`PhaseResource::commit`] pair makes them the next
/// committed phase; [`PhaseResource::rollback`] drops them.
pub struct StatementStore {
    name: String,
    options: StoreOptions,
    manager: PhaseManager<StatementRoots>,
    space: WriteSpace,
    tracker: Arc<PhaseTracker>,
    published: Arc<Published<StatementRoots>>,
    query: QueryContext,
    working: StatementRoots,
    sealed_view: Option<Arc<PinnedPhase<StatementRoots>>>,
    prepared_generation: Option<u64>,
    dirty: bool,
    broken: bool,
    released: bool,
    span: Span,
}

impl StatementStore {
    /// Opens a store over `io`. The store starts unselected: call
    /// [`PhaseResource::recover`] and [`PhaseResource::select_phase`], or
    /// [`PhaseResource::clear`].
    pub fn with_io(name: impl Into<String>, io: StoreIo, options: StoreOptions) -> Result<Self> {
        let name = name.into();
        let options = options.normalized()?;
        let span = tracing::debug_span!("statements", store = %name);
        let blocks = BlockFile::new(Arc::clone(&io.blocks), options.block_size)?;
        let node_store = Arc::new(NodeStore::new(
            blocks,
            options.cache_blocks,
            Arc::clone(&options.metrics),
        ));
        let tracker = PhaseTracker::new();
        let manager = PhaseManager::new(name.clone(), ResourceKind::Statements, io.phase_files(), &span);
        let query = QueryContext {
            store: Arc::clone(&node_store),
            indexes: options.indexes.clone(),
            selector: Arc::clone(&options.selector),
            metrics: Arc::clone(&options.metrics),
        };
        debug!(parent: &span, indexes = ?options.indexes, block_size = options.block_size, "statements.open");
        Ok(Self {
            working: StatementRoots::empty(&options.indexes),
            space: WriteSpace::new(node_store, Arc::clone(&tracker)),
            name,
            options,
            manager,
            tracker,
            published: Published::new(),
            query,
            sealed_view: None,
            prepared_generation: None,
            dirty: false,
            broken: false,
            released: false,
            span,
        })
    }

    /// Opens the store named `name` in directory `dir`. The store starts unselected.
    pub fn open(dir: impl AsRef<Path>, name: &str, options: StoreOptions) -> Result<Self> {
        Self::with_io(name, StoreIo::open_dir(dir.as_ref(), name)?, options)
    }

    /// Opens, recovers and selects the newest valid phase, or clears a never-written store.
    pub fn open_latest(dir: impl AsRef<Path>, name: &str, options: StoreOptions) -> Result<Self> {
        let mut store = Self::open(dir, name, options)?;
        store.select_latest()?;
        Ok(store)
    }

    /// Recovers and selects the newest valid phase, clearing a never-written store.
    pub fn select_latest(&mut self) -> Result<()> {
        match self.recover()?.last() {
            Some(phase) => self.select_phase(*phase),
            None => self.clear(),
        }
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maintained indexes in id order.
    pub fn indexes(&self) -> &[IndexId] {
        &self.options.indexes
    }

    /// Roots of the write phase.
    pub fn working_roots(&self) -> &StatementRoots {
        &self.working
    }

    /// Shared node store, for diagnostics.
    pub fn node_store(&self) -> &Arc<NodeStore> {
        self.space.store()
    }

    /// Block allocator state, for diagnostics.
    pub fn allocator(&self) -> &FreeList {
        self.space.alloc()
    }

    /// Raw metaroot slots, for diagnostics.
    pub fn inspect_metaroots(&self) -> Result<[SlotState; 2]> {
        self.manager.inspect()
    }

    /// True when the write phase holds changes not yet committed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The committed phase with its roots, pinned for as long as the caller holds it.
    pub fn committed(&self) -> Option<Arc<PinnedPhase<StatementRoots>>> {
        self.published.get()
    }

    /// Inserts a quad. Returns false when it was already present.
    pub fn add_triple(
        &mut self,
        subject: impl Into<NodeId>,
        predicate: impl Into<NodeId>,
        object: impl Into<NodeId>,
        graph: impl Into<NodeId>,
    ) -> Result<bool> {
        let quad = Quad::new(subject, predicate, object, graph);
        self.check_mutable()?;
        check_fully_bound(&quad, "add_triple")?;
        let result = self.apply(&quad, true);
        self.finish_mutation(&quad, result, true)
    }

    /// Removes a quad. Every position must be bound. Returns false when it was absent.
    pub fn remove_triples(
        &mut self,
        subject: impl Into<NodeId>,
        predicate: impl Into<NodeId>,
        object: impl Into<NodeId>,
        graph: impl Into<NodeId>,
    ) -> Result<bool> {
        let quad = Quad::new(subject, predicate, object, graph);
        self.check_mutable()?;
        check_fully_bound(&quad, "remove_triples")?;
        let result = self.apply(&quad, false);
        self.finish_mutation(&quad, result, false)
    }

    /// Opens a cursor over the quads matching the pattern, as of now. Later writes are
    /// not visible to it.
    pub fn find_tuples(
        &mut self,
        subject: impl Into<NodeId>,
        predicate: impl Into<NodeId>,
        object: impl Into<NodeId>,
        graph: impl Into<NodeId>,
    ) -> Result<StoreTuples> {
        let pattern = Quad::new(subject, predicate, object, graph).to_array();
        let view = self.read_view()?;
        self.query.open(view, pattern, None)
    }

    /// Like [`StatementStore::find_tuples`] but scans the given index.
    pub fn find_tuples_in(&mut self, index: IndexId, pattern: Pattern) -> Result<StoreTuples> {
        let view = self.read_view()?;
        self.query.open(view, pattern, Some(index))
    }

    /// Opens a cursor over every quad, ordered by the index that would serve a pattern
    /// binding exactly the `bound` positions.
    pub fn find_tuples_bound(&mut self, bound: [bool; 4]) -> Result<StoreTuples> {
        let index = self.options.selector.select(&self.options.indexes, bound);
        let view = self.read_view()?;
        self.query.open(view, [NodeId::NONE; 4], Some(index))
    }

    /// True when some quad matches the pattern.
    pub fn exists_triples(
        &self,
        subject: impl Into<NodeId>,
        predicate: impl Into<NodeId>,
        object: impl Into<NodeId>,
        graph: impl Into<NodeId>,
    ) -> Result<bool> {
        self.check_readable()?;
        let pattern = Quad::new(subject, predicate, object, graph).to_array();
        self.query.exists(&self.space, &self.working, pattern)
    }

    /// True when the write phase holds no quads.
    pub fn is_empty(&self) -> bool {
        self.working.nr_quads == 0
    }

    /// Number of quads in the write phase.
    pub fn nr_triples(&self) -> u64 {
        self.working.nr_quads
    }

    /// A read-only view that follows committed phases via [`Refreshable::refresh`].
    pub fn snapshot(&self) -> Result<StatementSnapshot> {
        let current = self
            .published
            .get()
            .ok_or(StoreError::Protocol("no phase selected"))?;
        Ok(StatementSnapshot {
            name: self.name.clone(),
            published: Arc::clone(&self.published),
            query: self.query.clone(),
            current: Some(current),
        })
    }

    fn check_mutable(&self) -> Result<()> {
        if self.released {
            return Err(StoreError::Protocol("store released; refresh before writing"));
        }
        self.manager.check_writable()
    }

    fn check_readable(&self) -> Result<()> {
        if self.released {
            return Err(StoreError::Protocol("store released; refresh before reading"));
        }
        match self.manager.state() {
            PhaseState::Unselected => Err(StoreError::Protocol("no phase selected")),
            _ => Ok(()),
        }
    }

    /// Inserts into or removes from every index. The first index decides presence; the
    /// others must agree.
    fn apply(&mut self, quad: &Quad, adding: bool) -> Result<bool> {
        let indexes = self.options.indexes.clone();
        for (i, index) in indexes.iter().enumerate() {
            let root = self.working.root(*index);
            let key = index.key(quad);
            let (new_root, changed) = if adding {
                insert(&mut self.space, root, key)?
            } else {
                remove(&mut self.space, root, key)?
            };
            self.working.roots[index.id()] = new_root;
            if !changed {
                if i == 0 {
                    return Ok(false);
                }
                return Err(StoreError::corruption(format!(
                    "index {index} disagrees with {} about {quad}",
                    indexes[0]
                )));
            }
        }
        Ok(true)
    }

    fn finish_mutation(&mut self, quad: &Quad, result: Result<bool>, adding: bool) -> Result<bool> {
        match result {
            Ok(true) => {
                self.dirty = true;
                self.sealed_view = None;
                if adding {
                    self.working.nr_quads += 1;
                    self.options.metrics.quad_added();
                } else {
                    self.working.nr_quads = self.working.nr_quads.saturating_sub(1);
                    self.options.metrics.quad_removed();
                }
                trace!(parent: &self.span, %quad, adding, "statements.mutate");
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(err) => {
                self.dirty = true;
                self.broken = true;
                warn!(parent: &self.span, %quad, error = %err, "statements.mutate.failed");
                Err(err)
            }
        }
    }

    /// Pins the current write state for a cursor, sealing unsealed nodes first.
    fn read_view(&mut self) -> Result<Arc<PinnedPhase<StatementRoots>>> {
        self.check_readable()?;
        if self.space.needs_seal() {
            self.sealed_view = None;
            self.space.seal()?;
        }
        if let Some(view) = &self.sealed_view {
            return Ok(Arc::clone(view));
        }
        let view = PinnedPhase::new(
            &self.tracker,
            self.manager.phase_number()?,
            self.space.alloc().last_sealed(),
            self.working.clone(),
        );
        self.sealed_view = Some(Arc::clone(&view));
        Ok(view)
    }

    fn reset_write_phase(&mut self) {
        self.sealed_view = None;
        self.prepared_generation = None;
        self.dirty = false;
        self.broken = false;
    }
}

fn check_fully_bound(quad: &Quad, op: &str) -> Result<()> {
    if quad.to_array().iter().any(|n| n.is_none()) {
        return Err(StoreError::invalid(format!(
            "{op} needs all four positions bound, got {quad}"
        )));
    }
    Ok(())
}

impl fmt::Debug for StatementStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementStore")
            .field("name", &self.name)
            .field("state", &self.manager.state())
            .field("working", &self.working)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl Refreshable for StatementStore {
    fn refresh(&mut self) -> Result<()> {
        if self.manager.state() == PhaseState::Unselected {
            return Err(StoreError::Protocol("no phase selected"));
        }
        self.released = false;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if self.dirty || self.manager.state() != PhaseState::Stable {
            return Err(StoreError::Protocol("cannot release with uncommitted changes"));
        }
        self.released = true;
        self.sealed_view = None;
        Ok(())
    }
}

impl PhaseResource for StatementStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self) -> Result<PhaseNumber> {
        if self.manager.state() == PhaseState::Prepared {
            return Err(StoreError::Protocol("prepare called twice"));
        }
        self.manager.check_writable()?;
        if self.broken {
            return Err(StoreError::Protocol(
                "write phase is inconsistent after a failed mutation; roll back",
            ));
        }
        let generation = if self.space.needs_seal() {
            self.sealed_view = None;
            self.space.seal()?
        } else {
            self.space.alloc().last_sealed()
        };
        if self.options.sync {
            self.space.store().blocks().sync()?;
        }
        let image = PhaseImage {
            payload: self.working.clone(),
            free: self.space.alloc().image(),
            generation,
        };
        let phase = self.manager.prepare(&image)?;
        self.prepared_generation = Some(generation);
        self.options.metrics.phase_prepared();
        debug!(parent: &self.span, phase = phase.0, nr_quads = self.working.nr_quads, "statements.prepare");
        Ok(phase)
    }

    fn commit(&mut self) -> Result<()> {
        let phase = self.manager.commit()?;
        let generation = self
            .prepared_generation
            .take()
            .ok_or(StoreError::Protocol("prepared generation missing"))?;
        self.published.publish(PinnedPhase::new(
            &self.tracker,
            phase,
            generation,
            self.working.clone(),
        ));
        self.space.commit();
        self.reset_write_phase();
        self.options.metrics.phase_committed();
        debug!(parent: &self.span, phase = phase.0, "statements.commit");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.manager.rollback()?;
        let committed = self
            .published
            .get()
            .ok_or(StoreError::Protocol("no phase selected"))?;
        self.space.rollback();
        self.working = committed.payload.clone();
        self.reset_write_phase();
        self.options.metrics.phase_rolled_back();
        debug!(parent: &self.span, phase = committed.phase.0, "statements.rollback");
        Ok(())
    }

    fn phase_number(&self) -> Result<PhaseNumber> {
        self.manager.phase_number()
    }

    fn recover(&mut self) -> Result<Vec<PhaseNumber>> {
        let phases = self.manager.recover()?;
        self.published.clear();
        self.reset_write_phase();
        self.released = false;
        Ok(phases)
    }

    fn select_phase(&mut self, phase: PhaseNumber) -> Result<()> {
        let recovered = self.manager.load_phase(phase)?;
        let roots = recovered.image.payload;
        if roots.index_mask != index_mask(&self.options.indexes) {
            return Err(StoreError::invalid(format!(
                "store {} maintains indexes {:?}, configured {:?}",
                self.name,
                roots.indexes(),
                self.options.indexes
            )));
        }
        let alloc = FreeList::from_image(1, &recovered.image.free, recovered.image.generation)?;
        self.manager.select_phase(phase)?;
        self.space.store().blocks().set_salt(recovered.salt);
        self.space.reset(alloc);
        self.published.publish(PinnedPhase::new(
            &self.tracker,
            phase,
            recovered.image.generation,
            roots.clone(),
        ));
        self.working = roots;
        self.reset_write_phase();
        info!(parent: &self.span, phase = phase.0, nr_quads = self.working.nr_quads, "statements.select");
        Ok(())
    }

    fn clear_at(&mut self, phase: PhaseNumber) -> Result<()> {
        let salt = OsRng.next_u64();
        let blocks = self.space.store().blocks();
        blocks.reset()?;
        blocks.set_salt(salt);
        let alloc = FreeList::new(1);
        let roots = StatementRoots::empty(&self.options.indexes);
        let image = PhaseImage {
            payload: roots.clone(),
            free: alloc.image(),
            generation: alloc.last_sealed(),
        };
        self.manager.clear_at(phase, &image, salt)?;
        self.space.reset(alloc);
        self.published.publish(PinnedPhase::new(
            &self.tracker,
            phase,
            image.generation,
            roots.clone(),
        ));
        self.working = roots;
        self.reset_write_phase();
        self.released = false;
        info!(parent: &self.span, phase = phase.0, "statements.clear");
        Ok(())
    }

    fn state(&self) -> PhaseState {
        self.manager.state()
    }
}

/// Read-only view of a statement store's committed phases.
///
/// A snapshot keeps answering from the phase it was created on (or last refreshed to)
/// regardless of later commits. It can be moved to another thread.
pub struct StatementSnapshot {
    name: String,
    published: Arc<Published<StatementRoots>>,
    query: QueryContext,
    current: Option<Arc<PinnedPhase<StatementRoots>>>,
}

impl StatementSnapshot {
    fn view(&self) -> Result<&Arc<PinnedPhase<StatementRoots>>> {
        self.current
            .as_ref()
            .ok_or(StoreError::Protocol("snapshot released; refresh before reading"))
    }

    /// Phase the snapshot reads.
    pub fn phase(&self) -> Result<PhaseNumber> {
        Ok(self.view()?.phase)
    }

    /// Number of quads in the snapshot's phase.
    pub fn nr_triples(&self) -> Result<u64> {
        Ok(self.view()?.payload.nr_quads)
    }

    /// True when the snapshot's phase holds no quads.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.nr_triples()? == 0)
    }

    /// Opens a cursor over the quads matching the pattern.
    pub fn find_tuples(
        &self,
        subject: impl Into<NodeId>,
        predicate: impl Into<NodeId>,
        object: impl Into<NodeId>,
        graph: impl Into<NodeId>,
    ) -> Result<StoreTuples> {
        let pattern = Quad::new(subject, predicate, object, graph).to_array();
        self.query.open(Arc::clone(self.view()?), pattern, None)
    }

    /// Like [`StatementSnapshot::find_tuples`] but scans the given index.
    pub fn find_tuples_in(&self, index: IndexId, pattern: Pattern) -> Result<StoreTuples> {
        self.query.open(Arc::clone(self.view()?), pattern, Some(index))
    }

    /// True when some quad matches the pattern.
    pub fn exists_triples(
        &self,
        subject: impl Into<NodeId>,
        predicate: impl Into<NodeId>,
        object: impl Into<NodeId>,
        graph: impl Into<NodeId>,
    ) -> Result<bool> {
        let view = self.view()?;
        let pattern = Quad::new(subject, predicate, object, graph).to_array();
        self.query
            .exists(Arc::clone(&self.query.store), &view.payload, pattern)
    }
}

impl Refreshable for StatementSnapshot {
    fn refresh(&mut self) -> Result<()> {
        let latest = self
            .published
            .get()
            .ok_or(StoreError::Protocol("no phase selected"))?;
        trace!(snapshot = %self.name, phase = latest.phase.0, "statements.snapshot.refresh");
        self.current = Some(latest);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.current = None;
        Ok(())
    }
}
