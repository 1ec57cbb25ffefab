//! Phase-managed allocator of node identifiers.
//!
//! The pool hands out [`NodeId`]s starting at [`NodeId::MIN`]. A released identifier is only
//! handed out again once the phase that released it has committed and no view pins an
//! older phase, so statements read from an older phase never see a reused identifier.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, trace, Span};

use crate::phase::{
    PhaseFiles, PhaseImage, PhaseManager, PhasePayload, PhaseResource, PhaseState, PhaseTracker,
    PinnedPhase, Published, Refreshable, ResourceKind, SlotState,
};
use crate::primitives::bytes::ord;
use crate::primitives::freelist::FreeList;
use crate::storage::{default_metrics, StoreMetrics};
use crate::types::{NodeId, PhaseNumber, Result, StoreError};

/// Per-phase roots of a node pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodePoolState {
    /// Identifiers handed out and not released.
    pub nr_live: u64,
}

impl PhasePayload for NodePoolState {
    fn encode(&self, dst: &mut [u8]) -> Result<()> {
        ord::put_u64_be(&mut dst[0..8], self.nr_live);
        Ok(())
    }

    fn decode(src: &[u8]) -> Result<Self> {
        Ok(Self {
            nr_live: ord::get_u64_be(src)?,
        })
    }
}

/// Allocator of node identifiers that takes part in coordinated commits.
pub struct NodePool {
    name: String,
    manager: PhaseManager<NodePoolState>,
    alloc: FreeList,
    tracker: Arc<PhaseTracker>,
    published: Arc<Published<NodePoolState>>,
    working: NodePoolState,
    prepared_generation: Option<u64>,
    released: bool,
    metrics: Arc<dyn StoreMetrics>,
    span: Span,
}

impl NodePool {
    /// Creates a pool over `files`. The pool starts unselected.
    pub fn with_files(
        name: impl Into<String>,
        files: PhaseFiles,
        metrics: Arc<dyn StoreMetrics>,
    ) -> Self {
        let name = name.into();
        let span = tracing::debug_span!("nodepool", pool = %name);
        let manager = PhaseManager::new(name.clone(), ResourceKind::NodePool, files, &span);
        Self {
            name,
            manager,
            alloc: FreeList::new(NodeId::MIN.0),
            tracker: PhaseTracker::new(),
            published: Published::new(),
            working: NodePoolState::default(),
            prepared_generation: None,
            released: false,
            metrics,
            span,
        }
    }

    /// Opens `<name>.meta`, `<name>.free0` and `<name>.free1` under `dir`.
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        let files = PhaseFiles::open_dir(dir.as_ref(), name)?;
        Ok(Self::with_files(name, files, default_metrics()))
    }

    /// Recovers and selects the newest valid phase, clearing a never-written pool.
    pub fn select_latest(&mut self) -> Result<()> {
        match self.recover()?.last() {
            Some(phase) => self.select_phase(*phase),
            None => self.clear(),
        }
    }

    /// Hands out an identifier.
    pub fn allocate(&mut self) -> Result<NodeId> {
        self.check_mutable()?;
        if self.alloc.starved() {
            self.alloc.reclaim(self.tracker.oldest());
        }
        let id = NodeId(self.alloc.allocate());
        self.working.nr_live += 1;
        trace!(parent: &self.span, node = id.0, "nodepool.allocate");
        Ok(id)
    }

    /// Returns an identifier to the pool.
    pub fn release_node(&mut self, id: NodeId) -> Result<()> {
        self.check_mutable()?;
        if id.is_none() {
            return Err(StoreError::invalid("cannot release the wildcard node"));
        }
        self.alloc.free(id.0)?;
        self.working.nr_live = self.working.nr_live.saturating_sub(1);
        trace!(parent: &self.span, node = id.0, "nodepool.release");
        Ok(())
    }

    /// The identifier the next [`NodePool::allocate`] returns if nothing changes first.
    pub fn next_node(&self) -> NodeId {
        NodeId(self.alloc.peek_next())
    }

    /// True when `id` is handed out in the write phase.
    pub fn is_allocated(&self, id: NodeId) -> bool {
        self.alloc.is_allocated(id.0)
    }

    /// Number of live identifiers in the write phase.
    pub fn nr_nodes(&self) -> u64 {
        self.working.nr_live
    }

    /// The committed phase number and state.
    pub fn committed(&self) -> Option<(PhaseNumber, NodePoolState)> {
        self.published.get().map(|p| (p.phase, p.payload))
    }

    /// Allocator state, for diagnostics.
    pub fn allocator(&self) -> &FreeList {
        &self.alloc
    }

    /// Raw metaroot slots, for diagnostics.
    pub fn inspect_metaroots(&self) -> Result<[SlotState; 2]> {
        self.manager.inspect()
    }

    /// A view pinned to the committed phase. While it lives, identifiers released after
    /// that phase are not reused.
    pub fn view(&self) -> Result<NodePoolView> {
        let current = self
            .published
            .get()
            .ok_or(StoreError::Protocol("no phase selected"))?;
        Ok(NodePoolView {
            published: Arc::clone(&self.published),
            current: Some(current),
        })
    }

    fn check_mutable(&self) -> Result<()> {
        if self.released {
            return Err(StoreError::Protocol("node pool released; refresh before writing"));
        }
        self.manager.check_writable()
    }

    fn publish(&mut self, phase: PhaseNumber, generation: u64) {
        self.published.publish(PinnedPhase::new(
            &self.tracker,
            phase,
            generation,
            self.working,
        ));
    }
}

impl fmt::Debug for NodePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodePool")
            .field("name", &self.name)
            .field("state", &self.manager.state())
            .field("nr_live", &self.working.nr_live)
            .field("next", &self.alloc.peek_next())
            .finish()
    }
}

impl Refreshable for NodePool {
    fn refresh(&mut self) -> Result<()> {
        if self.manager.state() == PhaseState::Unselected {
            return Err(StoreError::Protocol("no phase selected"));
        }
        self.released = false;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if self.alloc.in_transaction() || self.manager.state() != PhaseState::Stable {
            return Err(StoreError::Protocol("cannot release with uncommitted changes"));
        }
        self.released = true;
        Ok(())
    }
}

impl PhaseResource for NodePool {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self) -> Result<PhaseNumber> {
        if self.manager.state() == PhaseState::Prepared {
            return Err(StoreError::Protocol("prepare called twice"));
        }
        self.manager.check_writable()?;
        let generation = if self.alloc.mutated_since_seal() {
            self.alloc.seal()
        } else {
            self.alloc.last_sealed()
        };
        let image = PhaseImage {
            payload: self.working,
            free: self.alloc.image(),
            generation,
        };
        let phase = self.manager.prepare(&image)?;
        self.prepared_generation = Some(generation);
        self.metrics.phase_prepared();
        debug!(parent: &self.span, phase = phase.0, nr_live = self.working.nr_live, "nodepool.prepare");
        Ok(phase)
    }

    fn commit(&mut self) -> Result<()> {
        let phase = self.manager.commit()?;
        let generation = self
            .prepared_generation
            .take()
            .ok_or(StoreError::Protocol("prepared generation missing"))?;
        self.publish(phase, generation);
        self.alloc.commit_tx();
        self.alloc.reclaim(self.tracker.oldest());
        self.metrics.phase_committed();
        debug!(parent: &self.span, phase = phase.0, "nodepool.commit");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.manager.rollback()?;
        let committed = self
            .published
            .get()
            .ok_or(StoreError::Protocol("no phase selected"))?;
        self.alloc.rollback_tx();
        self.working = committed.payload;
        self.prepared_generation = None;
        self.metrics.phase_rolled_back();
        debug!(parent: &self.span, phase = committed.phase.0, "nodepool.rollback");
        Ok(())
    }

    fn phase_number(&self) -> Result<PhaseNumber> {
        self.manager.phase_number()
    }

    fn recover(&mut self) -> Result<Vec<PhaseNumber>> {
        let phases = self.manager.recover()?;
        self.published.clear();
        self.prepared_generation = None;
        self.released = false;
        Ok(phases)
    }

    fn select_phase(&mut self, phase: PhaseNumber) -> Result<()> {
        let recovered = self.manager.load_phase(phase)?;
        let alloc = FreeList::from_image(
            NodeId::MIN.0,
            &recovered.image.free,
            recovered.image.generation,
        )?;
        if alloc.live_len() != recovered.image.payload.nr_live {
            return Err(StoreError::corruption(format!(
                "node pool {} records {} live nodes but its free list implies {}",
                self.name,
                recovered.image.payload.nr_live,
                alloc.live_len()
            )));
        }
        self.manager.select_phase(phase)?;
        self.alloc = alloc;
        self.working = recovered.image.payload;
        self.publish(phase, recovered.image.generation);
        self.prepared_generation = None;
        info!(parent: &self.span, phase = phase.0, nr_live = self.working.nr_live, "nodepool.select");
        Ok(())
    }

    fn clear_at(&mut self, phase: PhaseNumber) -> Result<()> {
        let alloc = FreeList::new(NodeId::MIN.0);
        let working = NodePoolState::default();
        let image = PhaseImage {
            payload: working,
            free: alloc.image(),
            generation: alloc.last_sealed(),
        };
        self.manager.clear_at(phase, &image, 0)?;
        self.alloc = alloc;
        self.working = working;
        self.publish(phase, image.generation);
        self.prepared_generation = None;
        self.released = false;
        info!(parent: &self.span, phase = phase.0, "nodepool.clear");
        Ok(())
    }

    fn state(&self) -> PhaseState {
        self.manager.state()
    }
}

/// Pins a committed node-pool phase.
pub struct NodePoolView {
    published: Arc<Published<NodePoolState>>,
    current: Option<Arc<PinnedPhase<NodePoolState>>>,
}

impl NodePoolView {
    /// Phase the view pins.
    pub fn phase(&self) -> Result<PhaseNumber> {
        self.current
            .as_ref()
            .map(|c| c.phase)
            .ok_or(StoreError::Protocol("view released; refresh before reading"))
    }

    /// Live identifiers in the pinned phase.
    pub fn nr_nodes(&self) -> Result<u64> {
        self.current
            .as_ref()
            .map(|c| c.payload.nr_live)
            .ok_or(StoreError::Protocol("view released; refresh before reading"))
    }
}

impl Refreshable for NodePoolView {
    fn refresh(&mut self) -> Result<()> {
        self.current = Some(
            self.published
                .get()
                .ok_or(StoreError::Protocol("no phase selected"))?,
        );
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.current = None;
        Ok(())
    }
}
