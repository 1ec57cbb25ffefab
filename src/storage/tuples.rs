//! Tuple cursors and the query plumbing shared by the writer and read-only views.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::trace;

use super::btree::{NodeSource, NodeStore, TreeCursor};
use super::metrics::StoreMetrics;
use super::order::IndexId;
use super::planner::{bound_mask, IndexSelector, ScanPlan};
use super::statement::StatementRoots;
use crate::phase::PinnedPhase;
use crate::types::{Column, NodeId, PhaseNumber, Quad, Result, StoreError};

/// Pattern in S, P, O, G order; [`NodeId::NONE`] marks a wildcard.
pub type Pattern = [NodeId; 4];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CursorState {
    Open,
    Exhausted,
    Closed,
}

/// Forward cursor over the quads matching a pattern, in the order of one index.
///
/// The cursor pins the phase it was opened on, so later writes and commits do not change
/// what it returns.
pub struct StoreTuples {
    cursor: TreeCursor<Arc<NodeStore>>,
    plan: ScanPlan,
    columns: SmallVec<[Column; 4]>,
    phase_number: PhaseNumber,
    view: Option<Arc<PinnedPhase<StatementRoots>>>,
    state: CursorState,
}

impl fmt::Debug for StoreTuples {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreTuples")
            .field("index", &self.plan.index())
            .field("columns", &self.columns)
            .field("phase", &self.phase_number)
            .field("state", &self.state)
            .finish()
    }
}

impl StoreTuples {
    /// The index being scanned.
    pub fn index(&self) -> IndexId {
        self.plan.index()
    }

    /// Unbound columns in index order, i.e. the columns of [`StoreTuples::next_row`].
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Phase the cursor reads.
    pub fn phase(&self) -> PhaseNumber {
        self.phase_number
    }

    /// True once [`StoreTuples::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state == CursorState::Closed
    }

    /// Returns the next matching quad.
    pub fn next_quad(&mut self) -> Result<Option<Quad>> {
        match self.state {
            CursorState::Closed => return Err(StoreError::Protocol("tuple cursor is closed")),
            CursorState::Exhausted => return Ok(None),
            CursorState::Open => {}
        }
        while let Some(key) = self.cursor.next_key()? {
            if !self.plan.in_range(&key) {
                break;
            }
            if self.plan.matches(&key) {
                return Ok(Some(self.plan.index().quad(&key)));
            }
        }
        self.state = CursorState::Exhausted;
        self.view = None;
        Ok(None)
    }

    /// Returns the unbound columns of the next matching quad, in [`StoreTuples::columns`]
    /// order.
    pub fn next_row(&mut self) -> Result<Option<SmallVec<[NodeId; 4]>>> {
        let Some(quad) = self.next_quad()? else {
            return Ok(None);
        };
        Ok(Some(self.columns.iter().map(|c| quad.get(*c)).collect()))
    }

    /// Releases the pinned phase. Further reads fail.
    pub fn close(&mut self) {
        self.state = CursorState::Closed;
        self.view = None;
    }

    /// Consumes the cursor as an iterator of quads.
    pub fn quads(self) -> Quads {
        Quads { inner: self }
    }
}

/// Iterator adapter returned by [`StoreTuples::quads`].
pub struct Quads {
    inner: StoreTuples,
}

impl Iterator for Quads {
    type Item = Result<Quad>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next_quad().transpose()
    }
}

/// Index configuration and node access needed to answer patterns.
#[derive(Clone)]
pub(crate) struct QueryContext {
    pub(crate) store: Arc<NodeStore>,
    pub(crate) indexes: Vec<IndexId>,
    pub(crate) selector: Arc<dyn IndexSelector>,
    pub(crate) metrics: Arc<dyn StoreMetrics>,
}

impl QueryContext {
    /// Picks the index for `pattern`, or checks that a forced index is registered.
    pub(crate) fn choose(&self, pattern: &Pattern, forced: Option<IndexId>) -> Result<IndexId> {
        match forced {
            Some(index) if self.indexes.contains(&index) => Ok(index),
            Some(index) => Err(StoreError::invalid(format!(
                "index {index} is not registered"
            ))),
            None => Ok(self.selector.select(&self.indexes, bound_mask(*pattern))),
        }
    }

    /// Opens a cursor over a pinned phase.
    pub(crate) fn open(
        &self,
        view: Arc<PinnedPhase<StatementRoots>>,
        pattern: Pattern,
        forced: Option<IndexId>,
    ) -> Result<StoreTuples> {
        let index = self.choose(&pattern, forced)?;
        let plan = ScanPlan::new(index, pattern);
        let cursor = TreeCursor::seek(Arc::clone(&self.store), view.payload.root(index), plan.lo())?;
        self.metrics.tuples_opened(index.name());
        trace!(
            index = index.name(),
            phase = view.phase.0,
            prefix = plan.prefix(),
            residual = plan.has_residual(),
            "statements.find"
        );
        Ok(StoreTuples {
            cursor,
            columns: plan.free_columns(),
            plan,
            phase_number: view.phase,
            view: Some(view),
            state: CursorState::Open,
        })
    }

    /// True when some quad under `roots` matches `pattern`.
    pub(crate) fn exists<S: NodeSource>(
        &self,
        src: S,
        roots: &StatementRoots,
        pattern: Pattern,
    ) -> Result<bool> {
        let index = self.choose(&pattern, None)?;
        let plan = ScanPlan::new(index, pattern);
        let mut cursor = TreeCursor::seek(src, roots.root(index), plan.lo())?;
        while let Some(key) = cursor.next_key()? {
            if !plan.in_range(&key) {
                return Ok(false);
            }
            if plan.matches(&key) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
