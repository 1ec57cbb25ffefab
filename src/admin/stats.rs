use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_database;
use crate::admin::Result;
use crate::db::Database;
use crate::phase::{PhaseResource, PhaseState};
use crate::session::{Decision, RegisteredResource};
use crate::storage::btree::BTreeStatsSnapshot;

/// Per-participant statistics of a database directory.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    /// Database directory.
    pub directory: String,
    /// Total size of the files in the directory.
    pub disk_bytes: u64,
    /// Newest record in the decision log.
    pub latest_decision: Option<Decision>,
    /// One entry per participant, in commit order.
    pub resources: Vec<ResourceStats>,
}

/// State and sizes of one participant.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStats {
    /// Participant name.
    pub name: String,
    /// Phase manager state, in snake case.
    pub state: String,
    /// Prepared phase while prepared, else the committed one.
    pub phase: Option<u64>,
    /// Type-specific figures.
    #[serde(flatten)]
    pub detail: ResourceDetail,
}

/// Figures specific to a participant type, tagged by `kind`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceDetail {
    /// A statement store.
    Statements(StatementStats),
    /// A node pool.
    Nodes(NodePoolStats),
    /// A participant registered through a custom factory.
    Other,
}

/// Statement store figures.
#[derive(Debug, Clone, Serialize)]
pub struct StatementStats {
    /// Quads in the current write phase.
    pub nr_quads: u64,
    /// Maintained indexes.
    pub indexes: Vec<String>,
    /// Block size in bytes.
    pub block_size: usize,
    /// Blocks in the block file, including block 0.
    pub block_count: u64,
    /// Next never-used block id.
    pub high_water: u64,
    /// Blocks ready for reuse.
    pub free_blocks: usize,
    /// Freed blocks still visible to a pinned phase.
    pub pending_blocks: usize,
    /// Node cache and tree operation counters.
    pub btree: BTreeStatsSnapshot,
}

/// Node pool figures.
#[derive(Debug, Clone, Serialize)]
pub struct NodePoolStats {
    /// Allocated node ids.
    pub nr_nodes: u64,
    /// Id the next allocation returns.
    pub next_node: u64,
    /// Next never-used node id.
    pub high_water: u64,
    /// Released ids ready for reuse.
    pub free_ids: usize,
    /// Released ids still visible to a pinned phase.
    pub pending_ids: usize,
}

/// Opens the database and reports on every participant.
pub fn stats(opts: &AdminOpenOptions) -> Result<StatsReport> {
    let db = open_database(opts)?;
    stats_for(&db)
}

/// Reports on an open database.
pub fn stats_for(db: &Database) -> Result<StatsReport> {
    let directory = &db.config().directory;
    let mut resources = Vec::new();
    for (name, resource) in db.resources() {
        resources.push(resource_stats(name, resource)?);
    }
    Ok(StatsReport {
        directory: directory.display().to_string(),
        disk_bytes: directory_size(directory)?,
        latest_decision: db.coordinator().decision_log().latest().cloned(),
        resources,
    })
}

fn resource_stats(name: &str, resource: &RegisteredResource) -> Result<ResourceStats> {
    let (state, phase, detail) = match resource {
        RegisteredResource::Statements(store) => {
            let store = store.lock();
            let alloc = store.allocator();
            let blocks = store.node_store().blocks();
            let detail = ResourceDetail::Statements(StatementStats {
                nr_quads: store.nr_triples(),
                indexes: store.indexes().iter().map(|i| i.name().to_string()).collect(),
                block_size: blocks.block_size(),
                block_count: blocks.block_count()?,
                high_water: alloc.high_water(),
                free_blocks: alloc.reusable_len(),
                pending_blocks: alloc.pending_len(),
                btree: store.node_store().stats().snapshot(),
            });
            (store.state(), store.phase_number().ok(), detail)
        }
        RegisteredResource::Nodes(pool) => {
            let pool = pool.lock();
            let alloc = pool.allocator();
            let detail = ResourceDetail::Nodes(NodePoolStats {
                nr_nodes: pool.nr_nodes(),
                next_node: pool.next_node().0,
                high_water: alloc.high_water(),
                free_ids: alloc.reusable_len(),
                pending_ids: alloc.pending_len(),
            });
            (pool.state(), pool.phase_number().ok(), detail)
        }
        RegisteredResource::Other(shared) => {
            let shared = shared.lock();
            (shared.state(), shared.phase_number().ok(), ResourceDetail::Other)
        }
    };
    Ok(ResourceStats {
        name: name.to_string(),
        state: state_name(state).to_string(),
        phase: phase.map(|p| p.0),
        detail,
    })
}

fn state_name(state: PhaseState) -> &'static str {
    match state {
        PhaseState::Unselected => "unselected",
        PhaseState::Stable => "stable",
        PhaseState::Preparing => "preparing",
        PhaseState::Prepared => "prepared",
        PhaseState::Committing => "committing",
        PhaseState::RollingBack => "rolling_back",
        PhaseState::Failed => "failed",
    }
}

fn directory_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let meta = entry?.metadata()?;
        if meta.is_file() {
            total += meta.len();
        }
    }
    Ok(total)
}
