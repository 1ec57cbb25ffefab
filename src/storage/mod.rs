//! Statement storage.
//!
//! A [`StatementStore`] keeps quads in up to six B+ tree indexes, one per column
//! permutation, all sharing one block file. Trees are copy-on-write against sealed
//! generations so cursors and snapshots read a fixed phase while the writer continues.

/// Copy-on-write B+ trees.
pub mod btree;

mod metrics;
mod options;
mod order;
mod planner;
mod statement;
mod tuples;

/// Metrics sinks.
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, StoreMetrics};

/// Store configuration.
pub use options::StoreOptions;

/// Index permutations.
pub use order::{index_mask, indexes_from_mask, IndexId, IndexKey};

/// Index selection.
pub use planner::{bound_mask, IndexSelector, PrefixCoverage, ScanPlan};

pub use statement::{StatementRoots, StatementSnapshot, StatementStore, StoreIo};
pub use tuples::{Pattern, Quads, StoreTuples};
