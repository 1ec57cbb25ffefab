//! A transactional RDF quad store.
//!
//! Quads of 64-bit node identifiers live in a [`StatementStore`] that keeps up to six
//! permuted B+ tree indexes in one copy-on-write block file. Durability comes from phases:
//! each resource keeps two metaroot slots and never overwrites the blocks of its committed
//! phase, so recovery only has to pick a slot. A [`SessionCoordinator`] commits several
//! resources, such as the statement store and the [`NodePool`], as one atomic unit and
//! records its decision so recovery picks matching phases.
//!
//! [`Database`] ties the pieces together from a [`DatabaseConfig`]:
//!
//! ```no_run
//! use quadstore::{Database, DatabaseConfig};
//!
//! let mut db = Database::open(DatabaseConfig::new("data"))?;
//! db.statements()?.lock().add_triple(1, 2, 3, 4)?;
//! db.commit()?;
//!
//! let snapshot = db.snapshot()?;
//! for quad in snapshot.find_tuples(1, 0, 0, 0)?.quads() {
//!     println!("{}", quad?);
//! }
//! # Ok::<(), quadstore::StoreError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Statistics, verification and metaroot dumps.
pub mod admin;
/// Configuration and the database façade.
pub mod db;
/// Phase-managed node identifier allocation.
pub mod nodepool;
/// Two-slot metaroots, phase state machine and read pins.
pub mod phase;
/// Block files, file I/O, byte codecs and the identifier allocator.
pub mod primitives;
/// Coordinated commits across resources.
pub mod session;
/// The statement store and its indexes.
pub mod storage;
/// Identifiers, quads and errors.
pub mod types;

pub use db::{Database, DatabaseConfig, ResourceConfig, DECISION_LOG_FILE};
pub use nodepool::{NodePool, NodePoolView};
pub use phase::{PhaseResource, PhaseState, Refreshable};
pub use session::{RecoveryReport, ResourceRegistry, SessionCoordinator};
pub use storage::{
    IndexId, StatementSnapshot, StatementStore, StoreIo, StoreOptions, StoreTuples,
};
pub use types::{NodeId, PhaseNumber, Quad, Result, StoreError};
