#![forbid(unsafe_code)]

//! Copy-on-write B+ trees of permuted quad keys.
//!
//! All indexes of a statement store live in one block file. Nodes written in the current,
//! unsealed generation are updated in place; anything older is copied to a new block and
//! the old block is released through the allocator once no phase or reader can reach it.

mod cursor;
mod node;
mod stats;
mod store;
mod tree;

pub use cursor::TreeCursor;
pub use node::{Capacity, Node};
pub use stats::{BTreeStats, BTreeStatsSnapshot};
pub use store::{NodeSource, NodeStore, WriteSpace};
pub(crate) use tree::{insert, remove, walk};

#[cfg(test)]
mod tests;
