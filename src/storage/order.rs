//! Physical quad orderings.

use std::fmt;
use std::str::FromStr;

use crate::types::{Column, NodeId, Quad, StoreError};

/// A quad permuted into an index's column order.
pub type IndexKey = [u64; 4];

/// One of the six physical orderings a statement store can maintain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexId {
    /// Subject, predicate, object, graph.
    Spog,
    /// Predicate, object, subject, graph.
    Posg,
    /// Object, subject, predicate, graph.
    Ospg,
    /// Graph, subject, predicate, object.
    Gspo,
    /// Graph, predicate, object, subject.
    Gpos,
    /// Graph, object, subject, predicate.
    Gosp,
}

impl IndexId {
    /// Every ordering, lowest id first.
    pub const ALL: [IndexId; 6] = [
        IndexId::Spog,
        IndexId::Posg,
        IndexId::Ospg,
        IndexId::Gspo,
        IndexId::Gpos,
        IndexId::Gosp,
    ];

    /// Numeric id used in the metaroot mask and for tie-breaking.
    pub fn id(self) -> usize {
        match self {
            IndexId::Spog => 0,
            IndexId::Posg => 1,
            IndexId::Ospg => 2,
            IndexId::Gspo => 3,
            IndexId::Gpos => 4,
            IndexId::Gosp => 5,
        }
    }

    /// Looks an index up by numeric id.
    pub fn from_id(id: usize) -> Option<IndexId> {
        Self::ALL.get(id).copied()
    }

    /// Key columns in order.
    pub fn columns(self) -> [Column; 4] {
        use Column::*;
        match self {
            IndexId::Spog => [Subject, Predicate, Object, Graph],
            IndexId::Posg => [Predicate, Object, Subject, Graph],
            IndexId::Ospg => [Object, Subject, Predicate, Graph],
            IndexId::Gspo => [Graph, Subject, Predicate, Object],
            IndexId::Gpos => [Graph, Predicate, Object, Subject],
            IndexId::Gosp => [Graph, Object, Subject, Predicate],
        }
    }

    /// Upper-case name such as `SPOG`.
    pub fn name(self) -> &'static str {
        match self {
            IndexId::Spog => "SPOG",
            IndexId::Posg => "POSG",
            IndexId::Ospg => "OSPG",
            IndexId::Gspo => "GSPO",
            IndexId::Gpos => "GPOS",
            IndexId::Gosp => "GOSP",
        }
    }

    /// Permutes quad fields (S,P,O,G order, wildcards allowed) into key order.
    pub fn permute(self, nodes: [NodeId; 4]) -> IndexKey {
        self.columns().map(|c| nodes[c.position()].0)
    }

    /// Permutes a stored quad into key order.
    pub fn key(self, quad: &Quad) -> IndexKey {
        self.permute(quad.to_array())
    }

    /// Restores a quad from a key in this index's order.
    pub fn quad(self, key: &IndexKey) -> Quad {
        let mut nodes = [NodeId::NONE; 4];
        for (value, column) in key.iter().zip(self.columns()) {
            nodes[column.position()] = NodeId(*value);
        }
        Quad::from_array(nodes)
    }

    /// Number of leading key columns bound in `bound` (indexed by quad position).
    pub fn prefix_len(self, bound: [bool; 4]) -> usize {
        self.columns()
            .iter()
            .take_while(|c| bound[c.position()])
            .count()
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IndexId::ALL
            .iter()
            .copied()
            .find(|id| id.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| StoreError::invalid(format!("unknown index {s}")))
    }
}

/// Bit mask of registered indexes as stored in the metaroot.
pub fn index_mask(indexes: &[IndexId]) -> u32 {
    indexes.iter().fold(0, |mask, id| mask | (1 << id.id()))
}

/// Indexes named by a metaroot mask, lowest id first.
pub fn indexes_from_mask(mask: u32) -> Vec<IndexId> {
    IndexId::ALL
        .iter()
        .copied()
        .filter(|id| mask & (1 << id.id()) != 0)
        .collect()
}
