//! Core identifiers, the quad tuple and the crate-wide error type.

use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

/// Checksum helpers shared by metaroots and blocks.
pub mod checksum;

pub use checksum::{block_crc32, ids_crc32};

/// Opaque 64-bit node identifier handed out by the node pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Wildcard sentinel accepted positionally by find/exists. Never stored.
    pub const NONE: NodeId = NodeId(0);
    /// Smallest identifier that may appear in a stored quad.
    pub const MIN: NodeId = NodeId(1);

    /// Returns true when this identifier is the wildcard sentinel.
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("*")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Monotonic identifier of a committed or prepared phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PhaseNumber(pub u64);

impl PhaseNumber {
    /// Returns the phase number that follows this one.
    pub fn next(self) -> PhaseNumber {
        PhaseNumber(self.0 + 1)
    }
}

impl fmt::Display for PhaseNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a fixed-size block inside a block file. Block 0 is the null block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u64);

impl BlockId {
    /// The null block, used as the root of an empty tree.
    pub const NULL: BlockId = BlockId(0);

    /// Returns true for the null block.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// One column of a quad.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    /// Position 0.
    Subject,
    /// Position 1.
    Predicate,
    /// Position 2.
    Object,
    /// Position 3.
    Graph,
}

impl Column {
    /// All columns in quad position order.
    pub const ALL: [Column; 4] = [
        Column::Subject,
        Column::Predicate,
        Column::Object,
        Column::Graph,
    ];

    /// Position of the column inside a quad.
    pub fn position(self) -> usize {
        match self {
            Column::Subject => 0,
            Column::Predicate => 1,
            Column::Object => 2,
            Column::Graph => 3,
        }
    }

    /// Single-letter name used by index names (`S`, `P`, `O`, `G`).
    pub fn letter(self) -> char {
        match self {
            Column::Subject => 'S',
            Column::Predicate => 'P',
            Column::Object => 'O',
            Column::Graph => 'G',
        }
    }
}

/// A stored (subject, predicate, object, graph) tuple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Quad {
    /// Subject node.
    pub subject: NodeId,
    /// Predicate node.
    pub predicate: NodeId,
    /// Object node.
    pub object: NodeId,
    /// Graph node.
    pub graph: NodeId,
}

impl Quad {
    /// Builds a quad from four node identifiers.
    pub fn new(
        subject: impl Into<NodeId>,
        predicate: impl Into<NodeId>,
        object: impl Into<NodeId>,
        graph: impl Into<NodeId>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            graph: graph.into(),
        }
    }

    /// Builds a quad from an array in S, P, O, G order.
    pub fn from_array(nodes: [NodeId; 4]) -> Self {
        Self {
            subject: nodes[0],
            predicate: nodes[1],
            object: nodes[2],
            graph: nodes[3],
        }
    }

    /// Returns the nodes in S, P, O, G order.
    pub fn to_array(self) -> [NodeId; 4] {
        [self.subject, self.predicate, self.object, self.graph]
    }

    /// Returns the node stored in the given column.
    pub fn get(&self, column: Column) -> NodeId {
        self.to_array()[column.position()]
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({} {} {} {})",
            self.subject, self.predicate, self.object, self.graph
        )
    }
}

/// Errors raised by the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying file operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Persisted data failed validation.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// A caller supplied an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The phase protocol was driven out of order.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    /// Recovery found no usable phase for a resource that has existing data.
    #[error("no valid phase found for resource {0}")]
    NoValidPhase(String),
    /// A previous commit or rollback failed and left the resource unusable until recovery.
    #[error("resource {0} failed and must be recovered")]
    Failed(String),
    /// A coordinator participant voted no during prepare.
    #[error("participant {participant} failed to prepare: {source}")]
    PrepareFailed {
        /// Name of the participant that failed.
        participant: String,
        /// The participant's error.
        #[source]
        source: Box<StoreError>,
    },
    /// The commit decision is durable but not every participant finished committing.
    #[error("commit of participant {participant} incomplete, will be replayed on recovery: {source}")]
    CommitIncomplete {
        /// Name of the participant whose commit failed.
        participant: String,
        /// The participant's error.
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        StoreError::Corruption(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        StoreError::InvalidArgument(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
