use crate::primitives::blockfile::{BlockKind, RawBlock};
use crate::primitives::bytes::{buf::Reader, ord};
use crate::storage::order::IndexKey;
use crate::types::{BlockId, Result, StoreError};

const KEY_LEN: usize = 32;
const ENTRY_LEN: usize = KEY_LEN + 8;

/// Decoded tree node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// Sorted, distinct keys.
    Leaf(Vec<IndexKey>),
    /// `(separator, child)` pairs. Child `i` holds keys `>= separator[i]` and
    /// `< separator[i + 1]`; keys below the first separator also route to child 0.
    Internal(Vec<(IndexKey, BlockId)>),
}

impl Node {
    /// Number of keys or children.
    pub fn len(&self) -> usize {
        match self {
            Node::Leaf(keys) => keys.len(),
            Node::Internal(entries) => entries.len(),
        }
    }

    /// True for a node without entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest key or separator.
    pub fn first_key(&self) -> Option<IndexKey> {
        match self {
            Node::Leaf(keys) => keys.first().copied(),
            Node::Internal(entries) => entries.first().map(|(k, _)| *k),
        }
    }

    /// Splits at the midpoint; the right half keeps the upper entries.
    pub fn split(self) -> (Node, Node) {
        match self {
            Node::Leaf(mut keys) => {
                let right = keys.split_off(keys.len() / 2);
                (Node::Leaf(keys), Node::Leaf(right))
            }
            Node::Internal(mut entries) => {
                let right = entries.split_off(entries.len() / 2);
                (Node::Internal(entries), Node::Internal(right))
            }
        }
    }

    pub(crate) fn encode(&self) -> (BlockKind, u16, Vec<u8>) {
        match self {
            Node::Leaf(keys) => {
                let mut body = vec![0u8; keys.len() * KEY_LEN];
                for (chunk, key) in body.chunks_exact_mut(KEY_LEN).zip(keys) {
                    put_key(chunk, key);
                }
                (BlockKind::Leaf, keys.len() as u16, body)
            }
            Node::Internal(entries) => {
                let mut body = vec![0u8; entries.len() * ENTRY_LEN];
                for (chunk, (key, child)) in body.chunks_exact_mut(ENTRY_LEN).zip(entries) {
                    put_key(&mut chunk[..KEY_LEN], key);
                    ord::put_u64_be(&mut chunk[KEY_LEN..], child.0);
                }
                (BlockKind::Internal, entries.len() as u16, body)
            }
        }
    }

    pub(crate) fn decode(id: BlockId, raw: &RawBlock) -> Result<Node> {
        let count = raw.count as usize;
        let mut reader = Reader::new(&raw.body);
        match raw.kind {
            BlockKind::Leaf => {
                if count * KEY_LEN > raw.body.len() {
                    return Err(overfull(id, count));
                }
                let mut keys = Vec::with_capacity(count);
                for _ in 0..count {
                    keys.push(read_key(&mut reader)?);
                }
                if keys.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(StoreError::corruption(format!(
                        "leaf block {} keys out of order",
                        id.0
                    )));
                }
                Ok(Node::Leaf(keys))
            }
            BlockKind::Internal => {
                if count == 0 || count * ENTRY_LEN > raw.body.len() {
                    return Err(overfull(id, count));
                }
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = read_key(&mut reader)?;
                    let child = BlockId(reader.u64()?);
                    if child.is_null() {
                        return Err(StoreError::corruption(format!(
                            "internal block {} points at the null block",
                            id.0
                        )));
                    }
                    entries.push((key, child));
                }
                Ok(Node::Internal(entries))
            }
        }
    }
}

/// Maximum entries per node kind for a block body size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capacity {
    /// Keys per leaf.
    pub leaf: usize,
    /// Children per internal node.
    pub internal: usize,
}

impl Capacity {
    /// Capacity for blocks whose body holds `body_len` bytes.
    pub fn for_body(body_len: usize) -> Self {
        Self {
            leaf: body_len / KEY_LEN,
            internal: body_len / ENTRY_LEN,
        }
    }

    pub(crate) fn limit(&self, node: &Node) -> usize {
        match node {
            Node::Leaf(_) => self.leaf,
            Node::Internal(_) => self.internal,
        }
    }

    /// Below this many entries a node tries to merge with a sibling.
    pub(crate) fn min_fill(&self, node: &Node) -> usize {
        (self.limit(node) / 4).max(1)
    }
}

fn put_key(dst: &mut [u8], key: &IndexKey) {
    for (chunk, value) in dst.chunks_exact_mut(8).zip(key) {
        ord::put_u64_be(chunk, *value);
    }
}

fn read_key(reader: &mut Reader<'_>) -> Result<IndexKey> {
    Ok([reader.u64()?, reader.u64()?, reader.u64()?, reader.u64()?])
}

fn overfull(id: BlockId, count: usize) -> StoreError {
    StoreError::corruption(format!("block {} has impossible entry count {count}", id.0))
}
