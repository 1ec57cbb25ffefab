//! Copy-on-write insert and remove over a [`WriteSpace`].

use std::sync::Arc;

use super::node::Node;
use super::store::{NodeSource, WriteSpace};
use crate::storage::order::IndexKey;
use crate::types::{BlockId, Result, StoreError};

enum Insert {
    Unchanged,
    Replaced(BlockId),
    Split(BlockId, IndexKey, BlockId),
}

enum Remove {
    Missing,
    Updated { id: BlockId, underfull: bool },
}

/// Index of the child that may hold `key`.
pub(crate) fn child_index(entries: &[(IndexKey, BlockId)], key: &IndexKey) -> usize {
    entries
        .partition_point(|(sep, _)| sep <= key)
        .saturating_sub(1)
}

/// Inserts `key` into the tree rooted at `root`. Returns the new root and whether the key
/// was absent.
pub(crate) fn insert(space: &mut WriteSpace, root: BlockId, key: IndexKey) -> Result<(BlockId, bool)> {
    if root.is_null() {
        return Ok((space.allocate(Node::Leaf(vec![key])), true));
    }
    match insert_into(space, root, key)? {
        Insert::Unchanged => Ok((root, false)),
        Insert::Replaced(id) => Ok((id, true)),
        Insert::Split(left, sep, right) => {
            let left_first = space
                .node(left)?
                .first_key()
                .ok_or_else(|| StoreError::corruption("split produced an empty node"))?;
            let id = space.allocate(Node::Internal(vec![(left_first, left), (sep, right)]));
            Ok((id, true))
        }
    }
}

fn insert_into(space: &mut WriteSpace, id: BlockId, key: IndexKey) -> Result<Insert> {
    let node = space.node(id)?;
    match &*node {
        Node::Leaf(keys) => {
            let pos = match keys.binary_search(&key) {
                Ok(_) => return Ok(Insert::Unchanged),
                Err(pos) => pos,
            };
            let mut keys = keys.clone();
            keys.insert(pos, key);
            store(space, id, Node::Leaf(keys))
        }
        Node::Internal(entries) => {
            let idx = child_index(entries, &key);
            let child = entries[idx].1;
            match insert_into(space, child, key)? {
                Insert::Unchanged => Ok(Insert::Unchanged),
                Insert::Replaced(new_child) if new_child == child => Ok(Insert::Replaced(id)),
                Insert::Replaced(new_child) => {
                    let mut entries = entries.clone();
                    entries[idx].1 = new_child;
                    store(space, id, Node::Internal(entries))
                }
                Insert::Split(left, sep, right) => {
                    let mut entries = entries.clone();
                    entries[idx].1 = left;
                    entries.insert(idx + 1, (sep, right));
                    store(space, id, Node::Internal(entries))
                }
            }
        }
    }
}

fn store(space: &mut WriteSpace, id: BlockId, node: Node) -> Result<Insert> {
    let capacity = space.capacity();
    if node.len() <= capacity.limit(&node) {
        return Ok(Insert::Replaced(space.rewrite(id, node)?));
    }
    match node {
        Node::Leaf(_) => space.store().stats().inc_leaf_splits(),
        Node::Internal(_) => space.store().stats().inc_internal_splits(),
    }
    let (left, right) = node.split();
    let sep = right
        .first_key()
        .ok_or_else(|| StoreError::corruption("split produced an empty node"))?;
    let left = space.rewrite(id, left)?;
    let right = space.allocate(right);
    Ok(Insert::Split(left, sep, right))
}

/// Removes `key` from the tree rooted at `root`. Returns the new root and whether the key
/// was present.
pub(crate) fn remove(space: &mut WriteSpace, root: BlockId, key: IndexKey) -> Result<(BlockId, bool)> {
    if root.is_null() {
        return Ok((root, false));
    }
    let mut root = match remove_from(space, root, key)? {
        Remove::Missing => return Ok((root, false)),
        Remove::Updated { id, .. } => id,
    };
    while !root.is_null() {
        let node = space.node(root)?;
        match &*node {
            Node::Internal(entries) if entries.len() == 1 => {
                let child = entries[0].1;
                space.free(root)?;
                root = child;
            }
            _ => break,
        }
    }
    Ok((root, true))
}

fn remove_from(space: &mut WriteSpace, id: BlockId, key: IndexKey) -> Result<Remove> {
    let node = space.node(id)?;
    let capacity = space.capacity();
    match &*node {
        Node::Leaf(keys) => {
            let Ok(pos) = keys.binary_search(&key) else {
                return Ok(Remove::Missing);
            };
            if keys.len() == 1 {
                space.free(id)?;
                return Ok(Remove::Updated {
                    id: BlockId::NULL,
                    underfull: true,
                });
            }
            let mut keys = keys.clone();
            keys.remove(pos);
            let leaf = Node::Leaf(keys);
            let underfull = leaf.len() < capacity.min_fill(&leaf);
            Ok(Remove::Updated {
                id: space.rewrite(id, leaf)?,
                underfull,
            })
        }
        Node::Internal(entries) => {
            let idx = child_index(entries, &key);
            let child = entries[idx].1;
            let (new_child, child_underfull) = match remove_from(space, child, key)? {
                Remove::Missing => return Ok(Remove::Missing),
                Remove::Updated { id, underfull } => (id, underfull),
            };
            if new_child == child && !child_underfull {
                return Ok(Remove::Updated {
                    id,
                    underfull: node.len() < capacity.min_fill(&node),
                });
            }
            let mut entries = entries.clone();
            if new_child.is_null() {
                entries.remove(idx);
                if entries.is_empty() {
                    space.free(id)?;
                    return Ok(Remove::Updated {
                        id: BlockId::NULL,
                        underfull: true,
                    });
                }
            } else {
                entries[idx].1 = new_child;
                if child_underfull {
                    merge_with_sibling(space, &mut entries, idx)?;
                }
            }
            let internal = Node::Internal(entries);
            let underfull = internal.len() < capacity.min_fill(&internal);
            Ok(Remove::Updated {
                id: space.rewrite(id, internal)?,
                underfull,
            })
        }
    }
}

fn merge_with_sibling(
    space: &mut WriteSpace,
    entries: &mut Vec<(IndexKey, BlockId)>,
    idx: usize,
) -> Result<()> {
    if entries.len() < 2 {
        return Ok(());
    }
    let (li, ri) = if idx + 1 < entries.len() {
        (idx, idx + 1)
    } else {
        (idx - 1, idx)
    };
    let capacity = space.capacity();
    let left = space.node(entries[li].1)?;
    let right = space.node(entries[ri].1)?;
    let merged = match (&*left, &*right) {
        (Node::Leaf(a), Node::Leaf(b)) => {
            if a.len() + b.len() > capacity.leaf {
                return Ok(());
            }
            let mut keys = Vec::with_capacity(a.len() + b.len());
            keys.extend_from_slice(a);
            keys.extend_from_slice(b);
            Node::Leaf(keys)
        }
        (Node::Internal(a), Node::Internal(b)) => {
            if a.len() + b.len() > capacity.internal {
                return Ok(());
            }
            let Some((_, first_child)) = b.first() else {
                return Err(StoreError::corruption("empty internal node"));
            };
            // The right node's own first separator may be stale; the parent's is exact.
            let mut merged = Vec::with_capacity(a.len() + b.len());
            merged.extend_from_slice(a);
            merged.push((entries[ri].0, *first_child));
            merged.extend_from_slice(&b[1..]);
            Node::Internal(merged)
        }
        _ => return Err(StoreError::corruption("sibling nodes at different depths")),
    };
    space.free(entries[li].1)?;
    space.free(entries[ri].1)?;
    let id = space.allocate(merged);
    entries[li].1 = id;
    entries.remove(ri);
    space.store().stats().inc_merges();
    Ok(())
}

/// Visits every node reachable from `root`, parents before children.
pub(crate) fn walk(
    src: &dyn NodeSource,
    root: BlockId,
    visit: &mut dyn FnMut(BlockId, &Node) -> Result<()>,
) -> Result<()> {
    if root.is_null() {
        return Ok(());
    }
    let mut stack: Vec<BlockId> = vec![root];
    while let Some(id) = stack.pop() {
        let node: Arc<Node> = src.node(id)?;
        visit(id, &node)?;
        if let Node::Internal(entries) = &*node {
            stack.extend(entries.iter().rev().map(|(_, child)| *child));
        }
    }
    Ok(())
}
