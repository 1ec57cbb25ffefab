use std::sync::Arc;

use super::node::Node;
use super::store::NodeSource;
use super::tree::child_index;
use crate::storage::order::IndexKey;
use crate::types::{BlockId, Result, StoreError};

/// Forward iterator over the keys of one tree, starting at the first key `>= lo`.
///
/// Holds the path from the root as `(node, position)` frames, so nodes stay alive for the
/// cursor's lifetime even if the tree is rewritten underneath.
pub struct TreeCursor<S> {
    src: S,
    stack: Vec<(Arc<Node>, usize)>,
}

impl<S: NodeSource> TreeCursor<S> {
    /// Positions a cursor at the first key `>= lo`.
    pub fn seek(src: S, root: BlockId, lo: &IndexKey) -> Result<Self> {
        let mut cursor = Self {
            src,
            stack: Vec::new(),
        };
        if root.is_null() {
            return Ok(cursor);
        }
        let mut id = root;
        loop {
            let node = cursor.src.node(id)?;
            match &*node {
                Node::Internal(entries) => {
                    let idx = child_index(entries, lo);
                    id = entries[idx].1;
                    cursor.stack.push((Arc::clone(&node), idx));
                }
                Node::Leaf(keys) => {
                    let pos = keys.partition_point(|k| k < lo);
                    cursor.stack.push((Arc::clone(&node), pos));
                    break;
                }
            }
        }
        Ok(cursor)
    }

    /// Returns the next key, or `None` at the end of the tree.
    pub fn next_key(&mut self) -> Result<Option<IndexKey>> {
        loop {
            match self.stack.last_mut() {
                None => return Ok(None),
                Some((node, pos)) => match &**node {
                    Node::Leaf(keys) => {
                        if let Some(key) = keys.get(*pos) {
                            *pos += 1;
                            return Ok(Some(*key));
                        }
                    }
                    Node::Internal(_) => {
                        return Err(StoreError::corruption("cursor positioned on internal node"))
                    }
                },
            }
            self.stack.pop();
            self.advance()?;
        }
    }

    fn advance(&mut self) -> Result<()> {
        loop {
            let next_child = match self.stack.last_mut() {
                None => return Ok(()),
                Some((node, idx)) => match &**node {
                    Node::Internal(entries) if *idx + 1 < entries.len() => {
                        *idx += 1;
                        Some(entries[*idx].1)
                    }
                    _ => None,
                },
            };
            match next_child {
                Some(id) => return self.descend_leftmost(id),
                None => {
                    self.stack.pop();
                }
            }
        }
    }

    fn descend_leftmost(&mut self, mut id: BlockId) -> Result<()> {
        loop {
            let node = self.src.node(id)?;
            let next = match &*node {
                Node::Internal(entries) => match entries.first() {
                    Some((_, child)) => Some(*child),
                    None => return Err(StoreError::corruption("empty internal node")),
                },
                Node::Leaf(_) => None,
            };
            self.stack.push((node, 0));
            match next {
                Some(child) => id = child,
                None => return Ok(()),
            }
        }
    }
}
