use super::*;
use crate::phase::PhaseTracker;
use crate::primitives::blockfile::{BlockFile, MIN_BLOCK_SIZE};
use crate::primitives::io::MemFileIo;
use crate::storage::metrics::default_metrics;
use crate::storage::order::IndexKey;
use crate::types::{BlockId, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::sync::Arc;

fn space_with_tracker() -> (WriteSpace, Arc<PhaseTracker>) {
    let blocks = BlockFile::new(Arc::new(MemFileIo::new()), MIN_BLOCK_SIZE).unwrap();
    let store = Arc::new(NodeStore::new(blocks, 64, default_metrics()));
    let tracker = PhaseTracker::new();
    (WriteSpace::new(store, Arc::clone(&tracker)), tracker)
}

fn space() -> WriteSpace {
    space_with_tracker().0
}

fn collect<S: NodeSource>(src: S, root: BlockId) -> Result<Vec<IndexKey>> {
    let mut cursor = TreeCursor::seek(src, root, &[0; 4])?;
    let mut out = Vec::new();
    while let Some(key) = cursor.next_key()? {
        out.push(key);
    }
    Ok(out)
}

fn key(n: u64) -> IndexKey {
    [n / 7 + 1, n % 7 + 1, n + 1, 1]
}

fn check_structure(space: &WriteSpace, root: BlockId) -> Result<usize> {
    let capacity = space.capacity();
    let mut nodes = 0;
    walk(space, root, &mut |_, node| {
        nodes += 1;
        assert!(node.len() <= capacity.limit(node), "node over capacity");
        assert!(!node.is_empty(), "empty node reachable");
        Ok(())
    })?;
    Ok(nodes)
}

#[test]
fn random_mutations_match_reference() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let mut space = space();
    let mut root = BlockId::NULL;
    let mut reference = BTreeSet::new();
    for step in 0..3000 {
        let k = key(rng.gen_range(0..400));
        if rng.gen_bool(0.6) {
            let (new_root, inserted) = insert(&mut space, root, k)?;
            assert_eq!(inserted, reference.insert(k));
            root = new_root;
        } else {
            let (new_root, removed) = remove(&mut space, root, k)?;
            assert_eq!(removed, reference.remove(&k));
            root = new_root;
        }
        if step % 250 == 0 {
            space.seal()?;
            space.commit();
        }
    }
    let expected: Vec<IndexKey> = reference.iter().copied().collect();
    assert_eq!(collect(&space, root)?, expected);
    check_structure(&space, root)?;
    Ok(())
}

#[test]
fn removing_everything_yields_null_root() -> Result<()> {
    let mut space = space();
    let mut root = BlockId::NULL;
    for n in 0..200 {
        root = insert(&mut space, root, key(n))?.0;
    }
    space.seal()?;
    for n in (0..200).rev() {
        let (new_root, removed) = remove(&mut space, root, key(n))?;
        assert!(removed);
        root = new_root;
    }
    assert!(root.is_null());
    assert!(!remove(&mut space, root, key(1))?.1);
    Ok(())
}

#[test]
fn sealed_tree_is_unchanged_by_later_writes() -> Result<()> {
    let (mut space, tracker) = space_with_tracker();
    let mut root = BlockId::NULL;
    for n in 0..100 {
        root = insert(&mut space, root, key(n))?.0;
    }
    let generation = space.seal()?;
    let _pin = tracker.pin(generation);
    space.commit();
    let sealed_root = root;
    let before = collect(Arc::clone(space.store()), sealed_root)?;

    for n in 100..160 {
        root = insert(&mut space, root, key(n))?.0;
    }
    for n in 0..50 {
        root = remove(&mut space, root, key(n))?.0;
    }
    space.seal()?;
    assert_ne!(root, sealed_root);
    assert_eq!(collect(Arc::clone(space.store()), sealed_root)?, before);
    assert!(space.store().stats().snapshot().copies > 0);
    Ok(())
}

#[test]
fn cursor_seeks_to_lower_bound() -> Result<()> {
    let mut space = space();
    let mut root = BlockId::NULL;
    for n in (0..300).step_by(3) {
        root = insert(&mut space, root, [n, 0, 0, 0])?.0;
    }
    let mut cursor = TreeCursor::seek(&space, root, &[100, 0, 0, 0])?;
    assert_eq!(cursor.next_key()?, Some([102, 0, 0, 0]));
    assert_eq!(cursor.next_key()?, Some([105, 0, 0, 0]));
    let mut past_end = TreeCursor::seek(&space, root, &[1000, 0, 0, 0])?;
    assert_eq!(past_end.next_key()?, None);
    Ok(())
}

#[test]
fn rollback_discards_unsealed_nodes() -> Result<()> {
    let mut space = space();
    let mut root = BlockId::NULL;
    for n in 0..40 {
        root = insert(&mut space, root, key(n))?.0;
    }
    space.seal()?;
    space.commit();
    let committed = root;
    let high_water = space.alloc().high_water();

    for n in 40..80 {
        root = insert(&mut space, root, key(n))?.0;
    }
    assert!(space.dirty_len() > 0);
    space.rollback();
    assert_eq!(space.dirty_len(), 0);
    assert_eq!(collect(&space, committed)?.len(), 40);
    assert_eq!(space.alloc().live_len(), high_water - 1);
    Ok(())
}
