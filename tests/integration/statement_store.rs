#![allow(missing_docs)]

use std::collections::BTreeSet;

use quadstore::storage::{IndexId, StatementStore, StoreIo, StoreOptions};
use quadstore::types::{NodeId, PhaseNumber, Quad, Result};
use quadstore::{PhaseResource, StoreError};

const NONE: NodeId = NodeId::NONE;

fn fresh(io: &StoreIo) -> Result<StatementStore> {
    let mut store = StatementStore::with_io("statements", io.clone(), StoreOptions::new())?;
    store.select_latest()?;
    Ok(store)
}

fn commit(store: &mut StatementStore) -> Result<()> {
    store.prepare()?;
    store.commit()
}

fn all_quads(store: &mut StatementStore) -> Result<BTreeSet<Quad>> {
    store
        .find_tuples(NONE, NONE, NONE, NONE)?
        .quads()
        .collect::<Result<BTreeSet<_>>>()
}

#[test]
fn removal_requires_exact_match() -> Result<()> {
    let io = StoreIo::memory();
    let mut store = fresh(&io)?;
    store.add_triple(1, 2, 3, 1)?;
    store.add_triple(1, 2, 4, 2)?;
    store.add_triple(2, 5, 6, 2)?;

    assert!(!store.remove_triples(2, 5, 6, 7)?);
    assert_eq!(store.nr_triples(), 3);

    assert!(store.remove_triples(1, 2, 3, 1)?);
    assert!(!store.exists_triples(NONE, 2, 3, 1)?);
    assert!(store.exists_triples(NONE, 2, 4, 2)?);
    assert_eq!(store.nr_triples(), 2);
    Ok(())
}

#[test]
fn near_miss_removals_keep_the_store_non_empty() -> Result<()> {
    let io = StoreIo::memory();
    let mut store = fresh(&io)?;
    store.add_triple(1, 2, 3, 9)?;
    for (s, p, o, g) in [(2, 2, 3, 9), (1, 1, 3, 9), (1, 2, 2, 9), (1, 2, 3, 8)] {
        assert!(!store.remove_triples(s, p, o, g)?);
        assert!(!store.is_empty());
    }
    assert!(store.remove_triples(1, 2, 3, 9)?);
    assert!(store.is_empty());
    assert_eq!(store.nr_triples(), 0);
    Ok(())
}

#[test]
fn add_is_idempotent() -> Result<()> {
    let io = StoreIo::memory();
    let mut store = fresh(&io)?;
    assert!(store.add_triple(7, 8, 9, 10)?);
    assert!(!store.add_triple(7, 8, 9, 10)?);
    assert_eq!(store.nr_triples(), 1);
    commit(&mut store)?;
    assert!(!store.add_triple(7, 8, 9, 10)?);
    assert!(!store.is_dirty());
    Ok(())
}

#[test]
fn wildcards_in_mutations_are_rejected() -> Result<()> {
    let io = StoreIo::memory();
    let mut store = fresh(&io)?;
    let err = store.add_triple(1, NONE, 3, 4).unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
    let err = store.remove_triples(NONE, NONE, NONE, NONE).unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
    assert!(store.is_empty());
    Ok(())
}

#[test]
fn every_scan_path_sees_the_same_rows() -> Result<()> {
    let io = StoreIo::memory();
    let mut store = fresh(&io)?;
    for s in 1..=40u64 {
        store.add_triple(s, s % 3 + 1, s % 5 + 1, s % 2 + 1)?;
    }
    let expected = all_quads(&mut store)?;
    assert_eq!(expected.len() as u64, store.nr_triples());

    for index in IndexId::ALL {
        let via_index = store
            .find_tuples_in(index, [NONE; 4])?
            .quads()
            .collect::<Result<BTreeSet<_>>>()?;
        assert_eq!(via_index, expected, "index {index}");
    }
    for bits in 0..16u8 {
        let bound = [bits & 1 != 0, bits & 2 != 0, bits & 4 != 0, bits & 8 != 0];
        let via_bound = store
            .find_tuples_bound(bound)?
            .quads()
            .collect::<Result<BTreeSet<_>>>()?;
        assert_eq!(via_bound, expected, "bound {bound:?}");
    }

    let pattern = [NONE, NodeId(2), NONE, NodeId(1)];
    let filtered: BTreeSet<Quad> = expected
        .iter()
        .copied()
        .filter(|q| q.predicate == NodeId(2) && q.graph == NodeId(1))
        .collect();
    for index in IndexId::ALL {
        let rows = store
            .find_tuples_in(index, pattern)?
            .quads()
            .collect::<Result<BTreeSet<_>>>()?;
        assert_eq!(rows, filtered, "index {index}");
    }
    Ok(())
}

#[test]
fn double_prepare_leaves_prepared_phase_untouched() -> Result<()> {
    let io = StoreIo::memory();
    let mut store = fresh(&io)?;
    store.add_triple(1, 2, 3, 4)?;
    let phase = store.prepare()?;
    let err = store.prepare().unwrap_err();
    assert!(matches!(err, StoreError::Protocol(_)));
    assert_eq!(store.phase_number()?, phase);
    store.commit()?;
    assert_eq!(store.phase_number()?, phase);

    drop(store);
    let mut reopened = fresh(&io)?;
    assert_eq!(reopened.phase_number()?, phase);
    assert!(reopened.exists_triples(1, 2, 3, 4)?);
    Ok(())
}

#[test]
fn rollback_after_prepare_restores_content() -> Result<()> {
    let io = StoreIo::memory();
    let mut store = fresh(&io)?;
    for s in 1..=25u64 {
        store.add_triple(s, 1, 1, 1)?;
    }
    commit(&mut store)?;
    let before = all_quads(&mut store)?;
    let count = store.nr_triples();

    for s in 1..=10u64 {
        store.remove_triples(s, 1, 1, 1)?;
    }
    for s in 100..=140u64 {
        store.add_triple(s, 2, 2, 2)?;
    }
    store.prepare()?;
    store.rollback()?;

    assert_eq!(store.nr_triples(), count);
    assert_eq!(all_quads(&mut store)?, before);

    drop(store);
    let mut reopened = fresh(&io)?;
    assert_eq!(reopened.nr_triples(), count);
    assert_eq!(all_quads(&mut reopened)?, before);
    Ok(())
}

struct Crash {
    io: StoreIo,
    committed_phase: PhaseNumber,
    committed: BTreeSet<Quad>,
    prepared_phase: PhaseNumber,
    prepared: BTreeSet<Quad>,
}

/// Commits one phase, prepares a second one and drops the store before it commits.
fn crash_after_prepare() -> Result<Crash> {
    let io = StoreIo::memory();
    let mut store = fresh(&io)?;
    for s in 1..=30u64 {
        store.add_triple(s, 1, 2, 3)?;
    }
    commit(&mut store)?;
    let committed = all_quads(&mut store)?;
    let committed_phase = store.phase_number()?;

    for s in 1..=15u64 {
        store.remove_triples(s, 1, 2, 3)?;
    }
    for s in 200..=260u64 {
        store.add_triple(s, 4, 5, 6)?;
    }
    let prepared = all_quads(&mut store)?;
    let prepared_phase = store.prepare()?;
    drop(store);
    Ok(Crash {
        io,
        committed_phase,
        committed,
        prepared_phase,
        prepared,
    })
}

#[test]
fn crash_between_prepare_and_commit_leaves_two_consistent_phases() -> Result<()> {
    for pick_prepared in [false, true] {
        let crash = crash_after_prepare()?;
        let mut store = StatementStore::with_io("statements", crash.io.clone(), StoreOptions::new())?;
        let phases = store.recover()?;
        assert_eq!(phases, vec![crash.committed_phase, crash.prepared_phase]);

        let (phase, expected) = if pick_prepared {
            (crash.prepared_phase, &crash.prepared)
        } else {
            (crash.committed_phase, &crash.committed)
        };
        store.select_phase(phase)?;
        assert_eq!(store.nr_triples(), expected.len() as u64);
        for index in IndexId::ALL {
            let rows = store
                .find_tuples_in(index, [NONE; 4])?
                .quads()
                .collect::<Result<BTreeSet<_>>>()?;
            assert_eq!(&rows, expected, "index {index}");
        }

        // The selected phase keeps working: write, commit and reopen.
        store.add_triple(999, 1, 1, 1)?;
        commit(&mut store)?;
        drop(store);
        let mut reopened = fresh(&crash.io)?;
        assert_eq!(reopened.nr_triples(), expected.len() as u64 + 1);
        assert!(reopened.exists_triples(999, NONE, NONE, NONE)?);
    }
    Ok(())
}

#[test]
fn reopening_on_disk_preserves_quads() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let mut store = StatementStore::open_latest(dir.path(), "quads", StoreOptions::new())?;
        for s in 1..=500u64 {
            store.add_triple(s, s % 13 + 1, s % 17 + 1, 1)?;
        }
        commit(&mut store)?;
        for s in 1..=100u64 {
            store.remove_triples(s, s % 13 + 1, s % 17 + 1, 1)?;
        }
        commit(&mut store)?;
    }
    let mut store = StatementStore::open_latest(dir.path(), "quads", StoreOptions::new())?;
    assert_eq!(store.nr_triples(), 400);
    assert!(!store.exists_triples(50, NONE, NONE, NONE)?);
    assert!(store.exists_triples(450, NONE, NONE, 1)?);
    let rows = store.find_tuples(NONE, 3, NONE, NONE)?.quads().count();
    assert_eq!(rows, (101..=500u64).filter(|s| s % 13 + 1 == 3).count());
    Ok(())
}

#[test]
fn restricted_index_sets_still_answer_every_pattern() -> Result<()> {
    let io = StoreIo::memory();
    let options = StoreOptions::new().indexes([IndexId::Spog, IndexId::Gpos]);
    let mut store = StatementStore::with_io("statements", io.clone(), options)?;
    store.select_latest()?;
    for s in 1..=20u64 {
        store.add_triple(s, 2, s % 4 + 1, 9)?;
    }
    assert_eq!(store.find_tuples(NONE, NONE, 3, NONE)?.quads().count(), 5);
    assert_eq!(store.find_tuples(NONE, NONE, NONE, NONE)?.index(), IndexId::Spog);
    assert_eq!(store.find_tuples(NONE, 2, NONE, 9)?.index(), IndexId::Gpos);
    let err = store.find_tuples_in(IndexId::Ospg, [NONE; 4]).unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
    commit(&mut store)?;

    drop(store);
    let mut wrong = StatementStore::with_io("statements", io, StoreOptions::new())?;
    assert!(wrong.select_latest().is_err());
    Ok(())
}
