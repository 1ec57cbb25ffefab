#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::mpsc;
use std::thread;

use quadstore::{Database, DatabaseConfig, NodeId, Quad, Refreshable, Result, StoreError};

fn open(dir: &std::path::Path) -> Result<Database> {
    let mut config = DatabaseConfig::new(dir);
    config.block_size = 512;
    config.sync = false;
    Database::open(config)
}

fn quad(i: u64) -> Quad {
    Quad::new(i, i % 13 + 1, i % 29 + 1, 1)
}

fn snapshot_quads(snapshot: &quadstore::StatementSnapshot) -> Result<BTreeSet<Quad>> {
    snapshot.find_tuples(0, 0, 0, 0)?.quads().collect()
}

#[test]
fn snapshot_survives_heavy_churn() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut db = open(dir.path())?;
    let statements = db.statements()?;
    {
        let mut store = statements.lock();
        for i in 1..=400 {
            let q = quad(i);
            store.add_triple(q.subject, q.predicate, q.object, q.graph)?;
        }
    }
    db.commit()?;
    let snapshot = db.snapshot()?;
    let before = snapshot_quads(&snapshot)?;
    assert_eq!(before.len(), 400);

    // Replace every quad over several commits so freed blocks become reusable.
    for round in 0..4u64 {
        {
            let mut store = statements.lock();
            for i in (1..=400).filter(|i| i % 4 == round) {
                let q = quad(i);
                store.remove_triples(q.subject, q.predicate, q.object, q.graph)?;
                let r = quad(i + 1000);
                store.add_triple(r.subject, r.predicate, r.object, r.graph)?;
            }
        }
        db.commit()?;
    }

    assert_eq!(snapshot.phase()?.0, 1);
    assert_eq!(snapshot.nr_triples()?, 400);
    assert_eq!(snapshot_quads(&snapshot)?, before);
    assert!(snapshot.exists_triples(1, 2, 2, 1)?);
    assert!(!statements.lock().exists_triples(1, 2, 2, 1)?);
    Ok(())
}

#[test]
fn refresh_moves_to_latest_commit() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut db = open(dir.path())?;
    let statements = db.statements()?;
    statements.lock().add_triple(1u64, 2u64, 3u64, 4u64)?;
    db.commit()?;
    let mut snapshot = db.snapshot()?;
    let mut nodes = db.nodes()?.lock().view()?;

    statements.lock().add_triple(5u64, 6u64, 7u64, 8u64)?;
    db.nodes()?.lock().allocate()?;
    // Uncommitted writes are invisible even after a refresh.
    snapshot.refresh()?;
    assert_eq!(snapshot.nr_triples()?, 1);

    db.commit()?;
    assert_eq!(snapshot.nr_triples()?, 1);
    assert_eq!(nodes.nr_nodes()?, 0);
    db.refresh(&mut [&mut snapshot, &mut nodes])?;
    assert_eq!(snapshot.phase()?.0, 2);
    assert_eq!(snapshot.nr_triples()?, 2);
    assert_eq!(nodes.nr_nodes()?, 1);
    Ok(())
}

#[test]
fn released_snapshot_rejects_reads_until_refreshed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut db = open(dir.path())?;
    db.statements()?.lock().add_triple(1u64, 1u64, 1u64, 1u64)?;
    db.commit()?;
    let mut snapshot = db.snapshot()?;
    snapshot.release()?;
    assert!(matches!(snapshot.phase(), Err(StoreError::Protocol(_))));
    assert!(matches!(
        snapshot.exists_triples(1, 1, 1, 1),
        Err(StoreError::Protocol(_))
    ));
    snapshot.refresh()?;
    assert!(snapshot.exists_triples(1, 1, 1, 1)?);
    Ok(())
}

#[test]
fn open_cursor_keeps_its_phase_across_refresh() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut db = open(dir.path())?;
    let statements = db.statements()?;
    for i in 1..=50u64 {
        statements.lock().add_triple(i, 1u64, 1u64, 1u64)?;
    }
    db.commit()?;
    let mut snapshot = db.snapshot()?;
    let mut cursor = snapshot.find_tuples(0, 1, 1, 1)?;
    assert_eq!(cursor.next_quad()?, Some(Quad::new(1, 1, 1, 1)));

    for i in 1..=50u64 {
        statements.lock().remove_triples(i, 1u64, 1u64, 1u64)?;
    }
    db.commit()?;
    snapshot.refresh()?;
    assert!(snapshot.is_empty()?);

    let mut rest = 1;
    while cursor.next_quad()?.is_some() {
        rest += 1;
    }
    assert_eq!(rest, 50);
    assert_eq!(cursor.phase().0, 1);
    Ok(())
}

#[test]
fn node_views_delay_identifier_reuse() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut db = open(dir.path())?;
    let nodes = db.nodes()?;
    let first = nodes.lock().allocate()?;
    db.commit()?;
    let view = nodes.lock().view()?;

    nodes.lock().release_node(first)?;
    db.commit()?;
    let next = nodes.lock().allocate()?;
    assert_ne!(next, first, "identifier reused while a view pins the phase that used it");
    db.rollback()?;

    drop(view);
    let filler = nodes.lock().allocate()?;
    db.commit()?;
    let after = nodes.lock().allocate()?;
    assert!(filler == first || after == first);
    assert_eq!(nodes.lock().allocator().pending_len(), 0);
    Ok(())
}

#[test]
fn snapshots_read_from_other_threads() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut db = open(dir.path())?;
    let statements = db.statements()?;
    for i in 1..=100u64 {
        statements.lock().add_triple(i, 2u64, 3u64, 4u64)?;
    }
    db.commit()?;

    let (tx, rx) = mpsc::channel::<()>();
    let snapshot = db.snapshot()?;
    let reader = thread::spawn(move || -> Result<u64> {
        rx.recv().map_err(|_| StoreError::Protocol("writer went away"))?;
        let mut seen = 0;
        for quad in snapshot.find_tuples(0, 2, 3, 4)?.quads() {
            let quad = quad?;
            assert!(quad.subject >= NodeId(1) && quad.subject <= NodeId(100));
            seen += 1;
        }
        Ok(seen)
    });

    for i in 1..=100u64 {
        statements.lock().remove_triples(i, 2u64, 3u64, 4u64)?;
    }
    db.commit()?;
    tx.send(()).map_err(|_| StoreError::Protocol("reader went away"))?;
    let seen = reader
        .join()
        .map_err(|_| StoreError::Protocol("reader panicked"))??;
    assert_eq!(seen, 100);
    assert!(db.snapshot()?.is_empty()?);
    Ok(())
}
