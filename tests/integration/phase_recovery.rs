#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use quadstore::{
    Database, DatabaseConfig, NodeId, PhaseNumber, PhaseResource, ResourceConfig, Result,
    StoreError,
};

fn open(dir: &Path) -> Result<Database> {
    Database::open(DatabaseConfig::new(dir))
}

fn add_quads(db: &mut Database, n: u64) -> Result<Vec<NodeId>> {
    let nodes = db.nodes()?;
    let statements = db.statements()?;
    let mut pool = nodes.lock();
    let mut store = statements.lock();
    let mut ids = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let id = pool.allocate()?;
        store.add_triple(id, id, id, NodeId(1))?;
        ids.push(id);
    }
    Ok(ids)
}

#[test]
fn fresh_directory_starts_at_phase_zero() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = open(dir.path())?;
    assert!(db.recovery().fresh);
    assert_eq!(
        db.recovery().selected,
        vec![
            ("statements".to_string(), PhaseNumber(0)),
            ("nodes".to_string(), PhaseNumber(0)),
        ]
    );
    assert!(db.statements()?.lock().is_empty());
    Ok(())
}

#[test]
fn reopen_cycles_accumulate_commits() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for round in 1..=5u64 {
        let mut db = open(dir.path())?;
        assert_eq!(db.statements()?.lock().nr_triples(), (round - 1) * 10);
        assert!(!db.recovery().fresh || round == 1);
        add_quads(&mut db, 10)?;
        let phases = db.commit()?;
        assert!(phases.iter().all(|(_, p)| *p == PhaseNumber(round)));
    }
    let db = open(dir.path())?;
    assert_eq!(db.statements()?.lock().nr_triples(), 50);
    assert_eq!(db.nodes()?.lock().nr_nodes(), 50);
    assert!(db.recovery().aborted.is_empty());
    assert!(db.recovery().replayed.is_empty());
    Ok(())
}

#[test]
fn uncommitted_writes_are_lost_on_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let mut db = open(dir.path())?;
        add_quads(&mut db, 3)?;
        db.commit()?;
        add_quads(&mut db, 4)?;
    }
    let db = open(dir.path())?;
    assert_eq!(db.statements()?.lock().nr_triples(), 3);
    assert_eq!(db.nodes()?.lock().nr_nodes(), 3);
    Ok(())
}

#[test]
fn phase_prepared_outside_a_decision_is_aborted() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let mut db = open(dir.path())?;
        add_quads(&mut db, 2)?;
        db.commit()?;
        add_quads(&mut db, 2)?;
        let phase = db.statements()?.lock().prepare()?;
        assert_eq!(phase, PhaseNumber(2));
    }
    let db = open(dir.path())?;
    assert_eq!(db.recovery().aborted, vec!["statements".to_string()]);
    assert_eq!(db.statements()?.lock().phase_number()?, PhaseNumber(1));
    assert_eq!(db.statements()?.lock().nr_triples(), 2);

    // The aborted slot was retired, so a second reopen has nothing left to abort.
    drop(db);
    let db = open(dir.path())?;
    assert!(db.recovery().aborted.is_empty());
    Ok(())
}

#[test]
fn recovering_in_place_matches_a_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut db = open(dir.path())?;
    add_quads(&mut db, 2)?;
    db.commit()?;
    add_quads(&mut db, 2)?;
    db.statements()?.lock().prepare()?;

    let report = db.recover()?.clone();
    assert!(!report.fresh);
    assert_eq!(report.aborted, vec!["statements".to_string()]);
    assert_eq!(db.statements()?.lock().nr_triples(), 2);
    assert_eq!(db.nodes()?.lock().nr_nodes(), 2);

    add_quads(&mut db, 1)?;
    let phases = db.commit()?;
    assert!(phases.iter().all(|(_, p)| *p == PhaseNumber(2)));
    Ok(())
}

#[test]
fn participant_without_data_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let mut db = open(dir.path())?;
        add_quads(&mut db, 1)?;
        db.commit()?;
    }
    fs::remove_file(dir.path().join("nodes.meta"))?;
    match open(dir.path()) {
        Err(StoreError::NoValidPhase(names)) => assert!(names.contains("nodes")),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("opened a database with a missing participant"),
    }
    Ok(())
}

#[test]
fn participant_added_after_commits_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let mut db = open(dir.path())?;
        add_quads(&mut db, 1)?;
        db.commit()?;
    }
    let mut config = DatabaseConfig::new(dir.path());
    config
        .resources
        .push(ResourceConfig::new("statements", "archive"));
    assert!(matches!(
        Database::open(config),
        Err(StoreError::NoValidPhase(_))
    ));
    Ok(())
}

#[test]
fn decision_log_without_participant_data_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let mut db = open(dir.path())?;
        add_quads(&mut db, 1)?;
        db.commit()?;
    }
    for entry in fs::read_dir(dir.path())? {
        let path = entry?.path();
        let keep = path.file_name().and_then(|n| n.to_str()) == Some(quadstore::DECISION_LOG_FILE);
        if !keep {
            fs::remove_file(path)?;
        }
    }
    assert!(matches!(open(dir.path()), Err(StoreError::NoValidPhase(_))));
    Ok(())
}

#[test]
fn several_statement_stores_commit_together() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = DatabaseConfig::new(dir.path());
    config
        .resources
        .insert(1, ResourceConfig::new("statements", "archive"));
    {
        let mut db = Database::open(config.clone())?;
        add_quads(&mut db, 3)?;
        let Some(quadstore::session::RegisteredResource::Statements(archive)) =
            db.resource("archive")
        else {
            panic!("archive is not a statement store");
        };
        archive.lock().add_triple(9u64, 9u64, 9u64, 9u64)?;
        let phases = db.commit()?;
        assert_eq!(phases.len(), 3);
        assert_eq!(phases[1], ("archive".to_string(), PhaseNumber(1)));
    }
    let db = Database::open(config)?;
    let Some(quadstore::session::RegisteredResource::Statements(archive)) = db.resource("archive")
    else {
        panic!("archive is not a statement store");
    };
    assert!(archive.lock().exists_triples(9u64, 9u64, 9u64, 9u64)?);
    assert_eq!(db.statements()?.lock().nr_triples(), 3);
    assert_eq!(
        db.coordinator().participants().collect::<Vec<_>>(),
        vec!["statements", "archive", "nodes"]
    );
    Ok(())
}
