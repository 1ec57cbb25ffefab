#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;
use quadstore::nodepool::NodePool;
use quadstore::phase::{PhaseFiles, SharedResource};
use quadstore::primitives::io::{FailpointIo, FileIo, MemFileIo};
use quadstore::session::{DecisionLog, DecisionState, RecoveryReport, SessionCoordinator};
use quadstore::storage::{default_metrics, StatementStore, StoreIo, StoreOptions};
use quadstore::types::{NodeId, PhaseNumber, Result};
use quadstore::{PhaseResource, PhaseState, StoreError};

/// Files of a two-participant session that outlive any one set of handles, so dropping a
/// [`Session`] and building another over the same [`Disk`] behaves like a restart.
struct Disk {
    statements: StoreIo,
    nodes_meta: FailpointIo,
    nodes_free: [Arc<dyn FileIo>; 2],
    log: FailpointIo,
}

impl Disk {
    fn new() -> Self {
        let nodes = PhaseFiles::memory();
        Self {
            statements: StoreIo::memory(),
            nodes_meta: FailpointIo::new(nodes.meta),
            nodes_free: nodes.free,
            log: FailpointIo::new(Arc::new(MemFileIo::new())),
        }
    }

    fn nodes_files(&self) -> PhaseFiles {
        PhaseFiles {
            meta: Arc::new(self.nodes_meta.clone()),
            free: [Arc::clone(&self.nodes_free[0]), Arc::clone(&self.nodes_free[1])],
        }
    }
}

struct Session {
    coordinator: SessionCoordinator,
    recovery: RecoveryReport,
    statements: Arc<Mutex<StatementStore>>,
    nodes: Arc<Mutex<NodePool>>,
}

impl Session {
    fn open(disk: &Disk) -> Result<Self> {
        let log = DecisionLog::open(Arc::new(disk.log.clone()))?;
        let mut coordinator = SessionCoordinator::new(log);
        let statements = Arc::new(Mutex::new(StatementStore::with_io(
            "statements",
            disk.statements.clone(),
            StoreOptions::new(),
        )?));
        let nodes = Arc::new(Mutex::new(NodePool::with_files(
            "nodes",
            disk.nodes_files(),
            default_metrics(),
        )));
        coordinator.register("statements", Arc::clone(&statements) as SharedResource)?;
        coordinator.register("nodes", Arc::clone(&nodes) as SharedResource)?;
        let recovery = coordinator.recover()?;
        Ok(Self {
            coordinator,
            recovery,
            statements,
            nodes,
        })
    }

    /// Allocates four nodes and stores one quad over them.
    fn write_quad(&self) -> Result<[NodeId; 4]> {
        let mut nodes = self.nodes.lock();
        let ids = [
            nodes.allocate()?,
            nodes.allocate()?,
            nodes.allocate()?,
            nodes.allocate()?,
        ];
        self.statements
            .lock()
            .add_triple(ids[0], ids[1], ids[2], ids[3])?;
        Ok(ids)
    }

    fn commit(&mut self) -> Result<Vec<(String, PhaseNumber)>> {
        let phases = self.coordinator.prepare()?;
        self.coordinator.commit()?;
        Ok(phases)
    }

    fn phases(&self) -> Result<(PhaseNumber, PhaseNumber)> {
        Ok((
            self.statements.lock().phase_number()?,
            self.nodes.lock().phase_number()?,
        ))
    }
}

#[test]
fn committed_sessions_survive_restart() -> Result<()> {
    let disk = Disk::new();
    let ids = {
        let mut session = Session::open(&disk)?;
        let ids = session.write_quad()?;
        let phases = session.commit()?;
        assert_eq!(
            phases,
            vec![
                ("statements".to_string(), PhaseNumber(1)),
                ("nodes".to_string(), PhaseNumber(1)),
            ]
        );
        ids
    };
    let session = Session::open(&disk)?;
    assert_eq!(session.phases()?, (PhaseNumber(1), PhaseNumber(1)));
    assert!(session
        .statements
        .lock()
        .exists_triples(ids[0], ids[1], ids[2], ids[3])?);
    assert_eq!(session.nodes.lock().nr_nodes(), 4);
    let latest = session.coordinator.decision_log().latest().cloned();
    assert_eq!(latest.map(|d| d.state), Some(DecisionState::Completed));
    Ok(())
}

#[test]
fn participant_failure_after_decision_is_replayed() -> Result<()> {
    let disk = Disk::new();
    let ids = {
        let mut session = Session::open(&disk)?;
        let ids = session.write_quad()?;
        session.coordinator.prepare()?;
        disk.nodes_meta.arm(0);
        let err = session.coordinator.commit().unwrap_err();
        assert!(matches!(err, StoreError::CommitIncomplete { ref participant, .. } if participant == "nodes"));
        assert!(session.coordinator.is_poisoned());
        assert!(matches!(
            session.coordinator.prepare().unwrap_err(),
            StoreError::Protocol(_)
        ));
        assert_eq!(session.nodes.lock().state(), PhaseState::Failed);
        ids
    };
    disk.nodes_meta.disarm();

    let session = Session::open(&disk)?;
    assert_eq!(session.phases()?, (PhaseNumber(1), PhaseNumber(1)));
    assert!(session
        .statements
        .lock()
        .exists_triples(ids[0], ids[1], ids[2], ids[3])?);
    assert_eq!(session.nodes.lock().nr_nodes(), 4);
    assert!(session.coordinator.decision_log().pending().is_none());
    Ok(())
}

#[test]
fn failure_to_log_the_decision_rolls_everyone_back() -> Result<()> {
    let disk = Disk::new();
    let mut session = Session::open(&disk)?;
    session.write_quad()?;
    session.coordinator.prepare()?;
    // The decision reaches the file but its sync fails; the abort record then succeeds.
    disk.log.arm_once(1);
    assert!(session.coordinator.commit().is_err());
    assert!(!session.coordinator.is_poisoned());
    let latest = session.coordinator.decision_log().latest().cloned();
    assert_eq!(latest.map(|d| d.state), Some(DecisionState::Aborted));

    assert_eq!(session.phases()?, (PhaseNumber(0), PhaseNumber(0)));
    assert!(session.statements.lock().is_empty());
    assert_eq!(session.nodes.lock().nr_nodes(), 0);

    session.write_quad()?;
    session.commit()?;
    drop(session);
    let session = Session::open(&disk)?;
    assert_eq!(session.phases()?, (PhaseNumber(1), PhaseNumber(1)));
    assert_eq!(session.statements.lock().nr_triples(), 1);
    Ok(())
}

#[test]
fn unconfirmed_decision_is_settled_by_recovery() -> Result<()> {
    let disk = Disk::new();
    {
        let mut session = Session::open(&disk)?;
        session.write_quad()?;
        session.commit()?;
        session.write_quad()?;
        session.coordinator.prepare()?;
        // The decision lands unsynced, the abort record fails, and so would any rollback.
        disk.log.arm(1);
        disk.nodes_meta.arm(0);
        assert!(matches!(
            session.coordinator.commit().unwrap_err(),
            StoreError::Io(_)
        ));
        assert!(session.coordinator.is_poisoned());
        assert!(matches!(
            session.coordinator.rollback().unwrap_err(),
            StoreError::Protocol(_)
        ));
        assert_eq!(session.statements.lock().state(), PhaseState::Prepared);
        assert_eq!(session.nodes.lock().state(), PhaseState::Prepared);
    }
    disk.log.disarm();
    disk.nodes_meta.disarm();

    let session = Session::open(&disk)?;
    assert_eq!(session.phases()?, (PhaseNumber(2), PhaseNumber(2)));
    assert_eq!(session.statements.lock().nr_triples(), 2);
    assert_eq!(session.nodes.lock().nr_nodes(), 8);
    assert_eq!(session.recovery.replayed, vec!["statements", "nodes"]);
    let latest = session.coordinator.decision_log().latest().cloned();
    assert_eq!(latest.map(|d| d.state), Some(DecisionState::Completed));
    Ok(())
}

#[test]
fn recovery_aborts_the_group_when_a_participant_lost_the_decided_phase() -> Result<()> {
    let disk = Disk::new();
    {
        let mut session = Session::open(&disk)?;
        session.write_quad()?;
        session.commit()?;
        session.write_quad()?;
        let phases = session.coordinator.prepare()?;
        // A decision on disk, then a rollback that only reached the first participant.
        DecisionLog::open(Arc::new(disk.log.clone()))?.record_commit(phases)?;
        session.statements.lock().rollback()?;
    }
    let mut statements =
        StatementStore::with_io("statements", disk.statements.clone(), StoreOptions::new())?;
    assert_eq!(statements.recover()?, vec![PhaseNumber(1)]);
    drop(statements);

    let session = Session::open(&disk)?;
    assert_eq!(session.phases()?, (PhaseNumber(1), PhaseNumber(1)));
    assert_eq!(session.statements.lock().nr_triples(), 1);
    assert_eq!(session.nodes.lock().nr_nodes(), 4);
    assert!(session.recovery.decision_aborted);
    assert_eq!(session.recovery.aborted, vec!["nodes"]);
    let latest = session.coordinator.decision_log().latest().cloned();
    assert_eq!(latest.map(|d| d.state), Some(DecisionState::Aborted));

    drop(session);
    let mut session = Session::open(&disk)?;
    assert!(!session.recovery.decision_aborted);
    session.write_quad()?;
    session.commit()?;
    assert_eq!(session.phases()?, (PhaseNumber(2), PhaseNumber(2)));
    Ok(())
}

#[test]
fn a_no_vote_rolls_back_earlier_participants() -> Result<()> {
    let disk = Disk::new();
    let mut session = Session::open(&disk)?;
    session.write_quad()?;
    session.commit()?;

    session.write_quad()?;
    disk.nodes_meta.arm(0);
    let err = session.coordinator.prepare().unwrap_err();
    assert!(matches!(err, StoreError::PrepareFailed { ref participant, .. } if participant == "nodes"));
    disk.nodes_meta.disarm();

    assert_eq!(session.statements.lock().state(), PhaseState::Stable);
    assert_eq!(session.phases()?, (PhaseNumber(1), PhaseNumber(1)));
    assert_eq!(session.statements.lock().nr_triples(), 1);
    assert_eq!(session.nodes.lock().nr_nodes(), 4);

    drop(session);
    let session = Session::open(&disk)?;
    assert_eq!(session.phases()?, (PhaseNumber(1), PhaseNumber(1)));
    assert_eq!(session.statements.lock().nr_triples(), 1);
    Ok(())
}

#[test]
fn crash_before_the_decision_aborts_prepared_phases() -> Result<()> {
    let disk = Disk::new();
    {
        let mut session = Session::open(&disk)?;
        session.write_quad()?;
        session.commit()?;
        session.write_quad()?;
        session.coordinator.prepare()?;
    }
    let mut statements =
        StatementStore::with_io("statements", disk.statements.clone(), StoreOptions::new())?;
    assert_eq!(statements.recover()?, vec![PhaseNumber(1), PhaseNumber(2)]);
    drop(statements);

    let session = Session::open(&disk)?;
    assert_eq!(session.phases()?, (PhaseNumber(1), PhaseNumber(1)));
    assert_eq!(session.statements.lock().nr_triples(), 1);
    assert_eq!(session.nodes.lock().nr_nodes(), 4);
    Ok(())
}
