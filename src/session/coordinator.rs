use std::fmt;

use serde::Serialize;
use tracing::{debug, error, info, warn, Span};

use super::decision::DecisionLog;
use crate::phase::{Refreshable, SharedResource};
use crate::types::{PhaseNumber, Result, StoreError};

#[derive(Clone, Debug, PartialEq, Eq)]
enum CoordinatorState {
    Idle,
    Prepared(Vec<(String, PhaseNumber)>),
    /// Some participant or the decision log is in an unknown state; only `recover` is
    /// accepted.
    Poisoned,
}

/// What [`SessionCoordinator::recover`] selected.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RecoveryReport {
    /// Every participant was empty and has been cleared.
    pub fresh: bool,
    /// Selected phase per participant, in registration order.
    pub selected: Vec<(String, PhaseNumber)>,
    /// Participants whose newer, undecided prepared phase was discarded.
    pub aborted: Vec<String>,
    /// A pending decision was abandoned because some participant no longer held its
    /// decided phase.
    pub decision_aborted: bool,
    /// Participants whose prepared phase was adopted from the decision log.
    pub replayed: Vec<String>,
}

struct Participant {
    name: String,
    resource: SharedResource,
}

/// Drives prepare/commit over an ordered set of phase resources so a transaction spanning
/// them is all-or-nothing.
///
/// Before issuing any participant commit the coordinator durably records the prepared phase
/// numbers in its [`DecisionLog`]. Recovery uses that record to choose between a
/// participant's committed and prepared phases.
pub struct SessionCoordinator {
    participants: Vec<Participant>,
    log: DecisionLog,
    state: CoordinatorState,
    span: Span,
}

impl SessionCoordinator {
    /// Creates a coordinator with no participants.
    pub fn new(log: DecisionLog) -> Self {
        Self {
            participants: Vec::new(),
            log,
            state: CoordinatorState::Idle,
            span: tracing::debug_span!("coordinator"),
        }
    }

    /// Appends a participant. Prepare and commit run in registration order.
    pub fn register(&mut self, name: impl Into<String>, resource: SharedResource) -> Result<()> {
        let name = name.into();
        if self.participants.iter().any(|p| p.name == name) {
            return Err(StoreError::invalid(format!(
                "participant {name} registered twice"
            )));
        }
        if self.state != CoordinatorState::Idle {
            return Err(StoreError::Protocol("cannot register during a transaction"));
        }
        debug!(parent: &self.span, participant = %name, "coordinator.register");
        self.participants.push(Participant { name, resource });
        Ok(())
    }

    /// Participant names in registration order.
    pub fn participants(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(|p| p.name.as_str())
    }

    /// The decision log.
    pub fn decision_log(&self) -> &DecisionLog {
        &self.log
    }

    /// True after a commit or rollback that left some participant in an unknown state.
    pub fn is_poisoned(&self) -> bool {
        self.state == CoordinatorState::Poisoned
    }

    /// Moves every participant and each of `views` to its latest committed phase.
    pub fn refresh(&mut self, views: &mut [&mut dyn Refreshable]) -> Result<()> {
        self.check_not_poisoned()?;
        for p in &self.participants {
            p.resource.lock().refresh()?;
        }
        for view in views.iter_mut() {
            view.refresh()?;
        }
        Ok(())
    }

    /// Prepares every participant in order. The first failure rolls back all of them and
    /// is returned as [`StoreError::PrepareFailed`].
    pub fn prepare(&mut self) -> Result<Vec<(String, PhaseNumber)>> {
        self.check_not_poisoned()?;
        if matches!(self.state, CoordinatorState::Prepared(_)) {
            return Err(StoreError::Protocol("prepare called twice"));
        }
        let mut phases = Vec::with_capacity(self.participants.len());
        let mut vote_no = None;
        for p in &self.participants {
            let result = p.resource.lock().prepare();
            match result {
                Ok(phase) => phases.push((p.name.clone(), phase)),
                Err(err) => {
                    warn!(parent: &self.span, participant = %p.name, error = %err, "coordinator.prepare.vote_no");
                    vote_no = Some((p.name.clone(), err));
                    break;
                }
            }
        }
        if let Some((participant, err)) = vote_no {
            self.rollback_after_failure();
            return Err(StoreError::PrepareFailed {
                participant,
                source: Box::new(err),
            });
        }
        debug!(parent: &self.span, ?phases, "coordinator.prepare.complete");
        self.state = CoordinatorState::Prepared(phases.clone());
        Ok(phases)
    }

    /// Records the commit decision, then commits every participant.
    ///
    /// A failed decision write may still have reached the disk, so participants are only
    /// rolled back once an abort record replacing it is durable. If that fails too the
    /// coordinator is poisoned and recovery decides from whatever the log holds. A
    /// participant failing after the decision yields [`StoreError::CommitIncomplete`]; the
    /// remaining participants are still committed and recovery finishes the job.
    pub fn commit(&mut self) -> Result<()> {
        self.check_not_poisoned()?;
        let CoordinatorState::Prepared(phases) = self.state.clone() else {
            return Err(StoreError::Protocol("commit called without prepare"));
        };
        if let Err(err) = self.log.record_commit(phases.clone()) {
            warn!(parent: &self.span, error = %err, "coordinator.commit.decision_failed");
            if let Err(abort) = self.log.record_abort(phases) {
                error!(parent: &self.span, error = %abort, "coordinator.commit.abort_failed");
                self.state = CoordinatorState::Poisoned;
                return Err(err);
            }
            self.rollback_after_failure();
            return Err(err);
        }
        let mut incomplete = None;
        for p in &self.participants {
            let result = p.resource.lock().commit();
            if let Err(err) = result {
                warn!(parent: &self.span, participant = %p.name, error = %err, "coordinator.commit.participant_failed");
                if incomplete.is_none() {
                    incomplete = Some(StoreError::CommitIncomplete {
                        participant: p.name.clone(),
                        source: Box::new(err),
                    });
                }
            }
        }
        if let Some(err) = incomplete {
            self.state = CoordinatorState::Poisoned;
            return Err(err);
        }
        if let Err(err) = self.log.mark_completed() {
            warn!(parent: &self.span, error = %err, "coordinator.commit.resolve_failed");
        }
        self.state = CoordinatorState::Idle;
        info!(parent: &self.span, ?phases, "coordinator.commit.complete");
        Ok(())
    }

    /// Rolls back every participant, returning the first failure after trying all.
    pub fn rollback(&mut self) -> Result<()> {
        self.check_not_poisoned()?;
        let result = self.rollback_all();
        self.state = CoordinatorState::Idle;
        result
    }

    /// Releases every participant, returning the first failure after trying all.
    pub fn release(&mut self) -> Result<()> {
        self.check_not_poisoned()?;
        let mut first = None;
        for p in &self.participants {
            if let Err(err) = p.resource.lock().release() {
                if first.is_none() {
                    first = Some(err);
                }
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Recovers every participant and selects one phase each.
    ///
    /// * all empty with no recorded decision: clears everything;
    /// * some empty while others are not: [`StoreError::NoValidPhase`];
    /// * a pending decision whose phases every named participant still holds: each named
    ///   participant selects its decided phase;
    /// * a pending decision some participant no longer holds: the whole group falls back
    ///   to the phases before it and the decision is marked aborted;
    /// * otherwise each participant selects its older phase.
    ///
    /// Every phase is chosen before any participant is changed.
    pub fn recover(&mut self) -> Result<RecoveryReport> {
        self.log.reload()?;
        let mut found = Vec::with_capacity(self.participants.len());
        for p in &self.participants {
            let phases = p.resource.lock().recover()?;
            found.push(phases);
        }
        let empty: Vec<&str> = self
            .participants
            .iter()
            .zip(&found)
            .filter(|(_, phases)| phases.is_empty())
            .map(|(p, _)| p.name.as_str())
            .collect();
        let mut report = RecoveryReport::default();

        if empty.len() == self.participants.len() {
            if self.log.latest().is_some() {
                return Err(StoreError::NoValidPhase(format!(
                    "{} (decision log records commits but no participant has data)",
                    empty.join(", ")
                )));
            }
            for p in &self.participants {
                p.resource.lock().clear()?;
                report.selected.push((p.name.clone(), PhaseNumber(0)));
            }
            report.fresh = true;
            self.state = CoordinatorState::Idle;
            info!(parent: &self.span, "coordinator.recover.fresh");
            return Ok(report);
        }
        if !empty.is_empty() {
            return Err(StoreError::NoValidPhase(empty.join(", ")));
        }

        let pending = self.log.pending().cloned();
        let replay = pending.as_ref().is_some_and(|decision| {
            self.participants.iter().zip(&found).all(|(p, phases)| {
                decision
                    .phase_for(&p.name)
                    .map_or(true, |phase| phases.contains(&phase))
            })
        });
        if pending.is_some() && !replay {
            warn!(parent: &self.span, "coordinator.recover.decision_incomplete");
        }

        let mut choices = Vec::with_capacity(self.participants.len());
        for (p, phases) in self.participants.iter().zip(&found) {
            let decided = pending.as_ref().and_then(|d| d.phase_for(&p.name));
            let chosen = choose_phase(&p.name, phases, decided, replay)?;
            if phases.len() == 2 {
                if Some(chosen) == phases.last().copied() {
                    report.replayed.push(p.name.clone());
                } else {
                    report.aborted.push(p.name.clone());
                }
            }
            choices.push(chosen);
        }
        for (p, chosen) in self.participants.iter().zip(choices) {
            p.resource.lock().select_phase(chosen)?;
            report.selected.push((p.name.clone(), chosen));
        }
        if pending.is_some() {
            if replay {
                self.log.mark_completed()?;
            } else {
                self.log.mark_aborted()?;
                report.decision_aborted = true;
            }
        }
        self.state = CoordinatorState::Idle;
        info!(
            parent: &self.span,
            selected = ?report.selected,
            replayed = report.replayed.len(),
            aborted = report.aborted.len(),
            decision_aborted = report.decision_aborted,
            "coordinator.recover.complete"
        );
        Ok(report)
    }

    fn check_not_poisoned(&self) -> Result<()> {
        if self.state == CoordinatorState::Poisoned {
            return Err(StoreError::Protocol(
                "a commit or rollback did not complete; recover before continuing",
            ));
        }
        Ok(())
    }

    fn rollback_all(&mut self) -> Result<()> {
        let mut first = None;
        for p in &self.participants {
            if let Err(err) = p.resource.lock().rollback() {
                warn!(parent: &self.span, participant = %p.name, error = %err, "coordinator.rollback.failed");
                if first.is_none() {
                    first = Some(err);
                }
            }
        }
        self.state = CoordinatorState::Idle;
        first.map_or(Ok(()), Err)
    }

    /// Rolls back after a failed prepare or decision write. A participant that cannot
    /// roll back is left `Failed`, so the coordinator refuses further work until recovery.
    fn rollback_after_failure(&mut self) {
        if let Err(err) = self.rollback_all() {
            error!(parent: &self.span, error = %err, "coordinator.rollback.incomplete");
            self.state = CoordinatorState::Poisoned;
        }
    }
}

/// Picks the phase a participant recovers to.
///
/// `decided` is the participant's phase in the pending decision, if any. When the
/// decision is replayed that phase wins; otherwise the newest phase below it, or the
/// older of two phases when the participant is not named.
fn choose_phase(
    name: &str,
    phases: &[PhaseNumber],
    decided: Option<PhaseNumber>,
    replay: bool,
) -> Result<PhaseNumber> {
    let (Some(&older), 1..=2) = (phases.first(), phases.len()) else {
        return Err(StoreError::corruption(format!(
            "participant {name} reported {} valid phases",
            phases.len()
        )));
    };
    match decided {
        Some(phase) if replay => Ok(phase),
        Some(phase) => phases
            .iter()
            .rev()
            .find(|p| **p < phase)
            .copied()
            .ok_or_else(|| {
                StoreError::corruption(format!(
                    "participant {name} committed phase {phase} but the other participants \
                     did not reach the same decision"
                ))
            }),
        None => Ok(older),
    }
}

impl fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field(
                "participants",
                &self.participants.iter().map(|p| &p.name).collect::<Vec<_>>(),
            )
            .field("state", &self.state)
            .finish()
    }
}
