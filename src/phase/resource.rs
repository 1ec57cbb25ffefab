use std::sync::Arc;

use parking_lot::Mutex;

use super::manager::PhaseState;
use crate::types::{PhaseNumber, Result};

/// Something that reads a published phase and can move to a newer one.
pub trait Refreshable {
    /// Moves to the latest committed phase.
    fn refresh(&mut self) -> Result<()>;
    /// Drops the reference to the current phase. Reads fail until the next refresh.
    fn release(&mut self) -> Result<()>;
}

/// A resource that takes part in coordinated prepare/commit.
pub trait PhaseResource: Refreshable + Send {
    /// Name used in coordinator errors and the decision log.
    fn name(&self) -> &str;
    /// Makes the current write phase durable as a prepared phase.
    fn prepare(&mut self) -> Result<PhaseNumber>;
    /// Promotes the prepared phase.
    fn commit(&mut self) -> Result<()>;
    /// Discards the write phase and any prepared phase.
    fn rollback(&mut self) -> Result<()>;
    /// The committed phase number, or the prepared one while prepared.
    fn phase_number(&self) -> Result<PhaseNumber>;
    /// Lists the valid on-disk phases in ascending order.
    fn recover(&mut self) -> Result<Vec<PhaseNumber>>;
    /// Adopts one of the phases returned by [`PhaseResource::recover`].
    fn select_phase(&mut self, phase: PhaseNumber) -> Result<()>;
    /// Resets to an empty resource at phase 0.
    fn clear(&mut self) -> Result<()> {
        self.clear_at(PhaseNumber(0))
    }
    /// Resets to an empty resource at the given phase.
    fn clear_at(&mut self, phase: PhaseNumber) -> Result<()>;
    /// Current protocol state.
    fn state(&self) -> PhaseState;
}

/// A participant shared between the coordinator and its typed owner.
pub type SharedResource = Arc<Mutex<dyn PhaseResource>>;
