//! Phase-based crash recovery.
//!
//! A resource never overwrites the blocks of its committed phase. Instead it writes a new
//! metaroot describing the next phase into the spare slot (`prepare`), then retires the old
//! slot (`commit`). Whatever happens in between, at least one slot describes a consistent
//! phase and `recover` finds it.

/// Two-slot metaroot file and free-list sidecars.
pub mod metaroot;

mod manager;
mod resource;
mod tracker;

pub use manager::{PhaseFiles, PhaseImage, PhaseManager, PhasePayload, PhaseState, RecoveredPhase};
pub use metaroot::{ResourceKind, SlotState};
pub use resource::{PhaseResource, Refreshable, SharedResource};
pub use tracker::{PhaseTracker, PinGuard, PinnedPhase, Published};
