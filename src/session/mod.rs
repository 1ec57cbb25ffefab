//! Coordinated commits across phase resources.
//!
//! A [`SessionCoordinator`] owns an ordered list of participants, logs its commit decision
//! before touching any of them and uses that log to pick each participant's phase during
//! recovery. Participants are built from scheme strings through a [`ResourceRegistry`].

mod coordinator;
/// Durable commit decision log.
pub mod decision;
mod registry;

pub use coordinator::{RecoveryReport, SessionCoordinator};
pub use decision::{Decision, DecisionLog, DecisionState};
pub use registry::{
    RegisteredResource, ResourceContext, ResourceFactory, ResourceRegistry, NODES_SCHEME,
    STATEMENTS_SCHEME,
};
