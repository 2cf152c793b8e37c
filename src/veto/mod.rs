//! Map veto: phase sequences, the per-match state machine and the registry
//! of open sessions

pub mod machine;
pub mod phase;
pub mod registry;

pub use machine::{
    MapPick, PlayedMap, VetoActionRecord, VetoOutcome, VetoStateMachine, VetoSummary,
};
pub use phase::{default_sequence, TeamNumber, VetoAction, VetoPhase, BO3_SEQUENCE, BO5_SEQUENCE};
pub use registry::{VetoCaptains, VetoRegistry};
