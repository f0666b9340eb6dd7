// State machines for the tack and offer lifecycles
//
// Machines are pure: they validate an event against the current entity, mutate a working copy
// and hand back what changed. Persistence and side effects belong to the services layer.

pub mod actions;
pub mod errors;
pub mod events;
pub mod guards;
pub mod offer_state_machine;
pub mod states;
pub mod tack_state_machine;

// Re-export main types for convenient access
pub use errors::{GuardError, StateMachineError, StateMachineResult};
pub use events::{DeleteReason, OfferEvent, TackEvent};
pub use offer_state_machine::{OfferChange, OfferStateMachine};
pub use states::{OfferStatus, TackStatus};
pub use tack_state_machine::TackStateMachine;

pub use guards::StateGuard;
