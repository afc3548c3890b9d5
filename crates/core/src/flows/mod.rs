pub mod engine;
pub mod states;

pub use engine::{FlowTransitionError, RegenerationFlow};
pub use states::{RegenerationEvent, RegenerationState, TransitionOutcome};
