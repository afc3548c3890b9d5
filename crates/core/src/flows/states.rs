use serde::{Deserialize, Serialize};

/// Lifecycle of one artifact tag within a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegenerationState {
    #[default]
    Stable,
    FeedbackPending,
    Regenerating,
    RegenFailed,
}

impl RegenerationState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::FeedbackPending | Self::Regenerating)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegenerationEvent {
    FeedbackAccepted,
    RegenerationStarted,
    RevisionCommitted,
    RegenerationFailed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: RegenerationState,
    pub to: RegenerationState,
    pub event: RegenerationEvent,
}
