use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{RegenerationEvent, RegenerationState, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: RegenerationState, event: RegenerationEvent },
}

/// Transition table for the feedback/regeneration loop of one artifact.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegenerationFlow;

impl RegenerationFlow {
    pub fn initial_state(&self) -> RegenerationState {
        RegenerationState::Stable
    }

    pub fn apply(
        &self,
        current: RegenerationState,
        event: RegenerationEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        use RegenerationEvent::{
            Cancelled, FeedbackAccepted, RegenerationFailed, RegenerationStarted,
            RevisionCommitted,
        };
        use RegenerationState::{FeedbackPending, RegenFailed, Regenerating, Stable};

        let to = match (current, event) {
            (Stable, FeedbackAccepted) | (RegenFailed, FeedbackAccepted) => FeedbackPending,
            (FeedbackPending, RegenerationStarted) => Regenerating,
            (Regenerating, RevisionCommitted) => Stable,
            (FeedbackPending, RegenerationFailed) | (Regenerating, RegenerationFailed) => {
                RegenFailed
            }
            (FeedbackPending, Cancelled) | (Regenerating, Cancelled) => Stable,
            _ => return Err(FlowTransitionError::InvalidTransition { state: current, event }),
        };

        Ok(TransitionOutcome { from: current, to, event })
    }

    pub fn apply_with_audit<S>(
        &self,
        current: RegenerationState,
        event: RegenerationEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "regeneration.transition_applied",
                        AuditCategory::Regeneration,
                        AuditOutcome::Success,
                    )
                    .with_detail("from", format!("{:?}", outcome.from))
                    .with_detail("to", format!("{:?}", outcome.to))
                    .with_detail("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "regeneration.transition_rejected",
                        AuditCategory::Regeneration,
                        AuditOutcome::Rejected,
                    )
                    .with_detail("error", error),
                );
            }
        }
        result
    }
}
