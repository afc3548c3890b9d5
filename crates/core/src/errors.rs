use thiserror::Error;

use crate::domain::role::ArtifactTag;
use crate::domain::session::SessionId;
use crate::domain::transcript::Transcript;
use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("role set must contain at least one role")]
    EmptyRoleSet,
    #[error("duplicate role name `{0}`")]
    DuplicateRoleName(String),
    #[error("role name `{0}` is reserved for the feedback coordinator")]
    ReservedRoleName(String),
    #[error("unknown artifact tag `{0}`")]
    UnknownArtifactTag(String),
    #[error("message cap must be at least 1, got {0}")]
    InvalidMessageCap(usize),
    #[error("artifact {tag} at version {version} has no earlier revision to restore")]
    NothingToRollback { tag: ArtifactTag, version: u32 },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures of an analysis or regeneration run.
///
/// Every variant that can name a session or tag carries them so the caller
/// can report where the run stopped without consulting logs.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error(
        "model unavailable for role `{role}` at sequence {sequence} after {attempts} attempt(s): {reason}"
    )]
    ModelUnavailable {
        session_id: Option<SessionId>,
        tag: Option<ArtifactTag>,
        role: String,
        sequence: u64,
        attempts: u32,
        reason: String,
        partial: Box<Transcript>,
    },
    #[error(
        "stale feedback for {tag} in session {session_id}: based on version {base_version}, current is {current_version}"
    )]
    StaleFeedback { session_id: SessionId, tag: ArtifactTag, base_version: u32, current_version: u32 },
    #[error("{field} must contain at least {min_chars} non-whitespace characters")]
    EmptyInput { field: &'static str, min_chars: usize },
    #[error("run cancelled after sequence {last_sequence:?}")]
    Cancelled { session_id: Option<SessionId>, tag: Option<ArtifactTag>, last_sequence: Option<u64> },
    #[error("regeneration of {tag} already in progress for session {session_id}")]
    RegenerationInProgress { session_id: SessionId, tag: ArtifactTag },
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("session {session_id} has no {tag} artifact")]
    ArtifactNotFound { session_id: SessionId, tag: ArtifactTag },
    #[error("regeneration of {tag} in session {session_id} produced no content (last sequence {last_sequence:?})")]
    NoRevisionProduced { session_id: SessionId, tag: ArtifactTag, last_sequence: Option<u64> },
    #[error("storage failure: {0}")]
    Storage(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl OrchestrationError {
    /// Attaches session and tag to errors raised below the controller.
    pub fn scoped(self, scope_session: &SessionId, scope_tag: ArtifactTag) -> Self {
        match self {
            Self::ModelUnavailable { role, sequence, attempts, reason, partial, .. } => {
                Self::ModelUnavailable {
                    session_id: Some(scope_session.clone()),
                    tag: Some(scope_tag),
                    role,
                    sequence,
                    attempts,
                    reason,
                    partial,
                }
            }
            Self::Cancelled { last_sequence, .. } => Self::Cancelled {
                session_id: Some(scope_session.clone()),
                tag: Some(scope_tag),
                last_sequence,
            },
            other => other,
        }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::StaleFeedback { .. } => "stale_feedback",
            Self::EmptyInput { .. } => "empty_input",
            Self::Cancelled { .. } => "cancelled",
            Self::RegenerationInProgress { .. } => "regeneration_in_progress",
            Self::SessionNotFound(_) => "session_not_found",
            Self::ArtifactNotFound { .. } => "artifact_not_found",
            Self::NoRevisionProduced { .. } => "no_revision_produced",
            Self::Storage(_) => "storage",
            Self::Domain(_) => "domain",
        }
    }

    /// Transcript accumulated before a model failure, if any.
    pub fn partial_transcript(&self) -> Option<&Transcript> {
        match self {
            Self::ModelUnavailable { partial, .. } => Some(partial),
            _ => None,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { .. } => {
                "The document changed or is being revised. Reload it and try again."
            }
            Self::NotFound { .. } => "The requested session or document does not exist.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl From<OrchestrationError> for InterfaceError {
    fn from(value: OrchestrationError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            OrchestrationError::EmptyInput { .. } | OrchestrationError::Domain(_) => {
                Self::BadRequest { message, correlation_id }
            }
            OrchestrationError::StaleFeedback { .. }
            | OrchestrationError::RegenerationInProgress { .. } => {
                Self::Conflict { message, correlation_id }
            }
            OrchestrationError::SessionNotFound(_) | OrchestrationError::ArtifactNotFound { .. } => {
                Self::NotFound { message, correlation_id }
            }
            OrchestrationError::ModelUnavailable { .. }
            | OrchestrationError::Cancelled { .. }
            | OrchestrationError::NoRevisionProduced { .. }
            | OrchestrationError::Storage(_) => Self::ServiceUnavailable { message, correlation_id },
        }
    }
}
