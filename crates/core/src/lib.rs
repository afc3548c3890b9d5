pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod extraction;
pub mod flows;
pub mod termination;

pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
};
pub use domain::artifact::{Artifact, ArtifactRevision};
pub use domain::role::{AgentRole, ArtifactTag, RoleRoster, FEEDBACK_COORDINATOR};
pub use domain::session::{FeedbackRequest, Session, SessionId};
pub use domain::transcript::{Transcript, TurnMessage};
pub use errors::{DomainError, InterfaceError, OrchestrationError};
pub use extraction::{ArtifactExtractor, Extraction, SkippedContribution};
pub use flows::{RegenerationEvent, RegenerationFlow, RegenerationState};
pub use termination::{Completion, CompletionRule, TerminationPolicy};
