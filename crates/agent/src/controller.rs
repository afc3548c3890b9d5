use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use srdgen_core::config::OrchestrationConfig;
use srdgen_core::{
    Artifact, ArtifactExtractor, ArtifactTag, AuditCategory, AuditContext, AuditEvent,
    AuditOutcome, AuditSink, Completion, DomainError, FeedbackRequest, OrchestrationError,
    RegenerationEvent, RegenerationFlow, RegenerationState, RoleRoster, SessionId,
    SkippedContribution,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::coordinator::ConversationCoordinator;
use crate::prompts::regeneration_plan;
use crate::store::SessionStore;

const ACTOR: &str = "regeneration-controller";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegenerationReport {
    pub session_id: SessionId,
    pub artifact: Artifact,
    pub completion: Completion,
    pub skipped: Vec<SkippedContribution>,
}

/// Seed handed to the reduced roster: the artifact as the human last saw it
/// followed by their feedback.
pub fn regeneration_seed(artifact: &Artifact, feedback_text: &str) -> String {
    format!(
        "CURRENT {} DOCUMENT (version {}):\n{}\n\nUSER FEEDBACK:\n{}",
        artifact.tag.as_str().to_ascii_uppercase(),
        artifact.version,
        artifact.content,
        feedback_text.trim()
    )
}

type InFlightKey = (SessionId, ArtifactTag);

/// Releases the (session, tag) slot when the regeneration finishes, whatever
/// the outcome.
struct InFlightGuard<'a> {
    slots: &'a Mutex<HashSet<InFlightKey>>,
    key: InFlightKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        match self.slots.lock() {
            Ok(mut slots) => slots.remove(&self.key),
            Err(poisoned) => poisoned.into_inner().remove(&self.key),
        };
    }
}

/// Runs the feedback loop for one artifact of one session.
///
/// Session storage only changes through committed flow transitions, and a
/// failed or cancelled run leaves the artifact content untouched.
pub struct FeedbackRegenerationController {
    coordinator: ConversationCoordinator,
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    analysis_roster: RoleRoster,
    orchestration: OrchestrationConfig,
    extractor: ArtifactExtractor,
    flow: RegenerationFlow,
    in_flight: Mutex<HashSet<InFlightKey>>,
}

impl FeedbackRegenerationController {
    pub fn new(
        coordinator: ConversationCoordinator,
        store: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
        analysis_roster: RoleRoster,
        orchestration: OrchestrationConfig,
    ) -> Self {
        let extractor = ArtifactExtractor::new(orchestration.min_contribution_chars);
        Self {
            coordinator,
            store,
            audit,
            analysis_roster,
            orchestration,
            extractor,
            flow: RegenerationFlow,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub async fn regenerate(
        &self,
        session_id: &SessionId,
        request: FeedbackRequest,
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RegenerationReport, OrchestrationError> {
        let tag = request.target;
        let min_chars = self.orchestration.min_feedback_chars;
        if request.feedback_text.trim().chars().count() < min_chars {
            return Err(OrchestrationError::EmptyInput { field: "feedback_text", min_chars });
        }

        let _guard = self.claim(session_id, tag)?;
        let audit =
            AuditContext::new(correlation_id, ACTOR).for_session(session_id.clone()).with_tag(tag);

        let session = self
            .store
            .find(session_id)
            .await?
            .ok_or_else(|| OrchestrationError::SessionNotFound(session_id.clone()))?;
        let artifact = session.artifact(tag).cloned().ok_or_else(|| {
            OrchestrationError::ArtifactNotFound { session_id: session_id.clone(), tag }
        })?;

        if request.base_version != artifact.version {
            warn!(
                event_name = "regeneration.feedback.stale",
                session_id = %session_id,
                tag = %tag,
                base_version = request.base_version,
                current_version = artifact.version,
                correlation_id,
                "feedback based on an outdated artifact version"
            );
            return Err(OrchestrationError::StaleFeedback {
                session_id: session_id.clone(),
                tag,
                base_version: request.base_version,
                current_version: artifact.version,
            });
        }

        let plan = regeneration_plan(&self.orchestration, &self.analysis_roster, tag)?;

        let pending = self
            .transition(session_id, tag, session.state(tag), RegenerationEvent::FeedbackAccepted, &audit)
            .await?;
        let state = match self
            .transition(session_id, tag, pending, RegenerationEvent::RegenerationStarted, &audit)
            .await
        {
            Ok(state) => state,
            Err(error) => {
                self.record_failure(
                    session_id,
                    tag,
                    pending,
                    RegenerationEvent::RegenerationFailed,
                    &error,
                    &audit,
                )
                .await;
                return Err(error);
            }
        };

        info!(
            event_name = "regeneration.run.started",
            session_id = %session_id,
            tag = %tag,
            base_version = artifact.version,
            correlation_id,
            "regenerating artifact from feedback"
        );

        let seed = regeneration_seed(&artifact, &request.feedback_text);
        let outcome = match self.coordinator.run(&plan.roster, &seed, &plan.policy, cancel).await {
            Ok(outcome) => outcome,
            Err(error) => {
                let error = error.scoped(session_id, tag);
                let event = match error {
                    OrchestrationError::Cancelled { .. } => RegenerationEvent::Cancelled,
                    _ => RegenerationEvent::RegenerationFailed,
                };
                self.record_failure(session_id, tag, state, event, &error, &audit).await;
                return Err(error);
            }
        };

        let extraction = self.extractor.extract_tag(&outcome.transcript, &plan.roster, tag);
        let revised_content =
            extraction.document(tag).filter(|content| !content.trim().is_empty()).map(str::to_owned);
        let Some(revised_content) = revised_content else {
            let error = OrchestrationError::NoRevisionProduced {
                session_id: session_id.clone(),
                tag,
                last_sequence: outcome.transcript.last_sequence(),
            };
            self.record_failure(
                session_id,
                tag,
                state,
                RegenerationEvent::RegenerationFailed,
                &error,
                &audit,
            )
            .await;
            return Err(error);
        };

        let committed = self
            .flow
            .apply_with_audit(state, RegenerationEvent::RevisionCommitted, self.audit.as_ref(), &audit)
            .map_err(DomainError::from)?;
        let revised = artifact.revised(revised_content);
        if let Err(error) = self.store.commit_artifact(session_id, revised.clone(), committed.to).await
        {
            let error = OrchestrationError::from(error);
            self.record_failure(
                session_id,
                tag,
                state,
                RegenerationEvent::RegenerationFailed,
                &error,
                &audit,
            )
            .await;
            return Err(error);
        }
        self.audit.emit(
            AuditEvent::new(
                &audit,
                "regeneration.revision_committed",
                AuditCategory::Persistence,
                AuditOutcome::Success,
            )
            .with_detail("version", revised.version)
            .with_detail("degraded", outcome.completion.is_degraded()),
        );

        info!(
            event_name = "regeneration.run.committed",
            session_id = %session_id,
            tag = %tag,
            version = revised.version,
            degraded = outcome.completion.is_degraded(),
            correlation_id,
            "artifact revision committed"
        );

        Ok(RegenerationReport {
            session_id: session_id.clone(),
            artifact: revised,
            completion: outcome.completion,
            skipped: extraction.skipped,
        })
    }

    fn claim(
        &self,
        session_id: &SessionId,
        tag: ArtifactTag,
    ) -> Result<InFlightGuard<'_>, OrchestrationError> {
        let key = (session_id.clone(), tag);
        let inserted = match self.in_flight.lock() {
            Ok(mut slots) => slots.insert(key.clone()),
            Err(poisoned) => poisoned.into_inner().insert(key.clone()),
        };
        if !inserted {
            return Err(OrchestrationError::RegenerationInProgress {
                session_id: session_id.clone(),
                tag,
            });
        }
        Ok(InFlightGuard { slots: &self.in_flight, key })
    }

    async fn transition(
        &self,
        session_id: &SessionId,
        tag: ArtifactTag,
        current: RegenerationState,
        event: RegenerationEvent,
        audit: &AuditContext,
    ) -> Result<RegenerationState, OrchestrationError> {
        let outcome = self
            .flow
            .apply_with_audit(current, event, self.audit.as_ref(), audit)
            .map_err(DomainError::from)?;
        self.store.set_state(session_id, tag, outcome.to).await?;
        info!(
            event_name = "regeneration.transition_applied",
            session_id = %session_id,
            tag = %tag,
            from = ?outcome.from,
            to = ?outcome.to,
            event = ?outcome.event,
            correlation_id = %audit.correlation_id,
            "regeneration state changed"
        );
        Ok(outcome.to)
    }

    /// Moves the tag out of flight after a run that will not commit, and
    /// audits why.
    async fn record_failure(
        &self,
        session_id: &SessionId,
        tag: ArtifactTag,
        current: RegenerationState,
        event: RegenerationEvent,
        reason: &OrchestrationError,
        audit: &AuditContext,
    ) {
        let event_type = match event {
            RegenerationEvent::Cancelled => "regeneration.run_cancelled",
            _ => "regeneration.run_failed",
        };
        self.audit.emit(
            AuditEvent::new(audit, event_type, AuditCategory::Regeneration, AuditOutcome::Failed)
                .with_detail("error_class", reason.error_class())
                .with_detail("reason", reason),
        );

        if let Err(error) = self.transition(session_id, tag, current, event, audit).await {
            warn!(
                event_name = "regeneration.transition_failed",
                session_id = %session_id,
                error = %error,
                correlation_id = %audit.correlation_id,
                "could not record regeneration failure"
            );
        }
    }
}
