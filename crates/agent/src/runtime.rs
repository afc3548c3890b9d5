use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use srdgen_core::config::{AppConfig, OrchestrationConfig};
use srdgen_core::{
    Artifact, ArtifactExtractor, ArtifactTag, AuditCategory, AuditContext, AuditEvent,
    AuditOutcome, AuditSink, Completion, Extraction, FeedbackRequest, InMemoryAuditSink,
    OrchestrationError, RoleRoster, Session, SessionId, SkippedContribution, Transcript,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::controller::{FeedbackRegenerationController, RegenerationReport};
use crate::coordinator::{ConversationCoordinator, RetryPolicy};
use crate::llm::{ModelClient, OpenAiChatClient};
use crate::prompts::{analysis_plan, ConversationPlan};
use crate::store::{InMemorySessionStore, SessionStore};

pub const SUMMARY_MAX_CHARS: usize = 1000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    pub session: Session,
    pub completion: Completion,
    pub messages: usize,
    pub skipped: Vec<SkippedContribution>,
    /// Contributions of roles that produce no artifact, truncated.
    pub summary: String,
}

impl AnalysisReport {
    pub fn is_degraded(&self) -> bool {
        self.completion.is_degraded()
    }

    pub fn absent(&self) -> &BTreeSet<ArtifactTag> {
        &self.session.absent
    }
}

/// Entry point used by the presentation layer: one analysis call per
/// document and one regeneration call per piece of feedback.
pub struct AgentRuntime {
    coordinator: ConversationCoordinator,
    controller: FeedbackRegenerationController,
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    analysis: ConversationPlan,
    orchestration: OrchestrationConfig,
    extractor: ArtifactExtractor,
}

impl AgentRuntime {
    pub fn new(
        client: Arc<dyn ModelClient>,
        store: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
        config: &AppConfig,
    ) -> Result<Self, OrchestrationError> {
        let analysis = analysis_plan(&config.orchestration, &config.roles)?;
        let coordinator = ConversationCoordinator::new(
            client,
            RetryPolicy::from_config(&config.llm),
            Duration::from_secs(config.llm.timeout_secs),
        );
        let controller = FeedbackRegenerationController::new(
            coordinator.clone(),
            store.clone(),
            audit.clone(),
            analysis.roster.clone(),
            config.orchestration.clone(),
        );

        Ok(Self {
            coordinator,
            controller,
            store,
            audit,
            analysis,
            orchestration: config.orchestration.clone(),
            extractor: ArtifactExtractor::new(config.orchestration.min_contribution_chars),
        })
    }

    /// Runtime talking to the configured OpenAI-compatible endpoint with
    /// in-memory session storage.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = OpenAiChatClient::from_config(&config.llm)
            .context("failed to build model client from llm config")?;
        Self::new(
            Arc::new(client),
            Arc::new(InMemorySessionStore::default()),
            Arc::new(InMemoryAuditSink::default()),
            config,
        )
        .context("failed to assemble analysis roster")
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        self.store.clone()
    }

    pub fn analysis_roster(&self) -> &RoleRoster {
        &self.analysis.roster
    }

    pub async fn analyze(
        &self,
        document_text: &str,
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, OrchestrationError> {
        let min_chars = self.orchestration.min_input_chars;
        if document_text.trim().chars().count() < min_chars {
            return Err(OrchestrationError::EmptyInput { field: "document_text", min_chars });
        }

        info!(
            event_name = "orchestration.analysis.started",
            document_chars = document_text.len(),
            roles = self.analysis.roster.len(),
            max_messages = self.analysis.policy.max_messages(),
            correlation_id,
            "starting requirements analysis"
        );

        let outcome = self
            .coordinator
            .run(&self.analysis.roster, document_text, &self.analysis.policy, cancel)
            .await?;

        let extraction = self.extractor.extract(&outcome.transcript, &self.analysis.roster);
        log_skipped(&extraction, correlation_id);

        let absent = extraction.absent_tags(&self.analysis.roster);
        let artifacts: Vec<Artifact> = extraction
            .documents
            .iter()
            .map(|(tag, content)| Artifact::initial(*tag, content.clone()))
            .collect();
        let session = Session::new(SessionId::generate(), artifacts, absent);
        self.store.insert(session.clone()).await?;

        self.audit.emit(
            AuditEvent::new(
                &AuditContext::new(correlation_id, "agent-runtime").for_session(session.id.clone()),
                "analysis.session_created",
                AuditCategory::Analysis,
                AuditOutcome::Success,
            )
            .with_detail("messages", outcome.transcript.len())
            .with_detail("degraded", outcome.completion.is_degraded())
            .with_detail("absent", session.absent.len()),
        );

        info!(
            event_name = "orchestration.analysis.completed",
            session_id = %session.id,
            messages = outcome.transcript.len(),
            degraded = outcome.completion.is_degraded(),
            absent = session.absent.len(),
            correlation_id,
            "requirements analysis completed"
        );

        Ok(AnalysisReport {
            summary: analysis_summary(&outcome.transcript, &self.analysis.roster),
            messages: outcome.transcript.len(),
            completion: outcome.completion,
            skipped: extraction.skipped,
            session,
        })
    }

    pub async fn regenerate(
        &self,
        session_id: &SessionId,
        tag: ArtifactTag,
        feedback_text: &str,
        base_version: u32,
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RegenerationReport, OrchestrationError> {
        let request = FeedbackRequest::new(tag, feedback_text, base_version);
        self.controller.regenerate(session_id, request, correlation_id, cancel).await
    }

    /// Extraction of whatever the analysis roster produced before a model
    /// failure cut the run short.
    pub fn partial_extraction(&self, error: &OrchestrationError) -> Option<Extraction> {
        error
            .partial_transcript()
            .map(|transcript| self.extractor.extract(transcript, &self.analysis.roster))
    }
}

fn log_skipped(extraction: &Extraction, correlation_id: &str) {
    for skipped in &extraction.skipped {
        warn!(
            event_name = "extraction.contribution_skipped",
            role = %skipped.speaker,
            sequence = skipped.sequence,
            chars = skipped.chars,
            correlation_id,
            "contribution too short to include in artifact"
        );
    }
}

/// Joins the messages of non-producing roles, truncated to
/// [`SUMMARY_MAX_CHARS`] characters with a trailing `...`.
pub fn analysis_summary(transcript: &Transcript, roster: &RoleRoster) -> String {
    let summary = transcript
        .messages()
        .iter()
        .filter(|message| {
            roster.get(&message.speaker).map(|role| !role.is_contributor()).unwrap_or(false)
        })
        .map(|message| message.content.trim())
        .collect::<Vec<_>>()
        .join("\n\n");

    if summary.chars().count() > SUMMARY_MAX_CHARS {
        let truncated: String = summary.chars().take(SUMMARY_MAX_CHARS).collect();
        format!("{truncated}...")
    } else {
        summary
    }
}
