use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use srdgen_agent::{
    AgentRuntime, ConversationCoordinator, InMemorySessionStore, ModelClient, ModelError,
    RetryPolicy, ScriptedModelClient, SessionStore, StoreError,
};
use srdgen_core::config::AppConfig;
use srdgen_core::{
    AgentRole, Artifact, ArtifactExtractor, ArtifactTag, AuditCategory, AuditOutcome, Completion,
    InMemoryAuditSink, OrchestrationError, RegenerationState, RoleRoster, Session, SessionId,
    TerminationPolicy,
};
use tokio::sync::{oneshot, Mutex, Notify};
use tokio_util::sync::CancellationToken;

const DOCUMENT: &str = "Build a todo app with login, per-user lists and reminders.";

const ANALYSIS_SCRIPT: [&str; 4] = [
    "FRONTEND: login form, todo list. BACKEND: auth API, todo storage.",
    "# Frontend SRD\nLogin form and todo list screens.",
    "# Backend SRD\nPOST /login and CRUD /todos.",
    "Both documents cover the input. ANALYSIS COMPLETE",
];

const FRONTEND_REVISION_SCRIPT: [&str; 3] = [
    "Add a dark mode toggle to the settings screen.",
    "# Frontend SRD\nLogin, todo list and settings with dark mode.",
    "All feedback addressed. REVISION COMPLETE",
];

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.llm.max_retries = 1;
    config.llm.retry_base_delay_ms = 1;
    config.llm.retry_max_delay_ms = 1;
    config
}

fn runtime_with(client: Arc<dyn ModelClient>) -> (AgentRuntime, Arc<dyn SessionStore>, InMemoryAuditSink) {
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::default());
    let audit = InMemoryAuditSink::default();
    let runtime = AgentRuntime::new(client, store.clone(), Arc::new(audit.clone()), &test_config())
        .expect("runtime assembles");
    (runtime, store, audit)
}

fn scripted(replies: impl IntoIterator<Item = &'static str>) -> Arc<ScriptedModelClient> {
    Arc::new(ScriptedModelClient::new(replies))
}

fn coordinator(client: Arc<dyn ModelClient>) -> ConversationCoordinator {
    ConversationCoordinator::new(
        client,
        RetryPolicy { max_retries: 0, base_delay_ms: 1, max_delay_ms: 1 },
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn identical_inputs_produce_byte_identical_artifacts() {
    let (first, _, _) = runtime_with(scripted(ANALYSIS_SCRIPT));
    let (second, _, _) = runtime_with(scripted(ANALYSIS_SCRIPT));
    let cancel = CancellationToken::new();

    let a = first.analyze(DOCUMENT, "req-a", &cancel).await.expect("first analysis");
    let b = second.analyze(DOCUMENT, "req-b", &cancel).await.expect("second analysis");

    assert_ne!(a.session.id, b.session.id);
    assert_eq!(a.session.artifacts, b.session.artifacts);
    assert_eq!(a.summary, b.summary);
}

#[tokio::test]
async fn speaker_of_message_i_is_role_i_mod_n() {
    let roster = RoleRoster::new(vec![
        AgentRole::new("Analyst", "a", []),
        AgentRole::new("Frontend", "f", [ArtifactTag::Frontend]),
        AgentRole::new("Backend", "b", [ArtifactTag::Backend]),
    ])
    .expect("valid roster");
    let replies: Vec<String> = (0..7).map(|index| format!("reply number {index}")).collect();
    let client = Arc::new(ScriptedModelClient::new(replies));
    let policy = TerminationPolicy::new(7).expect("policy");

    let outcome = coordinator(client)
        .run(&roster, DOCUMENT, &policy, &CancellationToken::new())
        .await
        .expect("run completes");

    for (index, message) in outcome.transcript.messages().iter().enumerate() {
        assert_eq!(message.sequence, index as u64);
        assert_eq!(message.speaker, roster.speaker_at(index).name);
    }
}

#[tokio::test]
async fn cap_without_marker_is_degraded_at_exactly_cap_messages() {
    let roster = RoleRoster::new(vec![
        AgentRole::new("Frontend", "f", [ArtifactTag::Frontend]),
        AgentRole::new("Coordinator", "c", []),
    ])
    .expect("valid roster");
    let client = scripted(["one....", "two....", "three..", "four...", "five...", "six....", "seven.."]);
    let policy = TerminationPolicy::new(6).expect("policy").with_completion("Coordinator", "DONE!");

    let outcome = coordinator(client.clone())
        .run(&roster, DOCUMENT, &policy, &CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(outcome.transcript.len(), 6);
    assert_eq!(outcome.completion, Completion::CapReached { messages: 6 });
    assert!(outcome.is_degraded());
    assert_eq!(client.remaining().await, 1);
}

#[tokio::test]
async fn terminal_role_marker_on_third_reply_stops_at_that_message() {
    let roster = RoleRoster::new(vec![
        AgentRole::new("Backend", "b", [ArtifactTag::Backend]),
        AgentRole::new("Coordinator", "c", []),
    ])
    .expect("valid roster");
    let client = scripted([
        "endpoints v1",
        "missing auth",
        "endpoints v2",
        "missing rate limits",
        "endpoints v3",
        "All covered. DONE!",
        "never requested",
    ]);
    let policy = TerminationPolicy::new(20).expect("policy").with_completion("Coordinator", "DONE!");

    let outcome = coordinator(client)
        .run(&roster, DOCUMENT, &policy, &CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(outcome.transcript.len(), 6);
    assert_eq!(outcome.completion, Completion::MarkerReached { sequence: 5 });
    assert!(!outcome.is_degraded());
}

#[tokio::test]
async fn end_to_end_todo_example_partitions_replies_by_role() {
    let roster = RoleRoster::new(vec![
        AgentRole::new("FrontendSpecialist", "f", [ArtifactTag::Frontend]),
        AgentRole::new("BackendSpecialist", "b", [ArtifactTag::Backend]),
    ])
    .expect("valid roster");
    let client = scripted(["FRONTEND: ...", "BACKEND: ...", "FRONTEND: ...", "DONE"]);
    let policy = TerminationPolicy::new(4).expect("policy");

    let outcome = coordinator(client)
        .run(&roster, "Build a todo app with login", &policy, &CancellationToken::new())
        .await
        .expect("run completes");
    let extraction = ArtifactExtractor::default().extract(&outcome.transcript, &roster);

    assert_eq!(outcome.transcript.len(), 4);
    assert_eq!(outcome.completion, Completion::CapReached { messages: 4 });
    assert_eq!(
        extraction.document(ArtifactTag::Frontend),
        Some("## FrontendSpecialist\n\nFRONTEND: ...\n\nFRONTEND: ...")
    );
    assert_eq!(extraction.document(ArtifactTag::Backend), Some("## BackendSpecialist\n\nBACKEND: ..."));
    assert_eq!(extraction.skipped.len(), 1);
    assert_eq!(extraction.skipped[0].sequence, 3);
}

#[tokio::test]
async fn analysis_builds_session_with_both_artifacts_and_summary() {
    let (runtime, store, audit) = runtime_with(scripted(ANALYSIS_SCRIPT));

    let report =
        runtime.analyze(DOCUMENT, "req-1", &CancellationToken::new()).await.expect("analysis");

    assert_eq!(report.completion, Completion::MarkerReached { sequence: 3 });
    assert_eq!(report.messages, 4);
    assert!(report.absent().is_empty());
    assert_eq!(
        report.session.artifact(ArtifactTag::Backend).map(|artifact| artifact.content.as_str()),
        Some("## BackendSpecialist\n\n# Backend SRD\nPOST /login and CRUD /todos.")
    );
    assert!(report.summary.starts_with("FRONTEND: login form"));
    assert!(report.summary.ends_with("ANALYSIS COMPLETE"));

    let stored = store.find(&report.session.id).await.expect("store read").expect("stored");
    assert_eq!(stored, report.session);
    assert_eq!(audit.events()[0].event_type, "analysis.session_created");
}

#[tokio::test]
async fn regenerating_frontend_leaves_backend_deep_equal() {
    let client = scripted(ANALYSIS_SCRIPT.into_iter().chain(FRONTEND_REVISION_SCRIPT));
    let (runtime, store, audit) = runtime_with(client);
    let cancel = CancellationToken::new();

    let analysis = runtime.analyze(DOCUMENT, "req-1", &cancel).await.expect("analysis");
    let backend_before = analysis.session.artifact(ArtifactTag::Backend).cloned();

    let report = runtime
        .regenerate(
            &analysis.session.id,
            ArtifactTag::Frontend,
            "Please add a dark mode toggle",
            1,
            "req-2",
            &cancel,
        )
        .await
        .expect("regeneration");

    assert_eq!(report.artifact.version, 2);
    assert_eq!(
        report.artifact.content,
        "## FrontendSpecialist\n\n# Frontend SRD\nLogin, todo list and settings with dark mode."
    );
    assert_eq!(report.artifact.history.len(), 1);
    assert_eq!(report.completion, Completion::MarkerReached { sequence: 2 });

    let session = store.find(&analysis.session.id).await.expect("read").expect("stored");
    assert_eq!(session.artifact(ArtifactTag::Backend).cloned(), backend_before);
    assert_eq!(session.artifact(ArtifactTag::Frontend), Some(&report.artifact));
    assert_eq!(session.state(ArtifactTag::Frontend), RegenerationState::Stable);

    let transitions: Vec<String> = audit
        .of_type("regeneration.transition_applied")
        .iter()
        .filter_map(|event| event.detail("to").map(str::to_owned))
        .collect();
    assert_eq!(transitions, vec!["FeedbackPending", "Regenerating", "Stable"]);

    let committed = audit.of_type("regeneration.revision_committed");
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].category, AuditCategory::Persistence);
    assert_eq!(committed[0].detail("version"), Some("2"));
    assert!(audit.for_tag(ArtifactTag::Backend).is_empty());
}

#[tokio::test]
async fn stale_base_version_is_rejected_and_artifact_untouched() {
    let client = scripted(ANALYSIS_SCRIPT.into_iter().chain(FRONTEND_REVISION_SCRIPT));
    let (runtime, store, _) = runtime_with(client.clone());
    let cancel = CancellationToken::new();

    let analysis = runtime.analyze(DOCUMENT, "req-1", &cancel).await.expect("analysis");
    let id = analysis.session.id.clone();
    runtime
        .regenerate(&id, ArtifactTag::Frontend, "Add dark mode", 1, "req-2", &cancel)
        .await
        .expect("first regeneration");
    let before = store.find(&id).await.expect("read").expect("stored");
    let calls_before = client.calls().await.len();

    let error = runtime
        .regenerate(&id, ArtifactTag::Frontend, "Also add offline mode", 1, "req-3", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        OrchestrationError::StaleFeedback { base_version: 1, current_version: 2, .. }
    ));
    assert_eq!(store.find(&id).await.expect("read").expect("stored"), before);
    assert_eq!(client.calls().await.len(), calls_before);
}

#[tokio::test]
async fn failed_regeneration_parks_tag_in_regen_failed_without_changes() {
    let client = Arc::new(ScriptedModelClient::from_outcomes(
        ANALYSIS_SCRIPT
            .into_iter()
            .map(|reply| Ok(reply.to_string()))
            .chain([
                Err(ModelError::Unavailable("down".to_string())),
                Err(ModelError::Unavailable("still down".to_string())),
            ])
            .chain(FRONTEND_REVISION_SCRIPT.into_iter().map(|reply| Ok(reply.to_string()))),
    ));
    let (runtime, store, audit) = runtime_with(client);
    let cancel = CancellationToken::new();

    let analysis = runtime.analyze(DOCUMENT, "req-1", &cancel).await.expect("analysis");
    let id = analysis.session.id.clone();

    let error = runtime
        .regenerate(&id, ArtifactTag::Frontend, "Add dark mode", 1, "req-2", &cancel)
        .await
        .unwrap_err();
    let failures = audit.of_type("regeneration.run_failed");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].outcome, AuditOutcome::Failed);
    assert_eq!(failures[0].detail("error_class"), Some("model_unavailable"));
    assert!(matches!(
        &error,
        OrchestrationError::ModelUnavailable { session_id: Some(session), tag: Some(ArtifactTag::Frontend), .. }
            if *session == id
    ));

    let session = store.find(&id).await.expect("read").expect("stored");
    assert_eq!(session.state(ArtifactTag::Frontend), RegenerationState::RegenFailed);
    assert_eq!(session.artifact(ArtifactTag::Frontend), analysis.session.artifact(ArtifactTag::Frontend));

    let retried = runtime
        .regenerate(&id, ArtifactTag::Frontend, "Add dark mode", 1, "req-3", &cancel)
        .await
        .expect("retry after failure");
    assert_eq!(retried.artifact.version, 2);
}

#[tokio::test]
async fn truncated_analysis_still_extracts_contributed_tags() {
    let client = Arc::new(ScriptedModelClient::from_outcomes(vec![
        Ok(ANALYSIS_SCRIPT[0].to_string()),
        Ok(ANALYSIS_SCRIPT[1].to_string()),
        Err(ModelError::Timeout(Duration::from_secs(60))),
        Err(ModelError::Unavailable("connection reset".to_string())),
    ]));
    let (runtime, _, _) = runtime_with(client);

    let error =
        runtime.analyze(DOCUMENT, "req-1", &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(
        error,
        OrchestrationError::ModelUnavailable { sequence: 2, attempts: 2, ref role, .. } if role == "BackendSpecialist"
    ));

    let partial = runtime.partial_extraction(&error).expect("partial transcript available");
    assert!(partial.document(ArtifactTag::Frontend).is_some_and(|doc| doc.contains("Login form")));
    assert_eq!(partial.document(ArtifactTag::Backend), None);
    assert_eq!(
        partial.absent_tags(runtime.analysis_roster()).into_iter().collect::<Vec<_>>(),
        vec![ArtifactTag::Backend]
    );
}

#[tokio::test]
async fn short_document_is_rejected_before_any_model_call() {
    let client = scripted(ANALYSIS_SCRIPT);
    let (runtime, _, _) = runtime_with(client.clone());

    let error = runtime.analyze("  todo  ", "req-1", &CancellationToken::new()).await.unwrap_err();

    assert_eq!(error, OrchestrationError::EmptyInput { field: "document_text", min_chars: 10 });
    assert!(client.calls().await.is_empty());
}

#[tokio::test]
async fn blank_feedback_is_rejected() {
    let (runtime, _, _) = runtime_with(scripted(ANALYSIS_SCRIPT));
    let cancel = CancellationToken::new();
    let analysis = runtime.analyze(DOCUMENT, "req-1", &cancel).await.expect("analysis");

    let error = runtime
        .regenerate(&analysis.session.id, ArtifactTag::Backend, "   ", 1, "req-2", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(error, OrchestrationError::EmptyInput { field: "feedback_text", .. }));
}

#[tokio::test]
async fn feedback_shorter_than_minimum_is_rejected_before_any_model_call() {
    let client = scripted(ANALYSIS_SCRIPT.into_iter().chain(FRONTEND_REVISION_SCRIPT));
    let (runtime, store, _) = runtime_with(client.clone());
    let cancel = CancellationToken::new();
    let analysis = runtime.analyze(DOCUMENT, "req-1", &cancel).await.expect("analysis");
    let calls_after_analysis = client.calls().await.len();

    let error = runtime
        .regenerate(&analysis.session.id, ArtifactTag::Frontend, " ok ", 1, "req-2", &cancel)
        .await
        .unwrap_err();

    assert_eq!(error, OrchestrationError::EmptyInput { field: "feedback_text", min_chars: 3 });
    assert_eq!(client.calls().await.len(), calls_after_analysis);
    let session = store.find(&analysis.session.id).await.expect("read").expect("stored");
    assert_eq!(session.state(ArtifactTag::Frontend), RegenerationState::Stable);
}

#[tokio::test]
async fn cancelled_regeneration_returns_tag_to_stable() {
    let (runtime, store, _) = runtime_with(scripted(ANALYSIS_SCRIPT));
    let analysis =
        runtime.analyze(DOCUMENT, "req-1", &CancellationToken::new()).await.expect("analysis");
    let id = analysis.session.id.clone();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let error = runtime
        .regenerate(&id, ArtifactTag::Backend, "Use GraphQL", 1, "req-2", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        OrchestrationError::Cancelled { tag: Some(ArtifactTag::Backend), last_sequence: None, .. }
    ));
    let session = store.find(&id).await.expect("read").expect("stored");
    assert_eq!(session.state(ArtifactTag::Backend), RegenerationState::Stable);
    assert_eq!(session.artifact(ArtifactTag::Backend), analysis.session.artifact(ArtifactTag::Backend));
}

/// Holds the first call until the test releases it.
struct GatedClient {
    entered: Notify,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    inner: ScriptedModelClient,
}

#[async_trait]
impl ModelClient for GatedClient {
    async fn complete(&self, system_prompt: &str, context: &str) -> Result<String, ModelError> {
        let gate = self.gate.lock().await.take();
        if let Some(gate) = gate {
            self.entered.notify_one();
            let _ = gate.await;
        }
        self.inner.complete(system_prompt, context).await
    }
}

#[tokio::test]
async fn concurrent_regeneration_of_same_tag_is_rejected() {
    let analysis_client = scripted(ANALYSIS_SCRIPT);
    let (analysis_runtime, store, _) = runtime_with(analysis_client);
    let analysis = analysis_runtime
        .analyze(DOCUMENT, "req-1", &CancellationToken::new())
        .await
        .expect("analysis");
    let id = analysis.session.id.clone();

    let (release, gate) = oneshot::channel();
    let gated = Arc::new(GatedClient {
        entered: Notify::new(),
        gate: Mutex::new(Some(gate)),
        inner: ScriptedModelClient::new(FRONTEND_REVISION_SCRIPT),
    });
    let runtime = Arc::new(
        AgentRuntime::new(gated.clone(), store.clone(), Arc::new(InMemoryAuditSink::default()), &test_config())
            .expect("runtime assembles"),
    );

    let background = {
        let runtime = runtime.clone();
        let id = id.clone();
        tokio::spawn(async move {
            runtime
                .regenerate(&id, ArtifactTag::Frontend, "Add dark mode", 1, "req-2", &CancellationToken::new())
                .await
        })
    };
    gated.entered.notified().await;

    let error = runtime
        .regenerate(&id, ArtifactTag::Frontend, "Add offline mode", 1, "req-3", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(error, OrchestrationError::RegenerationInProgress { tag: ArtifactTag::Frontend, .. }));

    let in_flight = store.find(&id).await.expect("read").expect("stored");
    assert_eq!(in_flight.state(ArtifactTag::Frontend), RegenerationState::Regenerating);

    let _ = release.send(());
    let report = background.await.expect("task joins").expect("first regeneration succeeds");
    assert_eq!(report.artifact.version, 2);
}

/// Cancels `token` from inside call number `cancel_on_call` (1-based), then
/// answers that call normally.
struct CancellingClient {
    token: CancellationToken,
    cancel_on_call: usize,
    calls: AtomicUsize,
    inner: ScriptedModelClient,
}

#[async_trait]
impl ModelClient for CancellingClient {
    async fn complete(&self, system_prompt: &str, context: &str) -> Result<String, ModelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.cancel_on_call {
            self.token.cancel();
        }
        self.inner.complete(system_prompt, context).await
    }
}

#[tokio::test]
async fn analysis_cancelled_after_first_turn_creates_no_session() {
    let cancel = CancellationToken::new();
    let client = Arc::new(CancellingClient {
        token: cancel.clone(),
        cancel_on_call: 1,
        calls: AtomicUsize::new(0),
        inner: ScriptedModelClient::new(ANALYSIS_SCRIPT),
    });
    let store = Arc::new(InMemorySessionStore::default());
    let audit = InMemoryAuditSink::default();
    let runtime =
        AgentRuntime::new(client.clone(), store.clone(), Arc::new(audit.clone()), &test_config())
            .expect("runtime assembles");

    let error = runtime.analyze(DOCUMENT, "req-1", &cancel).await.unwrap_err();

    assert_eq!(
        error,
        OrchestrationError::Cancelled { session_id: None, tag: None, last_sequence: Some(0) }
    );
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert!(store.is_empty().await);
    assert!(audit.events().is_empty());
}

#[tokio::test]
async fn cancellation_during_retry_backoff_returns_tag_to_stable() {
    let (analysis_runtime, store, _) = runtime_with(scripted(ANALYSIS_SCRIPT));
    let analysis = analysis_runtime
        .analyze(DOCUMENT, "req-1", &CancellationToken::new())
        .await
        .expect("analysis");
    let id = analysis.session.id.clone();

    let mut slow_retries = test_config();
    slow_retries.llm.max_retries = 3;
    slow_retries.llm.retry_base_delay_ms = 60_000;
    slow_retries.llm.retry_max_delay_ms = 60_000;

    let cancel = CancellationToken::new();
    let client = Arc::new(CancellingClient {
        token: cancel.clone(),
        cancel_on_call: 1,
        calls: AtomicUsize::new(0),
        inner: ScriptedModelClient::from_outcomes(vec![Err(ModelError::Unavailable(
            "connection reset".to_string(),
        ))]),
    });
    let audit = InMemoryAuditSink::default();
    let runtime =
        AgentRuntime::new(client.clone(), store.clone(), Arc::new(audit.clone()), &slow_retries)
            .expect("runtime assembles");

    let error = tokio::time::timeout(
        Duration::from_secs(5),
        runtime.regenerate(&id, ArtifactTag::Backend, "Use GraphQL", 1, "req-2", &cancel),
    )
    .await
    .expect("backoff sleep is interrupted by cancellation")
    .unwrap_err();

    assert!(matches!(
        &error,
        OrchestrationError::Cancelled {
            session_id: Some(session),
            tag: Some(ArtifactTag::Backend),
            last_sequence: None,
        } if *session == id
    ));
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    let session = store.find(&id).await.expect("read").expect("stored");
    assert_eq!(session.state(ArtifactTag::Backend), RegenerationState::Stable);
    assert_eq!(session.artifact(ArtifactTag::Backend), analysis.session.artifact(ArtifactTag::Backend));
    assert_eq!(audit.of_type("regeneration.run_cancelled").len(), 1);
}

/// Fails the first write that would move a tag to `Regenerating`.
struct FlakyStateStore {
    inner: InMemorySessionStore,
    failed_once: AtomicBool,
}

#[async_trait]
impl SessionStore for FlakyStateStore {
    async fn insert(&self, session: Session) -> Result<(), StoreError> {
        self.inner.insert(session).await
    }

    async fn find(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        self.inner.find(id).await
    }

    async fn set_state(
        &self,
        id: &SessionId,
        tag: ArtifactTag,
        state: RegenerationState,
    ) -> Result<(), StoreError> {
        let starting = state == RegenerationState::Regenerating;
        if starting && !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".to_string()));
        }
        self.inner.set_state(id, tag, state).await
    }

    async fn commit_artifact(
        &self,
        id: &SessionId,
        artifact: Artifact,
        state: RegenerationState,
    ) -> Result<(), StoreError> {
        self.inner.commit_artifact(id, artifact, state).await
    }
}

#[tokio::test]
async fn failed_start_write_does_not_leave_tag_pending() {
    let client = scripted(ANALYSIS_SCRIPT.into_iter().chain(FRONTEND_REVISION_SCRIPT));
    let store: Arc<dyn SessionStore> = Arc::new(FlakyStateStore {
        inner: InMemorySessionStore::default(),
        failed_once: AtomicBool::new(false),
    });
    let audit = InMemoryAuditSink::default();
    let runtime =
        AgentRuntime::new(client.clone(), store.clone(), Arc::new(audit.clone()), &test_config())
            .expect("runtime assembles");
    let cancel = CancellationToken::new();
    let analysis = runtime.analyze(DOCUMENT, "req-1", &cancel).await.expect("analysis");
    let id = analysis.session.id.clone();
    let calls_after_analysis = client.calls().await.len();

    let error = runtime
        .regenerate(&id, ArtifactTag::Frontend, "Add dark mode", 1, "req-2", &cancel)
        .await
        .unwrap_err();

    assert_eq!(error, OrchestrationError::Storage("disk full".to_string()));
    assert_eq!(client.calls().await.len(), calls_after_analysis);
    let session = store.find(&id).await.expect("read").expect("stored");
    assert_eq!(session.state(ArtifactTag::Frontend), RegenerationState::RegenFailed);
    assert_eq!(audit.of_type("regeneration.run_failed")[0].detail("error_class"), Some("storage"));

    let retried = runtime
        .regenerate(&id, ArtifactTag::Frontend, "Add dark mode", 1, "req-3", &cancel)
        .await
        .expect("retry after failed start");
    assert_eq!(retried.artifact.version, 2);
}
