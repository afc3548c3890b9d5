use std::path::Path;

use anyhow::Error;
use serde_json::json;
use srdgen_core::{ArtifactTag, OrchestrationError, RegenerationState, SessionId};
use tracing::warn;

use crate::commands::export::SessionConflict;
use crate::commands::{
    async_runtime, build_runtime, correlation_id, export, interrupt_token, load_config,
    CommandResult, RunOptions, EXIT_EXPORT, EXIT_INPUT, EXIT_ORCHESTRATION,
};

const COMMAND: &str = "regenerate";

#[derive(Debug, Clone)]
pub struct RegenerateArgs {
    pub tag: ArtifactTag,
    pub feedback: String,
    /// Version the feedback was written against; defaults to the stored one.
    pub base_version: Option<u32>,
}

/// Claims the tag on disk, runs the regeneration against an in-memory copy
/// of the session, then merges the outcome for that tag back into
/// `session.json`. The output directory lock is held only while claiming and
/// merging, never during model calls.
pub fn run(args: &RegenerateArgs, options: &RunOptions) -> CommandResult {
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let output_dir = config.storage.output_dir.clone();

    let runtime = match build_runtime(&config, options.script.as_deref()) {
        Ok(runtime) => runtime,
        Err((class, message, code)) => return CommandResult::failure(COMMAND, class, message, code),
    };
    let executor = match async_runtime() {
        Ok(executor) => executor,
        Err((class, message, code)) => return CommandResult::failure(COMMAND, class, message, code),
    };

    let session = match export::claim_tag(&output_dir, args.tag) {
        Ok(session) => session,
        Err(error) => return disk_failure(&error, "session_read", EXIT_INPUT),
    };
    let session_id = session.id.clone();
    let claimed_from = session.state(args.tag);
    let base_version = args
        .base_version
        .or_else(|| session.artifact(args.tag).map(|artifact| artifact.version))
        .unwrap_or_default();

    let correlation_id = correlation_id(COMMAND);
    let store = runtime.store();
    let result = executor.block_on(async {
        store.insert(session).await?;
        let cancel = interrupt_token();
        let outcome = runtime
            .regenerate(&session_id, args.tag, &args.feedback, base_version, &correlation_id, &cancel)
            .await;
        let stored = store.find(&session_id).await?;
        Ok::<_, OrchestrationError>((outcome, stored))
    });

    let (outcome, stored) = match result {
        Ok(pair) => pair,
        Err(error) => {
            release_claim(&output_dir, &session_id, args.tag, claimed_from);
            return CommandResult::orchestration_failure(COMMAND, &error, &correlation_id);
        }
    };

    let report = match outcome {
        Ok(report) => report,
        Err(error) => {
            let settled =
                stored.as_ref().map(|session| session.state(args.tag)).unwrap_or(claimed_from);
            release_claim(&output_dir, &session_id, args.tag, settled);
            return CommandResult::orchestration_failure(COMMAND, &error, &correlation_id);
        }
    };

    let Some(stored) = stored else {
        release_claim(&output_dir, &session_id, args.tag, claimed_from);
        return CommandResult::failure(
            COMMAND,
            "session_not_found",
            format!("session {session_id} vanished from the store after regeneration"),
            EXIT_ORCHESTRATION,
        );
    };
    let written = match export::commit_tag(&output_dir, &stored, args.tag) {
        Ok(written) => written,
        Err(error) => {
            if error.downcast_ref::<SessionConflict>().is_none() {
                release_claim(&output_dir, &session_id, args.tag, RegenerationState::RegenFailed);
            }
            return disk_failure(&error, "export", EXIT_EXPORT);
        }
    };

    let mut message = format!(
        "{} document of session {} revised to version {}",
        args.tag, session_id, report.artifact.version
    );
    if report.completion.is_degraded() {
        message.push_str("; message cap reached before the revision was confirmed");
    }

    CommandResult::success_with(
        COMMAND,
        message,
        Some(json!({
            "session_id": session_id,
            "tag": args.tag,
            "version": report.artifact.version,
            "completion": report.completion,
            "degraded": report.completion.is_degraded(),
            "skipped": report.skipped,
            "files": written.iter().map(|path| path.display().to_string()).collect::<Vec<_>>(),
        })),
    )
}

/// Conflicts with the on-disk session are orchestration failures; anything
/// else is reported under `fallback_class`.
fn disk_failure(error: &Error, fallback_class: &str, fallback_code: u8) -> CommandResult {
    match error.downcast_ref::<SessionConflict>() {
        Some(conflict) => CommandResult::failure(
            COMMAND,
            conflict.error_class(),
            conflict.to_string(),
            EXIT_ORCHESTRATION,
        ),
        None => {
            CommandResult::failure(COMMAND, fallback_class, format!("{error:#}"), fallback_code)
        }
    }
}

/// Takes the tag out of flight on disk after a run that committed nothing.
fn release_claim(
    output_dir: &Path,
    session_id: &SessionId,
    tag: ArtifactTag,
    state: RegenerationState,
) {
    if let Err(error) = export::release_tag(output_dir, session_id, tag, state) {
        warn!(
            event_name = "regeneration.state.persist_failed",
            session_id = %session_id,
            tag = %tag,
            state = ?state,
            error = %format!("{error:#}"),
            "could not record regeneration state"
        );
    }
}
