use std::path::{Path, PathBuf};

use serde_json::json;
use srdgen_core::{ArtifactTag, RegenerationState, SessionId};

use crate::commands::{export, load_config, CommandResult, RunOptions, EXIT_EXPORT, EXIT_INPUT};

const COMMAND: &str = "rollback";

struct Restored {
    session_id: SessionId,
    version: u32,
    written: Vec<PathBuf>,
}

/// Restores the previous content of `tag` as a new version. Refused while
/// the artifact has a regeneration in flight, including one running in
/// another process.
pub fn run(tag: ArtifactTag, options: &RunOptions) -> CommandResult {
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let output_dir = &config.storage.output_dir;

    let locked = export::with_exclusive(output_dir, || Ok(restore_locked(output_dir, tag)));
    let restored = match locked {
        Ok(Ok(restored)) => restored,
        Ok(Err(result)) => return result,
        Err(error) => {
            let message = format!("{error:#}");
            return CommandResult::failure(COMMAND, "session_lock", message, EXIT_EXPORT);
        }
    };

    let Restored { session_id, version, written } = restored;
    CommandResult::success_with(
        COMMAND,
        format!("{tag} document of session {session_id} restored as version {version}"),
        Some(json!({
            "session_id": session_id,
            "tag": tag,
            "version": version,
            "files": written.iter().map(|path| path.display().to_string()).collect::<Vec<_>>(),
        })),
    )
}

/// Read-modify-write of the session record; the caller holds the lock.
fn restore_locked(output_dir: &Path, tag: ArtifactTag) -> Result<Restored, CommandResult> {
    let mut session = export::read_session(output_dir).map_err(|error| {
        CommandResult::failure(COMMAND, "session_read", format!("{error:#}"), EXIT_INPUT)
    })?;

    let state = session.state(tag);
    if state.is_in_flight() {
        return Err(CommandResult::failure(
            COMMAND,
            "regeneration_in_progress",
            format!("{tag} is {state:?}; wait for the regeneration to finish"),
            EXIT_INPUT,
        ));
    }

    let Some(artifact) = session.artifact(tag) else {
        return Err(CommandResult::failure(
            COMMAND,
            "artifact_not_found",
            format!("session {} has no {tag} document", session.id),
            EXIT_INPUT,
        ));
    };
    let restored = artifact.rolled_back().map_err(|error| {
        CommandResult::failure(COMMAND, "nothing_to_rollback", error.to_string(), EXIT_INPUT)
    })?;

    let version = restored.version;
    session.commit_artifact(restored, RegenerationState::Stable);
    let written = export::write_artifact(output_dir, &session, tag).map_err(|error| {
        CommandResult::failure(COMMAND, "export", format!("{error:#}"), EXIT_EXPORT)
    })?;

    Ok(Restored { session_id: session.id, version, written })
}
