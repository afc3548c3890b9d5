//! On-disk layout of an analysis session.
//!
//! `session.json` is the source of truth; the markdown files are rendered
//! views of the current artifact content, one per tag. Every
//! read-modify-write of the record happens under an exclusive lock on
//! `.srdgen.lock` in the output directory, so separate processes working on
//! different tags of one session never drop each other's changes.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use srdgen_core::{ArtifactTag, RegenerationState, Session, SessionId};
use thiserror::Error;

pub const SESSION_FILE: &str = "session.json";
pub const LOCK_FILE: &str = ".srdgen.lock";

/// Reasons the on-disk session refuses a change to one tag.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionConflict {
    #[error("{tag} document of session {session_id} is {state:?}; wait for it to finish")]
    InFlight { session_id: SessionId, tag: ArtifactTag, state: RegenerationState },
    #[error("session {session_id} has no {tag} document")]
    MissingArtifact { session_id: SessionId, tag: ArtifactTag },
    #[error("session {expected} was replaced by session {found} while it was being revised")]
    Replaced { expected: SessionId, found: SessionId },
}

impl SessionConflict {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::InFlight { .. } => "regeneration_in_progress",
            Self::MissingArtifact { .. } => "artifact_not_found",
            Self::Replaced { .. } => "session_replaced",
        }
    }
}

pub fn artifact_path(output_dir: &Path, tag: ArtifactTag) -> PathBuf {
    output_dir.join(format!("srd_{}.md", tag.as_str()))
}

pub fn session_path(output_dir: &Path) -> PathBuf {
    output_dir.join(SESSION_FILE)
}

/// Writes every artifact and the session record. Markdown left over from an
/// earlier session for a tag that is now absent is removed.
pub fn write_session(output_dir: &Path, session: &Session) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output dir `{}`", output_dir.display()))?;

    let mut written = Vec::new();
    for tag in ArtifactTag::ALL {
        let path = artifact_path(output_dir, tag);
        match session.artifact(tag) {
            Some(artifact) => {
                write_file(&path, &artifact.content)?;
                written.push(path);
            }
            None if path.exists() => {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove stale `{}`", path.display()))?;
            }
            None => {}
        }
    }

    written.push(write_record(output_dir, session)?);
    Ok(written)
}

/// Rewrites only the markdown of `tag` plus the session record.
pub fn write_artifact(output_dir: &Path, session: &Session, tag: ArtifactTag) -> Result<Vec<PathBuf>> {
    let artifact = session
        .artifact(tag)
        .with_context(|| format!("session {} has no {tag} artifact to write", session.id))?;
    let path = artifact_path(output_dir, tag);
    write_file(&path, &artifact.content)?;

    Ok(vec![path, write_record(output_dir, session)?])
}

pub fn read_session(output_dir: &Path) -> Result<Session> {
    let path = session_path(output_dir);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read `{}`; run `srdgen analyze` first", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("`{}` is not a valid session", path.display()))
}

/// Rewrites `session.json` alone, leaving every markdown file untouched.
pub fn write_record(output_dir: &Path, session: &Session) -> Result<PathBuf> {
    let path = session_path(output_dir);
    let raw = serde_json::to_string_pretty(session).context("failed to serialize session")?;
    write_file(&path, &raw)?;
    Ok(path)
}

/// Runs `action` while holding the output directory's exclusive lock.
/// Blocks until any other holder releases it.
pub fn with_exclusive<T>(output_dir: &Path, action: impl FnOnce() -> Result<T>) -> Result<T> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output dir `{}`", output_dir.display()))?;
    let path = output_dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("failed to open lock file `{}`", path.display()))?;

    let mut lock = fd_lock::RwLock::new(file);
    let _guard =
        lock.write().with_context(|| format!("failed to lock `{}`", path.display()))?;
    action()
}

/// Marks `tag` as `FeedbackPending` on disk and returns the session as it was
/// before the mark. Fails with [`SessionConflict::InFlight`] when another
/// process already holds the tag.
pub fn claim_tag(output_dir: &Path, tag: ArtifactTag) -> Result<Session> {
    with_exclusive(output_dir, || {
        let session = read_session(output_dir)?;
        let state = session.state(tag);
        if state.is_in_flight() {
            let session_id = session.id.clone();
            return Err(SessionConflict::InFlight { session_id, tag, state }.into());
        }
        if session.artifact(tag).is_none() {
            let session_id = session.id.clone();
            return Err(SessionConflict::MissingArtifact { session_id, tag }.into());
        }

        let mut claimed = session.clone();
        claimed.set_state(tag, RegenerationState::FeedbackPending);
        write_record(output_dir, &claimed)?;
        Ok(session)
    })
}

/// Merges the artifact and state of `tag` from `revised` into the session
/// currently on disk, then rewrites that tag's markdown and the record.
/// Changes other processes made to other tags are kept.
pub fn commit_tag(
    output_dir: &Path,
    revised: &Session,
    tag: ArtifactTag,
) -> Result<Vec<PathBuf>> {
    with_exclusive(output_dir, || {
        let mut current = read_session(output_dir)?;
        ensure_same_session(&current, &revised.id)?;
        let artifact = revised.artifact(tag).cloned().ok_or_else(|| {
            SessionConflict::MissingArtifact { session_id: revised.id.clone(), tag }
        })?;
        current.commit_artifact(artifact, revised.state(tag));
        write_artifact(output_dir, &current, tag)
    })
}

/// Records `state` for `tag` without touching any artifact.
pub fn release_tag(
    output_dir: &Path,
    session_id: &SessionId,
    tag: ArtifactTag,
    state: RegenerationState,
) -> Result<PathBuf> {
    with_exclusive(output_dir, || {
        let mut current = read_session(output_dir)?;
        ensure_same_session(&current, session_id)?;
        current.set_state(tag, state);
        write_record(output_dir, &current)
    })
}

fn ensure_same_session(current: &Session, expected: &SessionId) -> Result<()> {
    if current.id != *expected {
        let found = current.id.clone();
        return Err(SessionConflict::Replaced { expected: expected.clone(), found }.into());
    }
    Ok(())
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("failed to write `{}`", path.display()))
}
