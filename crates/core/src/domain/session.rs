use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::artifact::Artifact;
use crate::domain::role::ArtifactTag;
use crate::flows::states::RegenerationState;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(format!("S-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human request to revise one artifact. `base_version` is the version the
/// human was looking at when writing the feedback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub target: ArtifactTag,
    pub feedback_text: String,
    pub base_version: u32,
}

impl FeedbackRequest {
    pub fn new(target: ArtifactTag, feedback_text: impl Into<String>, base_version: u32) -> Self {
        Self { target, feedback_text: feedback_text.into(), base_version }
    }
}

/// Aggregate of the artifacts produced for one analyzed document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub artifacts: BTreeMap<ArtifactTag, Artifact>,
    /// Tags whose producing roles never spoke during analysis.
    pub absent: BTreeSet<ArtifactTag>,
    #[serde(default)]
    pub states: BTreeMap<ArtifactTag, RegenerationState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: SessionId,
        artifacts: impl IntoIterator<Item = Artifact>,
        absent: impl IntoIterator<Item = ArtifactTag>,
    ) -> Self {
        let now = Utc::now();
        let artifacts: BTreeMap<ArtifactTag, Artifact> =
            artifacts.into_iter().map(|artifact| (artifact.tag, artifact)).collect();
        let states = artifacts.keys().map(|tag| (*tag, RegenerationState::Stable)).collect();
        Self {
            id,
            artifacts,
            absent: absent.into_iter().collect(),
            states,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn artifact(&self, tag: ArtifactTag) -> Option<&Artifact> {
        self.artifacts.get(&tag)
    }

    pub fn state(&self, tag: ArtifactTag) -> RegenerationState {
        self.states.get(&tag).copied().unwrap_or(RegenerationState::Stable)
    }

    pub fn set_state(&mut self, tag: ArtifactTag, state: RegenerationState) {
        self.states.insert(tag, state);
        self.updated_at = Utc::now();
    }

    /// Replaces the artifact with the same tag. Other tags are left as-is.
    pub fn commit_artifact(&mut self, artifact: Artifact, state: RegenerationState) {
        let tag = artifact.tag;
        self.absent.remove(&tag);
        self.artifacts.insert(tag, artifact);
        self.set_state(tag, state);
    }
}

#[cfg(test)]
mod tests {
    use super::{Session, SessionId};
    use crate::domain::artifact::Artifact;
    use crate::domain::role::ArtifactTag;
    use crate::flows::states::RegenerationState;

    #[test]
    fn commit_touches_only_the_committed_tag() {
        let mut session = Session::new(
            SessionId("S-1".to_string()),
            vec![
                Artifact::initial(ArtifactTag::Frontend, "screens"),
                Artifact::initial(ArtifactTag::Backend, "endpoints"),
            ],
            Vec::new(),
        );
        let backend_before = session.artifact(ArtifactTag::Backend).cloned();

        let revised = session
            .artifact(ArtifactTag::Frontend)
            .map(|artifact| artifact.revised("screens v2"))
            .expect("frontend present");
        session.commit_artifact(revised, RegenerationState::Stable);

        assert_eq!(session.artifact(ArtifactTag::Frontend).map(|a| a.version), Some(2));
        assert_eq!(session.artifact(ArtifactTag::Backend).cloned(), backend_before);
    }

    #[test]
    fn session_round_trips_through_json() {
        let session = Session::new(
            SessionId::generate(),
            vec![Artifact::initial(ArtifactTag::Frontend, "screens")],
            vec![ArtifactTag::Backend],
        );

        let json = serde_json::to_string(&session).expect("serialize");
        let restored: Session = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, session);
        assert_eq!(restored.state(ArtifactTag::Backend), RegenerationState::Stable);
    }
}
