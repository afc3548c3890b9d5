use serde::{Deserialize, Serialize};

use crate::domain::role::ArtifactTag;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRevision {
    pub version: u32,
    pub content: String,
}

/// A named document produced by extraction and refined by regeneration.
///
/// `version` starts at 1 and moves forward only; every superseded content is
/// kept in `history` in the order it was replaced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub tag: ArtifactTag,
    pub content: String,
    pub version: u32,
    pub history: Vec<ArtifactRevision>,
}

impl Artifact {
    pub const INITIAL_VERSION: u32 = 1;

    pub fn initial(tag: ArtifactTag, content: impl Into<String>) -> Self {
        Self { tag, content: content.into(), version: Self::INITIAL_VERSION, history: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// Returns the next version of this artifact without touching `self`.
    pub fn revised(&self, content: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.history.push(ArtifactRevision { version: self.version, content: self.content.clone() });
        next.content = content.into();
        next.version = self.version + 1;
        next
    }

    /// Restores the most recently superseded content as a new version.
    pub fn rolled_back(&self) -> Result<Self, DomainError> {
        let previous = self
            .history
            .last()
            .ok_or(DomainError::NothingToRollback { tag: self.tag, version: self.version })?;
        Ok(self.revised(previous.content.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::{Artifact, ArtifactRevision};
    use crate::domain::role::ArtifactTag;
    use crate::errors::DomainError;

    #[test]
    fn revision_bumps_version_and_keeps_history() {
        let original = Artifact::initial(ArtifactTag::Frontend, "v1 screens");
        let revised = original.revised("v2 screens");

        assert_eq!(original.version, 1);
        assert_eq!(revised.version, 2);
        assert_eq!(revised.content, "v2 screens");
        assert_eq!(
            revised.history,
            vec![ArtifactRevision { version: 1, content: "v1 screens".to_string() }]
        );
    }

    #[test]
    fn rollback_restores_previous_content_as_new_version() {
        let artifact = Artifact::initial(ArtifactTag::Backend, "rest api").revised("graphql api");
        let rolled_back = artifact.rolled_back().expect("history available");

        assert_eq!(rolled_back.content, "rest api");
        assert_eq!(rolled_back.version, 3);
        assert_eq!(rolled_back.history.len(), 2);
    }

    #[test]
    fn rollback_without_history_is_rejected() {
        let artifact = Artifact::initial(ArtifactTag::Backend, "rest api");
        assert_eq!(
            artifact.rolled_back(),
            Err(DomainError::NothingToRollback { tag: ArtifactTag::Backend, version: 1 })
        );
    }
}
