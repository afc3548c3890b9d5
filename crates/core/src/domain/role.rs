use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Name of the role that speaks for the human during a regeneration. Analysis
/// rosters may not use it.
pub const FEEDBACK_COORDINATOR: &str = "UserProxy";

/// Identifies which downstream document a role's output belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactTag {
    Frontend,
    Backend,
}

impl ArtifactTag {
    pub const ALL: [ArtifactTag; 2] = [ArtifactTag::Frontend, ArtifactTag::Backend];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frontend => "frontend",
            Self::Backend => "backend",
        }
    }
}

impl fmt::Display for ArtifactTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactTag {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "frontend" | "frontend_srd" => Ok(Self::Frontend),
            "backend" | "backend_srd" => Ok(Self::Backend),
            other => Err(DomainError::UnknownArtifactTag(other.to_string())),
        }
    }
}

/// Immutable descriptor for one conversation participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRole {
    pub name: String,
    pub system_prompt: String,
    pub produces: BTreeSet<ArtifactTag>,
}

impl AgentRole {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        produces: impl IntoIterator<Item = ArtifactTag>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            produces: produces.into_iter().collect(),
        }
    }

    pub fn produces(&self, tag: ArtifactTag) -> bool {
        self.produces.contains(&tag)
    }

    pub fn is_contributor(&self) -> bool {
        !self.produces.is_empty()
    }
}

/// Ordered, validated set of roles taking part in one conversation run.
///
/// Order is the speaking order. Names are unique so that a transcript speaker
/// resolves to exactly one role during extraction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleRoster {
    roles: Vec<AgentRole>,
}

impl RoleRoster {
    pub fn new(roles: Vec<AgentRole>) -> Result<Self, DomainError> {
        if roles.is_empty() {
            return Err(DomainError::EmptyRoleSet);
        }

        let mut seen = BTreeSet::new();
        for role in &roles {
            if role.name.trim().is_empty() {
                return Err(DomainError::InvariantViolation(
                    "role names must not be blank".to_string(),
                ));
            }
            if !seen.insert(role.name.as_str()) {
                return Err(DomainError::DuplicateRoleName(role.name.clone()));
            }
        }

        Ok(Self { roles })
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn roles(&self) -> &[AgentRole] {
        &self.roles
    }

    /// Role whose turn it is for the message at `index` (round-robin).
    pub fn speaker_at(&self, index: usize) -> &AgentRole {
        &self.roles[index % self.roles.len()]
    }

    pub fn get(&self, name: &str) -> Option<&AgentRole> {
        self.roles.iter().find(|role| role.name == name)
    }

    pub fn tags(&self) -> BTreeSet<ArtifactTag> {
        self.roles.iter().flat_map(|role| role.produces.iter().copied()).collect()
    }

    pub fn producers_of(&self, tag: ArtifactTag) -> Vec<&AgentRole> {
        self.roles.iter().filter(|role| role.produces(tag)).collect()
    }

    pub(crate) fn by_name(&self) -> BTreeMap<&str, &AgentRole> {
        self.roles.iter().map(|role| (role.name.as_str(), role)).collect()
    }
}
