use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::role::{ArtifactTag, RoleRoster};
use crate::domain::transcript::Transcript;

pub const DEFAULT_MIN_CONTRIBUTION_CHARS: usize = 8;

/// A producing-role message dropped because it was too short to be useful.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedContribution {
    pub speaker: String,
    pub sequence: u64,
    pub chars: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    /// Missing key: no producing role spoke. Empty string: producers spoke but
    /// nothing usable survived.
    pub documents: BTreeMap<ArtifactTag, String>,
    pub skipped: Vec<SkippedContribution>,
}

impl Extraction {
    pub fn document(&self, tag: ArtifactTag) -> Option<&str> {
        self.documents.get(&tag).map(String::as_str)
    }

    pub fn absent_tags(&self, roster: &RoleRoster) -> BTreeSet<ArtifactTag> {
        roster.tags().into_iter().filter(|tag| !self.documents.contains_key(tag)).collect()
    }
}

/// Splits a finished transcript into one document per artifact tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArtifactExtractor {
    min_contribution_chars: usize,
}

impl Default for ArtifactExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONTRIBUTION_CHARS)
    }
}

impl ArtifactExtractor {
    pub fn new(min_contribution_chars: usize) -> Self {
        Self { min_contribution_chars }
    }

    pub fn extract(&self, transcript: &Transcript, roster: &RoleRoster) -> Extraction {
        self.extract_tags(transcript, roster, &roster.tags())
    }

    /// Same as [`extract`](Self::extract) restricted to a single tag.
    pub fn extract_tag(
        &self,
        transcript: &Transcript,
        roster: &RoleRoster,
        tag: ArtifactTag,
    ) -> Extraction {
        let wanted: BTreeSet<ArtifactTag> =
            roster.tags().into_iter().filter(|candidate| *candidate == tag).collect();
        self.extract_tags(transcript, roster, &wanted)
    }

    fn extract_tags(
        &self,
        transcript: &Transcript,
        roster: &RoleRoster,
        wanted: &BTreeSet<ArtifactTag>,
    ) -> Extraction {
        let roles = roster.by_name();
        let mut sections: BTreeMap<ArtifactTag, Vec<String>> = BTreeMap::new();
        let mut headed: BTreeMap<ArtifactTag, BTreeSet<&str>> = BTreeMap::new();
        let mut skipped = Vec::new();

        for message in transcript.messages() {
            let Some(role) = roles.get(message.speaker.as_str()) else {
                continue;
            };
            let tags: Vec<ArtifactTag> =
                role.produces.iter().copied().filter(|tag| wanted.contains(tag)).collect();
            if tags.is_empty() {
                continue;
            }

            let content = message.content.trim();
            let usable = content.chars().count() >= self.min_contribution_chars;
            if !usable {
                skipped.push(SkippedContribution {
                    speaker: message.speaker.clone(),
                    sequence: message.sequence,
                    chars: content.chars().count(),
                });
            }

            for tag in tags {
                let pieces = sections.entry(tag).or_default();
                if !usable {
                    continue;
                }
                if headed.entry(tag).or_default().insert(role.name.as_str()) {
                    pieces.push(format!("## {}", role.name));
                }
                pieces.push(content.to_string());
            }
        }

        let documents =
            sections.into_iter().map(|(tag, pieces)| (tag, pieces.join("\n\n"))).collect();
        Extraction { documents, skipped }
    }
}
