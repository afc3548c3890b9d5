use serde::{Deserialize, Serialize};

use crate::domain::transcript::Transcript;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRule {
    pub terminal_role: String,
    pub marker: String,
}

/// How a run ended. `CapReached` is the degraded case: the conversation was
/// cut off before the terminal role declared completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Completion {
    MarkerReached { sequence: u64 },
    CapReached { messages: usize },
}

impl Completion {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::CapReached { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationPolicy {
    max_messages: usize,
    completion: Option<CompletionRule>,
}

impl TerminationPolicy {
    pub fn new(max_messages: usize) -> Result<Self, DomainError> {
        if max_messages == 0 {
            return Err(DomainError::InvalidMessageCap(max_messages));
        }
        Ok(Self { max_messages, completion: None })
    }

    pub fn with_completion(
        mut self,
        terminal_role: impl Into<String>,
        marker: impl Into<String>,
    ) -> Self {
        self.completion =
            Some(CompletionRule { terminal_role: terminal_role.into(), marker: marker.into() });
        self
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn completion_rule(&self) -> Option<&CompletionRule> {
        self.completion.as_ref()
    }

    /// Inspects the transcript after an append. The marker is checked only on
    /// the latest message and only when the terminal role sent it; a marker
    /// hit on the final permitted message counts as a clean completion.
    pub fn evaluate(&self, transcript: &Transcript) -> Option<Completion> {
        let last = transcript.last()?;

        if let Some(rule) = &self.completion {
            if last.speaker == rule.terminal_role && last.content.contains(&rule.marker) {
                return Some(Completion::MarkerReached { sequence: last.sequence });
            }
        }

        if transcript.len() >= self.max_messages {
            return Some(Completion::CapReached { messages: transcript.len() });
        }

        None
    }

    pub fn should_stop(&self, transcript: &Transcript) -> bool {
        self.evaluate(transcript).is_some()
    }
}
