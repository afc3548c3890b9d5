use serde::{Deserialize, Serialize};

/// One reply appended to a transcript. Never mutated after append.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMessage {
    pub speaker: String,
    pub content: String,
    pub sequence: u64,
}

/// Append-only record of one coordinator run.
///
/// Sequence numbers start at 0 and increase by one per append; there is no
/// API to reorder, remove or edit a message once it has been pushed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<TurnMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, speaker: impl Into<String>, content: impl Into<String>) -> &TurnMessage {
        let sequence = self.messages.len() as u64;
        self.messages.push(TurnMessage { speaker: speaker.into(), content: content.into(), sequence });
        &self.messages[self.messages.len() - 1]
    }

    pub fn messages(&self) -> &[TurnMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&TurnMessage> {
        self.messages.last()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last().map(|message| message.sequence)
    }

    /// Prompt context handed to the model: the seed followed by every turn so far.
    pub fn prompt_context(&self, seed_context: &str) -> String {
        if self.messages.is_empty() {
            return seed_context.to_string();
        }

        let mut context = String::with_capacity(
            seed_context.len()
                + self.messages.iter().map(|message| message.content.len() + 32).sum::<usize>(),
        );
        context.push_str(seed_context);
        context.push_str("\n\n--- CONVERSATION SO FAR ---");
        for message in &self.messages {
            context.push_str("\n\n[");
            context.push_str(&message.speaker);
            context.push_str("]\n");
            context.push_str(&message.content);
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::Transcript;

    #[test]
    fn sequences_increase_from_zero() {
        let mut transcript = Transcript::new();
        transcript.append("Analyst", "first");
        transcript.append("Frontend", "second");
        transcript.append("Analyst", "third");

        let sequences: Vec<u64> =
            transcript.messages().iter().map(|message| message.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(transcript.last_sequence(), Some(2));
    }

    #[test]
    fn prompt_context_is_seed_alone_before_first_turn() {
        let transcript = Transcript::new();
        assert_eq!(transcript.prompt_context("Build a todo app"), "Build a todo app");
    }

    #[test]
    fn prompt_context_appends_turns_in_order() {
        let mut transcript = Transcript::new();
        transcript.append("Analyst", "categorized");
        transcript.append("Frontend", "screens");

        let context = transcript.prompt_context("SEED");
        assert!(context.starts_with("SEED\n\n--- CONVERSATION SO FAR ---"));
        let analyst = context.find("[Analyst]\ncategorized").expect("analyst turn rendered");
        let frontend = context.find("[Frontend]\nscreens").expect("frontend turn rendered");
        assert!(analyst < frontend);
    }
}
