use std::sync::Arc;
use std::time::Duration;

use srdgen_core::config::LlmConfig;
use srdgen_core::{AgentRole, Completion, OrchestrationError, RoleRoster, TerminationPolicy, Transcript};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::llm::{ModelClient, ModelError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 500, max_delay_ms: 8_000 }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    pub transcript: Transcript,
    pub completion: Completion,
}

impl RunOutcome {
    pub fn is_degraded(&self) -> bool {
        self.completion.is_degraded()
    }
}

/// Drives one round-robin conversation over a roster until the termination
/// policy fires. Holds no per-run state, so one instance serves concurrent
/// runs for independent sessions.
#[derive(Clone)]
pub struct ConversationCoordinator {
    client: Arc<dyn ModelClient>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ConversationCoordinator {
    pub fn new(client: Arc<dyn ModelClient>, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self { client, retry, call_timeout }
    }

    pub async fn run(
        &self,
        roster: &RoleRoster,
        seed_context: &str,
        policy: &TerminationPolicy,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, OrchestrationError> {
        if seed_context.trim().is_empty() {
            return Err(OrchestrationError::EmptyInput { field: "seed_context", min_chars: 1 });
        }

        let mut transcript = Transcript::new();
        let mut cursor = 0_usize;

        loop {
            if cancel.is_cancelled() {
                info!(
                    event_name = "orchestration.run.cancelled",
                    messages = transcript.len(),
                    "conversation cancelled between turns"
                );
                return Err(OrchestrationError::Cancelled {
                    session_id: None,
                    tag: None,
                    last_sequence: transcript.last_sequence(),
                });
            }

            let role = roster.speaker_at(cursor);
            let context = transcript.prompt_context(seed_context);
            let reply = self.complete_turn(role, &context, &transcript, cancel).await?;
            let message = transcript.append(role.name.clone(), reply);

            info!(
                event_name = "orchestration.turn.completed",
                role = %message.speaker,
                sequence = message.sequence,
                reply_chars = message.content.len(),
                "conversation turn completed"
            );

            if let Some(completion) = policy.evaluate(&transcript) {
                match &completion {
                    Completion::MarkerReached { sequence } => info!(
                        event_name = "orchestration.run.completed",
                        sequence,
                        messages = transcript.len(),
                        "terminal role signalled completion"
                    ),
                    Completion::CapReached { messages } => warn!(
                        event_name = "orchestration.run.degraded",
                        messages,
                        "message cap reached before completion marker"
                    ),
                }
                return Ok(RunOutcome { transcript, completion });
            }

            cursor += 1;
        }
    }

    async fn complete_turn(
        &self,
        role: &AgentRole,
        context: &str,
        transcript: &Transcript,
        cancel: &CancellationToken,
    ) -> Result<String, OrchestrationError> {
        let sequence = transcript.len() as u64;
        let mut last_error = ModelError::Unavailable("no attempt made".to_string());

        for attempt in 0..=self.retry.max_retries {
            let result = match tokio::time::timeout(
                self.call_timeout,
                self.client.complete(&role.system_prompt, context),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ModelError::Timeout(self.call_timeout)),
            };

            match result {
                Ok(reply) => return Ok(reply),
                Err(error) => {
                    warn!(
                        event_name = "orchestration.turn.retry",
                        role = %role.name,
                        sequence,
                        attempt,
                        max_retries = self.retry.max_retries,
                        error = %error,
                        "model call failed"
                    );
                    last_error = error;
                }
            }

            if attempt < self.retry.max_retries {
                let delay = self.retry.backoff(attempt);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(OrchestrationError::Cancelled {
                            session_id: None,
                            tag: None,
                            last_sequence: transcript.last_sequence(),
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(OrchestrationError::ModelUnavailable {
            session_id: None,
            tag: None,
            role: role.name.clone(),
            sequence,
            attempts: self.retry.max_retries + 1,
            reason: last_error.to_string(),
            partial: Box::new(transcript.clone()),
        })
    }
}
