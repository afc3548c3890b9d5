use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use srdgen_core::config::LlmConfig;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("model returned an unusable response: {0}")]
    InvalidResponse(String),
}

/// One stateless completion: the active role's system prompt plus the
/// conversation so far in, one reply out.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, context: &str) -> Result<String, ModelError>;
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint (OpenAI, Ollama).
pub struct OpenAiChatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiChatClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ModelError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ModelError::Unavailable(format!("http client setup: {error}")))?;
        let endpoint =
            format!("{}/chat/completions", config.resolved_base_url().trim_end_matches('/'));

        Ok(Self {
            http,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ModelClient for OpenAiChatClient {
    async fn complete(&self, system_prompt: &str, context: &str) -> Result<String, ModelError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: context },
            ],
            temperature: self.temperature,
            stream: false,
        };

        debug!(
            event_name = "llm.request.sent",
            model = %self.model,
            context_chars = context.len(),
            "sending chat completion request"
        );

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                ModelError::Timeout(self.timeout)
            } else {
                ModelError::Unavailable(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModelError::Unavailable(format!("endpoint returned {status}")));
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|error| ModelError::InvalidResponse(error.to_string()))?;
        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ModelError::InvalidResponse("missing choices[0].message.content".to_string())
            })?;

        debug!(
            event_name = "llm.response.received",
            reply_chars = content.len(),
            "chat completion received"
        );
        Ok(content)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub context: String,
}

/// Deterministic client that replays canned outcomes in order.
///
/// Used for offline runs and tests. Once the script is exhausted every call
/// fails with [`ModelError::Unavailable`].
#[derive(Default)]
pub struct ScriptedModelClient {
    script: Mutex<VecDeque<Result<String, ModelError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModelClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_outcomes(replies.into_iter().map(|reply| Ok(reply.into())))
    }

    pub fn from_outcomes(outcomes: impl IntoIterator<Item = Result<String, ModelError>>) -> Self {
        Self { script: Mutex::new(outcomes.into_iter().collect()), calls: Mutex::new(Vec::new()) }
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.script.lock().await.len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn complete(&self, system_prompt: &str, context: &str) -> Result<String, ModelError> {
        self.calls.lock().await.push(RecordedCall {
            system_prompt: system_prompt.to_string(),
            context: context.to_string(),
        });

        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Unavailable("scripted replies exhausted".to_string())))
    }
}
