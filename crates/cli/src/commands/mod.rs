pub mod analyze;
pub mod config;
pub mod export;
pub mod regenerate;
pub mod rollback;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use srdgen_agent::{AgentRuntime, InMemorySessionStore, ScriptedModelClient};
use srdgen_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use srdgen_core::{InMemoryAuditSink, OrchestrationError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, None)
    }

    pub fn success_with(command: &str, message: impl Into<String>, details: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            details,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            details: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Failure payload for a run that stopped inside orchestration.
    pub fn orchestration_failure(
        command: &str,
        error: &OrchestrationError,
        correlation_id: &str,
    ) -> Self {
        let interface = error.clone().into_interface(correlation_id);
        Self::failure(
            command,
            error.error_class(),
            format!("{} ({error})", interface.user_message()),
            EXIT_ORCHESTRATION,
        )
    }
}

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_RUNTIME_INIT: u8 = 3;
pub const EXIT_INPUT: u8 = 4;
pub const EXIT_ORCHESTRATION: u8 = 5;
pub const EXIT_EXPORT: u8 = 6;

/// Options shared by every command that talks to the model.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    /// JSON array of canned replies replayed instead of calling a model.
    pub script: Option<PathBuf>,
}

impl RunOptions {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config_path.clone(),
            require_file: self.config_path.is_some(),
            overrides: ConfigOverrides { output_dir: self.output_dir.clone(), ..ConfigOverrides::default() },
        }
    }
}

type Failure = (&'static str, String, u8);

pub(crate) fn load_config(command: &str, options: &RunOptions) -> Result<AppConfig, CommandResult> {
    AppConfig::load(options.load_options()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            EXIT_CONFIG,
        )
    })
}

pub(crate) fn build_runtime(config: &AppConfig, script: Option<&Path>) -> Result<AgentRuntime, Failure> {
    let Some(script) = script else {
        return AgentRuntime::from_config(config)
            .map_err(|error| ("runtime_init", format!("{error:#}"), EXIT_RUNTIME_INIT));
    };

    let raw = fs::read_to_string(script).map_err(|error| {
        ("script_read", format!("could not read script `{}`: {error}", script.display()), EXIT_INPUT)
    })?;
    let replies: Vec<String> = serde_json::from_str(&raw).map_err(|error| {
        (
            "script_parse",
            format!("script `{}` must be a JSON array of strings: {error}", script.display()),
            EXIT_INPUT,
        )
    })?;

    AgentRuntime::new(
        Arc::new(ScriptedModelClient::new(replies)),
        Arc::new(InMemorySessionStore::default()),
        Arc::new(InMemoryAuditSink::default()),
        config,
    )
    .map_err(|error| ("runtime_init", error.to_string(), EXIT_RUNTIME_INIT))
}

pub(crate) fn async_runtime() -> Result<tokio::runtime::Runtime, Failure> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        ("runtime_init", format!("failed to initialize async runtime: {error}"), EXIT_RUNTIME_INIT)
    })
}

/// Token cancelled on Ctrl-C for the lifetime of the current runtime.
pub(crate) fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(event_name = "system.cli.interrupted", "interrupt received, cancelling run");
            trigger.cancel();
        }
    });
    cancel
}

pub(crate) fn correlation_id(command: &str) -> String {
    format!("cli-{command}-{}", std::process::id())
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
