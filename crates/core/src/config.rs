use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::role::{ArtifactTag, FEEDBACK_COORDINATOR};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub orchestration: OrchestrationConfig,
    pub roles: Vec<RoleConfig>,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl LlmConfig {
    pub fn resolved_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestrationConfig {
    pub analysis_max_messages: usize,
    pub regeneration_max_messages: usize,
    pub analysis_completion_marker: String,
    pub regeneration_completion_marker: String,
    pub min_input_chars: usize,
    pub min_feedback_chars: usize,
    pub min_contribution_chars: usize,
}

/// Typed override for one analysis participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub produces: Vec<ArtifactTag>,
    #[serde(default)]
    pub terminal: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageConfig {
    pub output_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub analysis_max_messages: Option<usize>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some(LlmProvider::Ollama.default_base_url().to_string()),
                model: "llama3.1".to_string(),
                temperature: 0.1,
                timeout_secs: 60,
                max_retries: 2,
                retry_base_delay_ms: 500,
                retry_max_delay_ms: 8_000,
            },
            orchestration: OrchestrationConfig {
                analysis_max_messages: 8,
                regeneration_max_messages: 4,
                analysis_completion_marker: "ANALYSIS COMPLETE".to_string(),
                regeneration_completion_marker: "REVISION COMPLETE".to_string(),
                min_input_chars: 10,
                min_feedback_chars: 3,
                min_contribution_chars: 8,
            },
            roles: Vec::new(),
            storage: StorageConfig { output_dir: PathBuf::from("output") },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("srdgen.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
                if llm.base_url.is_none() {
                    self.llm.base_url = None;
                }
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(retry_base_delay_ms) = llm.retry_base_delay_ms {
                self.llm.retry_base_delay_ms = retry_base_delay_ms;
            }
            if let Some(retry_max_delay_ms) = llm.retry_max_delay_ms {
                self.llm.retry_max_delay_ms = retry_max_delay_ms;
            }
        }

        if let Some(orchestration) = patch.orchestration {
            if let Some(value) = orchestration.analysis_max_messages {
                self.orchestration.analysis_max_messages = value;
            }
            if let Some(value) = orchestration.regeneration_max_messages {
                self.orchestration.regeneration_max_messages = value;
            }
            if let Some(value) = orchestration.analysis_completion_marker {
                self.orchestration.analysis_completion_marker = value;
            }
            if let Some(value) = orchestration.regeneration_completion_marker {
                self.orchestration.regeneration_completion_marker = value;
            }
            if let Some(value) = orchestration.min_input_chars {
                self.orchestration.min_input_chars = value;
            }
            if let Some(value) = orchestration.min_feedback_chars {
                self.orchestration.min_feedback_chars = value;
            }
            if let Some(value) = orchestration.min_contribution_chars {
                self.orchestration.min_contribution_chars = value;
            }
        }

        if let Some(roles) = patch.roles {
            self.roles = roles;
        }

        if let Some(storage) = patch.storage {
            if let Some(output_dir) = storage.output_dir {
                self.storage.output_dir = output_dir;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SRDGEN_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
            if read_env("SRDGEN_LLM_BASE_URL").is_none() {
                self.llm.base_url = None;
            }
        }
        let api_key = read_env("SRDGEN_LLM_API_KEY").or_else(|| read_env("OPENAI_API_KEY"));
        if let Some(value) = api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SRDGEN_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        let model = read_env("SRDGEN_LLM_MODEL").or_else(|| read_env("OPENAI_MODEL"));
        if let Some(value) = model {
            self.llm.model = value;
        }
        if let Some(value) = read_env("SRDGEN_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("SRDGEN_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("SRDGEN_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("SRDGEN_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SRDGEN_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("SRDGEN_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("SRDGEN_ORCHESTRATION_ANALYSIS_MAX_MESSAGES") {
            self.orchestration.analysis_max_messages =
                parse_usize("SRDGEN_ORCHESTRATION_ANALYSIS_MAX_MESSAGES", &value)?;
        }
        if let Some(value) = read_env("SRDGEN_ORCHESTRATION_REGENERATION_MAX_MESSAGES") {
            self.orchestration.regeneration_max_messages =
                parse_usize("SRDGEN_ORCHESTRATION_REGENERATION_MAX_MESSAGES", &value)?;
        }
        if let Some(value) = read_env("SRDGEN_ORCHESTRATION_MIN_INPUT_CHARS") {
            self.orchestration.min_input_chars =
                parse_usize("SRDGEN_ORCHESTRATION_MIN_INPUT_CHARS", &value)?;
        }
        if let Some(value) = read_env("SRDGEN_ORCHESTRATION_MIN_FEEDBACK_CHARS") {
            self.orchestration.min_feedback_chars =
                parse_usize("SRDGEN_ORCHESTRATION_MIN_FEEDBACK_CHARS", &value)?;
        }

        if let Some(value) = read_env("SRDGEN_STORAGE_OUTPUT_DIR") {
            self.storage.output_dir = PathBuf::from(value);
        }

        let log_level = read_env("SRDGEN_LOGGING_LEVEL").or_else(|| read_env("SRDGEN_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SRDGEN_LOGGING_FORMAT").or_else(|| read_env("SRDGEN_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
            if overrides.llm_base_url.is_none() {
                self.llm.base_url = None;
            }
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(analysis_max_messages) = overrides.analysis_max_messages {
            self.orchestration.analysis_max_messages = analysis_max_messages;
        }
        if let Some(output_dir) = overrides.output_dir {
            self.storage.output_dir = output_dir;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_orchestration(&self.orchestration)?;
        validate_roles(&self.roles)?;
        validate_storage(&self.storage)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("srdgen.toml"), PathBuf::from("config/srdgen.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.max_retries > 10 {
        return Err(ConfigError::Validation("llm.max_retries must be at most 10".to_string()));
    }

    if llm.retry_base_delay_ms == 0 || llm.retry_max_delay_ms < llm.retry_base_delay_ms {
        return Err(ConfigError::Validation(
            "llm.retry_base_delay_ms must be positive and not exceed llm.retry_max_delay_ms"
                .to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    let base_url = llm.resolved_base_url();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if llm.provider == LlmProvider::OpenAi {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for the openai provider (set SRDGEN_LLM_API_KEY or OPENAI_API_KEY)"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_orchestration(orchestration: &OrchestrationConfig) -> Result<(), ConfigError> {
    if orchestration.analysis_max_messages == 0 || orchestration.regeneration_max_messages == 0 {
        return Err(ConfigError::Validation(
            "orchestration message caps must be greater than zero".to_string(),
        ));
    }

    if orchestration.regeneration_max_messages >= orchestration.analysis_max_messages {
        return Err(ConfigError::Validation(
            "orchestration.regeneration_max_messages must be smaller than orchestration.analysis_max_messages"
                .to_string(),
        ));
    }

    if orchestration.analysis_completion_marker.trim().is_empty()
        || orchestration.regeneration_completion_marker.trim().is_empty()
    {
        return Err(ConfigError::Validation(
            "orchestration completion markers must not be empty".to_string(),
        ));
    }

    if orchestration.min_input_chars == 0 {
        return Err(ConfigError::Validation(
            "orchestration.min_input_chars must be greater than zero".to_string(),
        ));
    }

    if orchestration.min_feedback_chars == 0 {
        return Err(ConfigError::Validation(
            "orchestration.min_feedback_chars must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_roles(roles: &[RoleConfig]) -> Result<(), ConfigError> {
    if roles.is_empty() {
        return Ok(());
    }

    let mut names = BTreeSet::new();
    for role in roles {
        if role.name.trim().is_empty() {
            return Err(ConfigError::Validation("roles[].name must not be empty".to_string()));
        }
        if role.name.trim() == FEEDBACK_COORDINATOR {
            return Err(ConfigError::Validation(format!(
                "roles[].name `{FEEDBACK_COORDINATOR}` is reserved for the feedback coordinator"
            )));
        }
        if !names.insert(role.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "roles[].name `{}` is declared more than once",
                role.name
            )));
        }
        if role.system_prompt.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "roles[`{}`].system_prompt must not be empty",
                role.name
            )));
        }
    }

    if roles.iter().filter(|role| role.terminal).count() > 1 {
        return Err(ConfigError::Validation(
            "at most one role may be marked terminal".to_string(),
        ));
    }

    for tag in ArtifactTag::ALL {
        if !roles.iter().any(|role| role.produces.contains(&tag)) {
            return Err(ConfigError::Validation(format!(
                "no configured role produces the `{tag}` artifact"
            )));
        }
    }

    Ok(())
}

fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    if storage.output_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("storage.output_dir must not be empty".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    orchestration: Option<OrchestrationPatch>,
    roles: Option<Vec<RoleConfig>>,
    storage: Option<StoragePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OrchestrationPatch {
    analysis_max_messages: Option<usize>,
    regeneration_max_messages: Option<usize>,
    analysis_completion_marker: Option<String>,
    regeneration_completion_marker: Option<String>,
    min_input_chars: Option<usize>,
    min_feedback_chars: Option<usize>,
    min_contribution_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
