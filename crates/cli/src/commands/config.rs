use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use srdgen_core::config::AppConfig;
use toml::Value;

use crate::commands::RunOptions;

pub fn run(options: &RunOptions) -> String {
    let config = match AppConfig::load(options.load_options()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines =
        vec!["effective config (source precedence: override > env > file > default):".to_string()];

    lines.push(render_line(
        "llm.provider",
        config.llm.provider.as_str(),
        source("llm.provider", &["SRDGEN_LLM_PROVIDER"]),
    ));
    lines.push(render_line(
        "llm.model",
        &config.llm.model,
        source("llm.model", &["SRDGEN_LLM_MODEL", "OPENAI_MODEL"]),
    ));
    lines.push(render_line(
        "llm.base_url",
        config.llm.resolved_base_url(),
        source("llm.base_url", &["SRDGEN_LLM_BASE_URL"]),
    ));
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(render_line(
        "llm.api_key",
        llm_api_key,
        source("llm.api_key", &["SRDGEN_LLM_API_KEY", "OPENAI_API_KEY"]),
    ));
    lines.push(render_line(
        "llm.temperature",
        &config.llm.temperature.to_string(),
        source("llm.temperature", &["SRDGEN_LLM_TEMPERATURE"]),
    ));
    lines.push(render_line(
        "llm.timeout_secs",
        &config.llm.timeout_secs.to_string(),
        source("llm.timeout_secs", &["SRDGEN_LLM_TIMEOUT_SECS"]),
    ));
    lines.push(render_line(
        "llm.max_retries",
        &config.llm.max_retries.to_string(),
        source("llm.max_retries", &["SRDGEN_LLM_MAX_RETRIES"]),
    ));

    lines.push(render_line(
        "orchestration.analysis_max_messages",
        &config.orchestration.analysis_max_messages.to_string(),
        source(
            "orchestration.analysis_max_messages",
            &["SRDGEN_ORCHESTRATION_ANALYSIS_MAX_MESSAGES"],
        ),
    ));
    lines.push(render_line(
        "orchestration.regeneration_max_messages",
        &config.orchestration.regeneration_max_messages.to_string(),
        source(
            "orchestration.regeneration_max_messages",
            &["SRDGEN_ORCHESTRATION_REGENERATION_MAX_MESSAGES"],
        ),
    ));
    lines.push(render_line(
        "orchestration.analysis_completion_marker",
        &config.orchestration.analysis_completion_marker,
        source("orchestration.analysis_completion_marker", &[]),
    ));
    lines.push(render_line(
        "orchestration.regeneration_completion_marker",
        &config.orchestration.regeneration_completion_marker,
        source("orchestration.regeneration_completion_marker", &[]),
    ));
    lines.push(render_line(
        "orchestration.min_input_chars",
        &config.orchestration.min_input_chars.to_string(),
        source("orchestration.min_input_chars", &["SRDGEN_ORCHESTRATION_MIN_INPUT_CHARS"]),
    ));
    lines.push(render_line(
        "orchestration.min_feedback_chars",
        &config.orchestration.min_feedback_chars.to_string(),
        source("orchestration.min_feedback_chars", &["SRDGEN_ORCHESTRATION_MIN_FEEDBACK_CHARS"]),
    ));

    let roles = if config.roles.is_empty() {
        "<built-in>".to_string()
    } else {
        config.roles.iter().map(|role| role.name.as_str()).collect::<Vec<_>>().join(", ")
    };
    lines.push(render_line("roles", &roles, source("roles", &[])));

    lines.push(render_line(
        "storage.output_dir",
        &config.storage.output_dir.display().to_string(),
        override_or(
            options.output_dir.is_some(),
            source("storage.output_dir", &["SRDGEN_STORAGE_OUTPUT_DIR"]),
        ),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", &["SRDGEN_LOGGING_LEVEL", "SRDGEN_LOG_LEVEL"]),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", &["SRDGEN_LOGGING_FORMAT", "SRDGEN_LOG_FORMAT"]),
    ));

    lines.join("\n")
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from("srdgen.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/srdgen.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn override_or(overridden: bool, source: String) -> String {
    if overridden {
        "override (--output-dir)".to_string()
    } else {
        source
    }
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
