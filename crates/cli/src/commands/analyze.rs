use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use srdgen_agent::AnalysisReport;
use tracing::info;

use crate::commands::{
    async_runtime, build_runtime, correlation_id, export, interrupt_token, load_config,
    CommandResult, RunOptions, EXIT_EXPORT, EXIT_INPUT,
};

const COMMAND: &str = "analyze";

/// Characters of the ingested document echoed back to the caller.
pub const PREVIEW_CHARS: usize = 500;

pub fn run(input: &Path, options: &RunOptions) -> CommandResult {
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let document = match fs::read_to_string(input) {
        Ok(document) => document,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "input_read",
                format!("could not read `{}` as UTF-8 text: {error}", input.display()),
                EXIT_INPUT,
            );
        }
    };

    let runtime = match build_runtime(&config, options.script.as_deref()) {
        Ok(runtime) => runtime,
        Err((class, message, code)) => return CommandResult::failure(COMMAND, class, message, code),
    };
    let executor = match async_runtime() {
        Ok(executor) => executor,
        Err((class, message, code)) => return CommandResult::failure(COMMAND, class, message, code),
    };

    let correlation_id = correlation_id(COMMAND);
    let outcome = executor.block_on(async {
        let cancel = interrupt_token();
        runtime.analyze(&document, &correlation_id, &cancel).await
    });

    let report = match outcome {
        Ok(report) => report,
        Err(error) => {
            if let Some(partial) = runtime.partial_extraction(&error) {
                let produced: Vec<&str> = partial.documents.keys().map(|tag| tag.as_str()).collect();
                info!(
                    event_name = "orchestration.analysis.partial",
                    produced = ?produced,
                    correlation_id = %correlation_id,
                    "analysis stopped early; partial documents were not saved"
                );
            }
            return CommandResult::orchestration_failure(COMMAND, &error, &correlation_id);
        }
    };

    let output_dir = &config.storage.output_dir;
    let written = match export::with_exclusive(output_dir, || {
        export::write_session(output_dir, &report.session)
    }) {
        Ok(written) => written,
        Err(error) => {
            return CommandResult::failure(COMMAND, "export", format!("{error:#}"), EXIT_EXPORT);
        }
    };

    CommandResult::success_with(COMMAND, summary_line(&report), Some(details(&report, &document, &written)))
}

pub fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn summary_line(report: &AnalysisReport) -> String {
    let mut line = format!(
        "session {} analyzed in {} message(s)",
        report.session.id, report.messages
    );
    if report.is_degraded() {
        line.push_str("; message cap reached before the coordinator signalled completion");
    }
    if !report.absent().is_empty() {
        let absent: Vec<&str> = report.absent().iter().map(|tag| tag.as_str()).collect();
        line.push_str(&format!("; no content produced for {}", absent.join(", ")));
    }
    line
}

fn details(report: &AnalysisReport, document: &str, written: &[PathBuf]) -> serde_json::Value {
    let artifacts: serde_json::Map<String, serde_json::Value> = report
        .session
        .artifacts
        .iter()
        .map(|(tag, artifact)| {
            (
                tag.as_str().to_string(),
                json!({ "version": artifact.version, "chars": artifact.content.chars().count() }),
            )
        })
        .collect();

    json!({
        "session_id": report.session.id,
        "completion": report.completion,
        "degraded": report.is_degraded(),
        "messages": report.messages,
        "artifacts": artifacts,
        "absent": report.absent(),
        "skipped": report.skipped,
        "summary": report.summary,
        "preview": preview(document),
        "files": written.iter().map(|path| path.display().to_string()).collect::<Vec<_>>(),
    })
}
