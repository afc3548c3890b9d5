pub mod commands;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use srdgen_core::config::{AppConfig, LogFormat};
use srdgen_core::ArtifactTag;

use crate::commands::regenerate::RegenerateArgs;
use crate::commands::{CommandResult, RunOptions, EXIT_INPUT};

#[derive(Debug, Parser)]
#[command(
    name = "srdgen",
    about = "Requirements analysis CLI",
    long_about = "Turn a plain-text requirements document into frontend and backend requirement documents, then refine either one from feedback.",
    after_help = "Examples:\n  srdgen analyze requirements.txt\n  srdgen regenerate --tag frontend --feedback \"Add a dark mode toggle\"\n  srdgen rollback --tag frontend\n  srdgen config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file to load (defaults to srdgen.toml or config/srdgen.toml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Directory holding session.json and the generated documents")]
    output_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ScriptArg {
    #[arg(long, help = "Replay a JSON array of canned model replies instead of calling the model")]
    script: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Analyze a plain-text document and write both requirement documents")]
    Analyze {
        #[arg(help = "Path to a UTF-8 text file")]
        input: PathBuf,
        #[command(flatten)]
        script: ScriptArg,
    },
    #[command(about = "Revise one document of the stored session from feedback")]
    Regenerate {
        #[arg(long, help = "Document to revise: frontend or backend")]
        tag: ArtifactTag,
        #[arg(long, conflicts_with = "feedback_file", required_unless_present = "feedback_file")]
        feedback: Option<String>,
        #[arg(long, help = "Read feedback from a file")]
        feedback_file: Option<PathBuf>,
        #[arg(long, help = "Version the feedback refers to (defaults to the stored version)")]
        base_version: Option<u32>,
        #[command(flatten)]
        script: ScriptArg,
    },
    #[command(about = "Restore the previous version of one document")]
    Rollback {
        #[arg(long, help = "Document to roll back: frontend or backend")]
        tag: ArtifactTag,
    },
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let mut options =
        RunOptions { config_path: cli.config, output_dir: cli.output_dir, script: None };

    if let Ok(config) = AppConfig::load(options.load_options()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Analyze { input, script } => {
            options.script = script.script;
            commands::analyze::run(&input, &options)
        }
        Command::Regenerate { tag, feedback, feedback_file, base_version, script } => {
            options.script = script.script;
            match read_feedback(feedback, feedback_file) {
                Ok(feedback) => commands::regenerate::run(
                    &RegenerateArgs { tag, feedback, base_version },
                    &options,
                ),
                Err(result) => result,
            }
        }
        Command::Rollback { tag } => commands::rollback::run(tag, &options),
        Command::Config => CommandResult { exit_code: 0, output: commands::config::run(&options) },
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout carries only the command payload.
pub fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

fn read_feedback(
    inline: Option<String>,
    file: Option<PathBuf>,
) -> Result<String, CommandResult> {
    match (inline, file) {
        (Some(feedback), _) => Ok(feedback),
        (None, Some(path)) => fs::read_to_string(&path).map_err(|error| {
            CommandResult::failure(
                "regenerate",
                "input_read",
                format!("could not read feedback file `{}`: {error}", path.display()),
                EXIT_INPUT,
            )
        }),
        (None, None) => Err(CommandResult::failure(
            "regenerate",
            "empty_input",
            "provide --feedback or --feedback-file",
            EXIT_INPUT,
        )),
    }
}
