//! CLI command definitions for the `aq` binary.

pub mod run;
pub mod validate;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// Run activity workflows defined in YAML apps.
#[derive(Parser)]
#[command(name = "aq", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the engine configuration file.
    #[arg(long, global = true, env = "AQ_CONFIG", default_value = "config.toml")]
    pub config: PathBuf,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an app starting at one of its activities.
    Run(RunArgs),

    /// Check an app definition without running it.
    Validate {
        /// Path to the app YAML file.
        app: PathBuf,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Path to the app YAML file.
    pub app: PathBuf,

    /// Activity to start from.
    pub activity: String,

    /// File handed to the starting activity as its `file_path` input.
    pub file_path: Option<String>,

    /// Extra starting input as KEY=VALUE (repeatable).
    #[arg(long = "input", short = 'i', value_parser = parse_key_val)]
    pub inputs: Vec<(String, String)>,

    /// Number of concurrent workers (overrides config.toml).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Directory for files written by `write` activities (overrides config.toml).
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("topic=rust=fun").unwrap(),
            ("topic".to_string(), "rust=fun".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "aq", "run", "app.yml", "summarize", "notes.md", "--input", "tone=short", "--workers", "5",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.activity, "summarize");
        assert_eq!(args.file_path.as_deref(), Some("notes.md"));
        assert_eq!(args.inputs, vec![("tone".to_string(), "short".to_string())]);
        assert_eq!(args.workers, Some(5));
        assert!(args.out_dir.is_none());
    }
}
