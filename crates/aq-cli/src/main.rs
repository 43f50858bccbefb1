//! aq command-line entry point.
//!
//! Binary name: `aq`
//!
//! Parses CLI arguments, loads `config.toml`, initializes tracing, then
//! dispatches to the command handler.

mod cli;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions need neither config nor tracing
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "aq", &mut std::io::stdout());
        return Ok(());
    }

    let loaded = aq_infra::config::load_engine_config(&cli.config).await;
    let config = loaded.config;

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,aq_core=debug,aq_infra=debug",
        _ => "trace",
    };
    aq_observe::init_tracing(filter, cli.otel || config.telemetry.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
    if let Some(reason) = &loaded.fallback {
        tracing::warn!(reason = reason.as_str(), "using default engine configuration");
    }

    let result = match cli.command {
        Commands::Run(args) => cli::run::run(args, &config, cli.json, cli.quiet).await,
        Commands::Validate { app } => cli::validate::validate(&app, cli.json),
        Commands::Completions { .. } => Ok(()),
    };

    aq_observe::shutdown_tracing();
    result
}
