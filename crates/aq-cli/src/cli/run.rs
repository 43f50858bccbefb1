//! `aq run`: execute an app from a starting activity.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;

use aq_core::app::definition::load_app_file;
use aq_core::broker::{Broker, RunReport};
use aq_core::jobs::model::ActivityInputs;
use aq_infra::config::resolve_workers;
use aq_infra::default_registry;
use aq_types::config::EngineConfig;
use aq_types::job::JobState;

use super::RunArgs;

pub async fn run(args: RunArgs, config: &EngineConfig, json: bool, quiet: bool) -> Result<()> {
    let app = load_app_file(&args.app)
        .with_context(|| format!("failed to load app '{}'", args.app.display()))?;

    let mut config = config.clone();
    config.scheduler.workers = resolve_workers(&config, args.workers);
    if let Some(dir) = args.out_dir {
        config.output.dir = dir;
    }

    let mut inputs = ActivityInputs::new();
    if let Some(path) = args.file_path {
        inputs.insert("file_path".to_string(), Value::String(path));
    }
    for (key, value) in args.inputs {
        inputs.insert(key, Value::String(value));
    }

    tracing::info!(
        app = app.info.id.as_str(),
        activity = args.activity.as_str(),
        workers = config.scheduler.workers,
        "starting workflow"
    );

    let broker = Broker::new(default_registry(&config), &config.scheduler);
    let report = broker.run(Arc::new(app), &args.activity, inputs).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        print_report(&report);
    }

    if report.state == JobState::Error {
        bail!("workflow finished with failed activities");
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    let marker = match report.state {
        JobState::Success => style("*").green().bold(),
        _ => style("!").red().bold(),
    };
    println!(
        "  {} Workflow {} finished: {}",
        marker,
        style(report.instance_id.to_string().chars().take(8).collect::<String>()).cyan(),
        report.state
    );

    if report.outputs.is_empty() {
        println!("  No terminal outputs.");
    } else {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![Cell::new("Activity").fg(Color::Cyan), Cell::new("Output")]);
        for (activity, outputs) in &report.outputs {
            for output in outputs {
                table.add_row(vec![Cell::new(activity), Cell::new(output)]);
            }
        }
        println!("{table}");
    }

    if report.usage.requests > 0 {
        println!(
            "  Usage: {} request(s), {} tokens",
            report.usage.requests,
            report.usage.total_tokens()
        );
    }
    println!();
}
