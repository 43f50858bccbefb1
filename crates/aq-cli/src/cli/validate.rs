//! `aq validate`: check an app definition without running it.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use aq_core::app::definition::load_app_file;

pub fn validate(path: &Path, json: bool) -> Result<()> {
    let app = load_app_file(path).with_context(|| format!("invalid app '{}'", path.display()))?;

    if json {
        let activities: Vec<serde_json::Value> = app
            .activities
            .iter()
            .map(|(name, activity)| {
                serde_json::json!({
                    "name": name,
                    "type": activity.kind.to_string(),
                    "inputs": activity.inputs.iter().map(|i| i.activity.as_str()).collect::<Vec<_>>(),
                })
            })
            .collect();
        let out = serde_json::json!({
            "id": app.info.id,
            "title": app.info.title,
            "version": app.info.version,
            "valid": true,
            "activities": activities,
            "sinks": app.sink_activities(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} App '{}' is valid",
        style("*").green().bold(),
        style(&app.info.title).cyan()
    );
    println!("  ID: {}", app.info.id);
    println!("  Version: {}", app.info.version);
    println!("  Activities: {}", app.activities.len());

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Activity").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Inputs"),
            Cell::new("Role"),
        ]);
    let sinks = app.sink_activities();
    for (name, activity) in app.activities.iter() {
        let role = if activity.is_source() {
            "source"
        } else if sinks.contains(&name) {
            "sink"
        } else {
            ""
        };
        let inputs = activity
            .inputs
            .iter()
            .map(|input| match &input.fan_out {
                Some(expr) => format!("{} (map: {expr})", input.activity),
                None => input.activity.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            Cell::new(name),
            Cell::new(activity.kind.to_string()),
            Cell::new(inputs),
            Cell::new(role),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}
