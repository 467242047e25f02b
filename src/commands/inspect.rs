//! Read-only views of recorded stacks: `outputs`, `status` and `list`

use anyhow::Result;
use colored::Colorize;
use reconcile::{StackState, StateStore};
use serde_json::Value;

use super::Session;
use crate::cli::{OutputsArgs, StackArg};
use crate::ui;

pub fn outputs(args: OutputsArgs) -> Result<()> {
    let session = Session::open()?;
    let state = session.require_state(&args.stack.stack)?;

    if args.json {
        let values: serde_json::Map<String, Value> = state
            .outputs
            .iter()
            .map(|(name, output)| (name.clone(), output.value.clone()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    if state.outputs.is_empty() {
        ui::info(&format!("Stack {} has no outputs", state.name));
        return Ok(());
    }
    ui::header(&format!("Outputs of stack {}", state.name));
    print_outputs(&state);
    Ok(())
}

/// Print outputs as `Name: value`, with export names and descriptions
pub fn print_outputs(state: &StackState) {
    for (name, output) in &state.outputs {
        ui::kv(name, &display_value(&output.value));
        if let Some(export) = &output.export_name {
            println!("      {} {}", "export".dimmed(), export);
        }
        if let Some(description) = &output.description {
            println!("      {}", description.dimmed());
        }
    }
}

/// Strings bare, everything else as compact JSON
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn status(args: StackArg) -> Result<()> {
    let session = Session::open()?;
    let state = session.require_state(&args.stack)?;

    ui::header(&format!("Stack {}", state.name));
    ui::kv("Status", &ui::stack_status(state.status).to_string());
    ui::kv("Id", &state.id);
    ui::kv("Updated", &state.updated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string());

    if !state.parameters.is_empty() {
        ui::section("Parameters");
        for (name, value) in &state.parameters {
            ui::kv(name, value);
        }
    }

    ui::section(&format!("Resources ({})", state.resources.len()));
    for record in state.resources.values() {
        println!(
            "  {} {} {}",
            ui::resource_status(record.status),
            record.logical_name.bold(),
            record.resource_type.dimmed()
        );
        println!("      {}", record.external_id);
        if !record.depends_on.is_empty() {
            println!(
                "      {} {}",
                "depends on".dimmed(),
                record.depends_on.join(", ")
            );
        }
    }

    if !state.outputs.is_empty() {
        ui::section("Outputs");
        print_outputs(&state);
    }
    Ok(())
}

pub fn list() -> Result<()> {
    let session = Session::open()?;
    let names = session.store.list()?;
    if names.is_empty() {
        ui::info("No stacks yet. Create one with `cairn apply <template> --stack <name>`.");
        ui::dim(&format!("State directory: {}", session.store.dir().display()));
        return Ok(());
    }

    ui::header("Stacks");
    for name in names {
        match session.store.load(&name) {
            Ok(Some(state)) => println!(
                "  {:<24} {:<14} {:>3} resources  {}",
                name.bold(),
                ui::stack_status(state.status),
                state.resources.len(),
                state
                    .updated_at
                    .format("%Y-%m-%d %H:%M")
                    .to_string()
                    .dimmed()
            ),
            Ok(None) => {}
            Err(e) => ui::warn(&format!("{name}: {e}")),
        }
    }
    Ok(())
}
