//! `cairn drift`: compare recorded resources with the provider

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use reconcile::{DriftStatus, ResourceDrift};

use super::Session;
use super::inspect::display_value;
use crate::Context;
use crate::cli::DriftArgs;
use crate::ui;

pub fn run(ctx: &Context, args: DriftArgs) -> Result<()> {
    let session = Session::open()?;
    let stack = args.stack.stack.as_str();
    let mut state = session.require_state(stack)?;
    let engine = session.engine(ctx, None);

    let drifts = engine
        .detect_drift(&state)
        .with_context(|| format!("Failed to check drift of stack '{stack}'"))?;

    ui::header(&format!("Drift for stack {stack}"));
    println!();
    for drift in &drifts {
        print_drift(drift);
    }

    let drifted = drifts.iter().filter(|d| d.is_drifted()).count();
    println!();
    if drifted == 0 {
        ui::success(&format!("All {} resources in sync", drifts.len()));
        return Ok(());
    }
    ui::warn(&format!("{drifted} of {} resources drifted", drifts.len()));

    if args.refresh {
        let dropped = engine.refresh(&mut state)?;
        if dropped.is_empty() {
            ui::info("Nothing to forget; run `cairn apply` to restore modified resources");
        } else {
            ui::success(&format!(
                "Forgot {}; the next apply recreates them",
                dropped.join(", ")
            ));
        }
    }
    Ok(())
}

fn print_drift(drift: &ResourceDrift) {
    let label = match &drift.status {
        DriftStatus::InSync => "IN_SYNC".green(),
        DriftStatus::Modified(_) => "MODIFIED".yellow().bold(),
        DriftStatus::Deleted => "DELETED".red().bold(),
    };
    println!(
        "  {:<9} {} {} {}",
        label,
        drift.logical_name.bold(),
        drift.resource_type.dimmed(),
        drift.external_id.dimmed()
    );
    if let DriftStatus::Modified(attributes) = &drift.status {
        for attribute in attributes {
            let actual = attribute
                .actual
                .as_ref()
                .map_or_else(|| "(missing)".to_string(), display_value);
            println!(
                "      {}: {} → {}",
                attribute.attribute.cyan(),
                display_value(&attribute.expected).red(),
                actual.green()
            );
        }
    }
}
