//! `cairn destroy`: delete every resource of a stack

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use template::DeletionPolicy;

use super::Session;
use crate::Context;
use crate::cli::DestroyArgs;
use crate::progress::ProgressSink;
use crate::ui;

pub fn run(ctx: &Context, args: DestroyArgs) -> Result<()> {
    let session = Session::open()?;
    let stack = args.stack.stack.as_str();
    let state = session.require_state(stack)?;

    ui::header(&format!("Destroying stack {stack}"));
    println!();
    for record in state.resources.values().rev() {
        let (marker, note) = match record.deletion_policy {
            DeletionPolicy::Delete => ("-".red().bold(), "delete"),
            DeletionPolicy::Retain => ("◦".cyan(), "retain"),
        };
        println!(
            "  {marker} {} {} {}",
            record.logical_name.bold(),
            record.external_id.dimmed(),
            format!("({note})").dimmed()
        );
    }
    if state.resources.is_empty() {
        ui::dim("Stack has no resources");
    }

    println!();
    if !super::confirm(&format!("Destroy stack '{stack}'?"), args.yes)? {
        ui::info("Destroy cancelled");
        return Ok(());
    }

    let sink = ProgressSink::new(state.resources.len(), ctx.quiet);
    let engine = session.engine(ctx, args.jobs).with_events(&sink);
    let report = engine.destroy(state);
    sink.finish();
    let report = report.with_context(|| format!("Failed to destroy stack '{stack}'"))?;

    super::print_report(&report);
    if !report.is_success() {
        bail!("Stack '{stack}' ended {}", report.status);
    }
    ui::success(&format!("Stack {stack} destroyed"));
    Ok(())
}
