//! `cairn apply`: converge a stack to a template

use anyhow::{Context as AnyhowContext, Result, bail};
use reconcile::{StackState, StateStore};

use super::{Session, inspect, plan};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::progress::ProgressSink;
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let session = Session::open()?;
    let stack = args.stack.stack.as_str();
    let mut state = session
        .load_state(stack)?
        .unwrap_or_else(|| StackState::new(stack));

    if args.refresh && !state.resources.is_empty() {
        let engine = session.engine(ctx, args.jobs);
        for name in engine.refresh(&mut state)? {
            ui::warn(&format!("{name} no longer exists and will be recreated"));
        }
    }

    let resolved = plan::prepare(&session, &args.template, &state)?;
    let plan = session
        .engine(ctx, args.jobs)
        .plan(&resolved, &state)
        .with_context(|| format!("Failed to plan stack '{stack}'"))?;

    if !ctx.quiet {
        ui::header(&format!("Applying stack {stack}"));
        plan::render(&plan, ctx.verbose > 0);
    }
    if plan.has_changes() && !super::confirm("Apply these changes?", args.yes)? {
        ui::info("Apply cancelled");
        return Ok(());
    }

    println!();
    let sink = ProgressSink::new(plan.summary().total_changes(), ctx.quiet);
    let engine = session.engine(ctx, args.jobs).with_events(&sink);
    let report = engine.apply(&resolved, &plan, state);
    sink.finish();
    let report = report.with_context(|| format!("Failed to apply stack '{stack}'"))?;

    super::print_report(&report);
    if !report.is_success() {
        bail!("Stack '{stack}' ended {}", report.status);
    }

    if let Some(state) = session.store.load(stack)?
        && !state.outputs.is_empty()
    {
        ui::section("Outputs");
        inspect::print_outputs(&state);
    }
    Ok(())
}
