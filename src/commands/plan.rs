//! `cairn plan`: show what an apply would change

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use reconcile::{Action, DriftStatus, Plan, PlannedChange, PlannedValue, PropertyChange, StackState};
use serde_json::Value;
use template::Resolved;

use super::Session;
use crate::Context;
use crate::cli::PlanArgs;
use crate::ui;

const UNKNOWN: &str = "(known after apply)";

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let session = Session::open()?;
    let stack = &args.stack.stack;
    let engine = session.engine(ctx, None);

    let mut state = session
        .load_state(stack)?
        .unwrap_or_else(|| StackState::new(stack));
    if args.refresh && !state.resources.is_empty() {
        // Not persisted: plan never changes state
        for drift in engine.detect_drift(&state)? {
            if drift.status == DriftStatus::Deleted {
                state.forget(&drift.logical_name);
                ui::warn(&format!(
                    "{} no longer exists and will be recreated",
                    drift.logical_name
                ));
            }
        }
    }

    let resolved = prepare(&session, &args.template, &state)?;
    let plan = engine
        .plan(&resolved, &state)
        .with_context(|| format!("Failed to plan stack '{stack}'"))?;

    ui::header(&format!("Plan for stack {stack}"));
    render(&plan, ctx.verbose > 0);
    Ok(())
}

/// Load and resolve the template against a stack's identity
pub fn prepare(
    session: &Session,
    args: &crate::cli::TemplateArgs,
    state: &StackState,
) -> Result<Resolved> {
    let template = super::load_template(&args.template)?;
    let overrides = super::read_parameters(args)?;
    let resolved = template::resolve(
        &template,
        &overrides,
        &session.config.environment,
        state.identity(),
    )
    .with_context(|| format!("Failed to resolve template: {}", args.template.display()))?;
    Ok(resolved)
}

/// Print every change in the plan with property diffs
pub fn render(plan: &Plan, show_unchanged: bool) {
    println!();
    for change in plan.changes.values() {
        if change.action == Action::NoChange && !show_unchanged {
            continue;
        }
        render_change(change);
    }

    let summary = plan.summary();
    println!();
    if summary.total_changes() == 0 {
        ui::success("No changes. Stack matches the template.");
        return;
    }
    println!(
        "  Plan: {} to create, {} to update, {} to replace, {} to delete{}",
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.replace.to_string().magenta(),
        summary.delete.to_string().red(),
        if summary.retain > 0 {
            format!(", {} to retain", summary.retain.to_string().cyan())
        } else {
            String::new()
        }
    );
}

fn render_change(change: &PlannedChange) {
    println!(
        "  {} {} {} {}",
        ui::action_symbol(change.action),
        change.logical_name.bold(),
        change.resource_type.dimmed(),
        format!("({})", change.action).dimmed()
    );
    for property in &change.changes {
        render_property(property);
    }
}

fn render_property(change: &PropertyChange) {
    let forces = if change.requires_replacement {
        format!(" {}", "forces replacement".magenta())
    } else {
        String::new()
    };
    println!("      {}{forces}", change.property.cyan());

    let before = change.before.as_ref().map(pretty).unwrap_or_default();
    let after = match &change.after {
        Some(PlannedValue::Known(value)) => pretty(value),
        Some(PlannedValue::Unknown) => format!("{UNKNOWN}\n"),
        None => String::new(),
    };
    ui::print_diff(&ui::diff_lines(&before, &after), 8);
}

fn pretty(value: &Value) -> String {
    let mut text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pretty_is_line_terminated() {
        assert_eq!(pretty(&json!("a")), "\"a\"\n");
        assert_eq!(pretty(&json!({"k": 1})), "{\n  \"k\": 1\n}\n");
    }

    #[test]
    fn test_unknown_values_diff_as_insert() {
        let before = pretty(&json!("vpc-1"));
        let lines = ui::diff_lines(&before, &format!("{UNKNOWN}\n"));
        assert_eq!(
            lines,
            vec!["- \"vpc-1\"".to_string(), format!("+ {UNKNOWN}")]
        );
    }
}
