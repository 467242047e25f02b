//! `cairn validate`: check a template without touching any stack

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use reconcile::StackState;

use super::{Session, plan};
use crate::Context;
use crate::cli::TemplateArgs;
use crate::ui;

pub fn run(ctx: &Context, args: TemplateArgs) -> Result<()> {
    let session = Session::open()?;
    let scratch = StackState::new("validate");
    let resolved = plan::prepare(&session, &args, &scratch)?;

    // Builds the graph: cycles, dangling references and unknown types
    let plan = session
        .engine(ctx, None)
        .plan(&resolved, &scratch)
        .context("Template does not form a valid stack")?;

    ui::header(&format!("Template {}", args.template.display()));

    if !resolved.parameters.is_empty() {
        ui::section("Parameters");
        for (name, parameter) in &resolved.parameters {
            ui::kv(name, &parameter.display_value());
        }
    }

    if !resolved.conditions.is_empty() {
        ui::section("Conditions");
        for (name, holds) in &resolved.conditions {
            let value = if *holds { "true".green() } else { "false".red() };
            ui::kv(name, &value.to_string());
        }
    }

    ui::section(&format!("Resources ({})", plan.creation_order.len()));
    for name in &plan.creation_order {
        let resource = &resolved.resources[name.as_str()];
        println!("  {} {}", name.bold(), resource.resource_type.dimmed());
    }
    for name in &resolved.excluded {
        println!("  {} {}", name.dimmed(), "(condition false)".dimmed());
    }

    if !resolved.outputs.is_empty() {
        ui::section("Outputs");
        for (name, output) in &resolved.outputs {
            match &output.description {
                Some(description) => ui::kv(name, description),
                None => println!("  {name}"),
            }
        }
    }

    println!();
    ui::success("Template is valid");
    Ok(())
}
