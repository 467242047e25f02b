use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cairn")]
#[command(author = "Cairn Contributors")]
#[command(version)]
#[command(about = "Converge stacks of cloud resources to a declared template", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check a template and show what it resolves to
    Validate(TemplateArgs),

    /// Show what an apply would change
    Plan(PlanArgs),

    /// Create or update a stack from a template
    Apply(ApplyArgs),

    /// Delete every resource of a stack
    Destroy(DestroyArgs),

    /// Show the outputs of a stack
    Outputs(OutputsArgs),

    /// Show the recorded resources of a stack
    Status(StackArg),

    /// List known stacks
    List,

    /// Compare recorded resources with what the provider reports
    Drift(DriftArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Shared Arguments
// ============================================================================

#[derive(Args, Clone)]
pub struct TemplateArgs {
    /// Template file (JSON or YAML)
    pub template: PathBuf,

    /// Parameter override (repeatable)
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// JSON or YAML file mapping parameter names to values
    #[arg(long, value_name = "FILE")]
    pub param_file: Option<PathBuf>,
}

#[derive(Args, Clone)]
pub struct StackArg {
    /// Stack name
    #[arg(short, long, env = "CAIRN_STACK")]
    pub stack: String,
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub template: TemplateArgs,

    #[command(flatten)]
    pub stack: StackArg,

    /// Forget resources deleted out of band before planning
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub template: TemplateArgs,

    #[command(flatten)]
    pub stack: StackArg,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Maximum provider calls in flight
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Forget resources deleted out of band before planning
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Args)]
pub struct DestroyArgs {
    #[command(flatten)]
    pub stack: StackArg,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Maximum provider calls in flight
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args)]
pub struct OutputsArgs {
    #[command(flatten)]
    pub stack: StackArg,

    /// Print outputs as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct DriftArgs {
    #[command(flatten)]
    pub stack: StackArg,

    /// Forget resources that no longer exist so the next apply recreates them
    #[arg(long)]
    pub refresh: bool,
}

/// Parse `KEY=VALUE`; the value may itself contain `=`
fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("Env=prod").unwrap(),
            ("Env".to_string(), "prod".to_string())
        );
        assert_eq!(
            parse_param("Filter=a=b").unwrap(),
            ("Filter".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_param("Empty=").unwrap().1, "");
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_apply_args() {
        let cli = Cli::try_parse_from([
            "cairn", "apply", "net.yaml", "--stack", "net", "-p", "Env=prod", "-p", "Zones=2",
            "--yes", "-j", "8",
        ])
        .unwrap();
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.stack.stack, "net");
        assert_eq!(args.template.params.len(), 2);
        assert!(args.yes);
        assert_eq!(args.jobs, Some(8));
    }
}
