//! Command implementations
//!
//! Every command opens a [`Session`]: the user config, the provider
//! registry it describes and the stack state store.

pub mod apply;
pub mod destroy;
pub mod drift;
pub mod inspect;
pub mod plan;
pub mod validate;

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use reconcile::{Engine, ProviderRegistry, RunReport, StackState, StateStore};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use template::Template;

use crate::Context;
use crate::cli::TemplateArgs;
use crate::config::CairnConfig;
use crate::paths;
use crate::providers;
use crate::state::{FileStateStore, is_valid_stack_name};
use crate::ui;

/// Config, providers and state store for one invocation
pub struct Session {
    pub config: CairnConfig,
    pub registry: ProviderRegistry,
    pub store: FileStateStore,
}

impl Session {
    pub fn open() -> Result<Self> {
        let config = CairnConfig::load()?;
        let registry = providers::build_registry(&config)?;
        let store = FileStateStore::new(paths::stacks_dir()?);
        Ok(Self {
            config,
            registry,
            store,
        })
    }

    /// Engine wired to the session's providers, store and Ctrl-C token
    pub fn engine(&self, ctx: &Context, jobs: Option<usize>) -> Engine<'_> {
        Engine::new(&self.registry, &self.store)
            .with_options(self.config.engine_options(jobs))
            .with_cancel(ctx.cancel.clone())
    }

    pub fn load_state(&self, stack: &str) -> Result<Option<StackState>> {
        check_stack_name(stack)?;
        self.store
            .load(stack)
            .with_context(|| format!("Failed to load state of stack '{stack}'"))
    }

    /// State of a stack that must already exist
    pub fn require_state(&self, stack: &str) -> Result<StackState> {
        match self.load_state(stack)? {
            Some(state) => Ok(state),
            None => bail!("Stack '{stack}' does not exist. Run `cairn list` to see known stacks."),
        }
    }
}

pub fn check_stack_name(stack: &str) -> Result<()> {
    if !is_valid_stack_name(stack) {
        bail!(
            "Invalid stack name '{stack}': use letters, digits and '-', starting with a letter"
        );
    }
    Ok(())
}

pub fn load_template(path: &Path) -> Result<Template> {
    Template::load(path).with_context(|| format!("Failed to load template: {}", path.display()))
}

/// Parameter overrides: the parameter file first, then `-p` flags
pub fn read_parameters(args: &TemplateArgs) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    if let Some(path) = &args.param_file {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameter file: {}", path.display()))?;
        params = parse_param_file(&content)
            .with_context(|| format!("Failed to parse parameter file: {}", path.display()))?;
    }
    for (key, value) in &args.params {
        params.insert(key.clone(), value.clone());
    }
    Ok(params)
}

/// Accepts `{Key: Value}` or `[{ParameterKey, ParameterValue}]`, in JSON or YAML
fn parse_param_file(content: &str) -> Result<BTreeMap<String, String>> {
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let doc: Value = serde_yaml::from_str(content)?;
    let mut params = BTreeMap::new();
    match doc {
        Value::Object(map) => {
            for (key, value) in map {
                let text = param_text(&key, &value)?;
                params.insert(key, text);
            }
        }
        Value::Array(items) => {
            for item in items {
                let key = item
                    .get("ParameterKey")
                    .and_then(Value::as_str)
                    .context("Entry without ParameterKey")?;
                let value = item.get("ParameterValue").unwrap_or(&Value::Null);
                params.insert(key.to_string(), param_text(key, value)?);
            }
        }
        Value::Null => {}
        _ => bail!("Expected a map of parameter names to values"),
    }
    Ok(params)
}

fn param_text(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(items) => items
            .iter()
            .map(|item| param_text(key, item))
            .collect::<Result<Vec<_>>>()
            .map(|parts| parts.join(",")),
        _ => bail!("Parameter {key} must be a scalar or a list"),
    }
}

/// Ask before touching resources; refuses when nobody can answer
pub fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    if !console::user_attended() {
        bail!("Refusing to continue without --yes in a non-interactive session");
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(confirmed)
}

/// Print what a run did and why it stopped
pub fn print_report(report: &RunReport) {
    let summary = &report.summary;
    println!();
    let counts = [
        (summary.created, "created"),
        (summary.updated, "updated"),
        (summary.replaced, "replaced"),
        (summary.deleted, "deleted"),
        (summary.retained, "retained"),
        (summary.rolled_back, "rolled back"),
        (summary.failed, "failed"),
    ];
    for (count, label) in counts.iter().filter(|(count, _)| *count > 0) {
        println!("    • {count} {label}");
    }
    if summary.unchanged > 0 {
        println!("    • {} unchanged", summary.unchanged.to_string().dimmed());
    }

    if let Some(error) = &report.error {
        println!();
        ui::error(&error.to_string());
        let category = error.category();
        ui::dim(&format!("{}: {}", category.description(), category.advice()));
    }
    for error in &report.rollback_errors {
        ui::error(&format!("rollback: {error}"));
    }
    for error in &report.cleanup_errors {
        ui::warn(&format!("cleanup: {error}"));
    }

    println!();
    println!("  Stack {}", ui::stack_status(report.status));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_param_file_map() {
        let params = parse_param_file(
            "Env: prod\nZones: 2\nCidrs:\n  - 10.0.0.0/24\n  - 10.0.1.0/24\nPublic: true\n",
        )
        .unwrap();
        assert_eq!(params["Env"], "prod");
        assert_eq!(params["Zones"], "2");
        assert_eq!(params["Cidrs"], "10.0.0.0/24,10.0.1.0/24");
        assert_eq!(params["Public"], "true");
    }

    #[test]
    fn test_param_file_key_value_list() {
        let params = parse_param_file(
            r#"[{"ParameterKey": "Env", "ParameterValue": "dev"}, {"ParameterKey": "Size", "ParameterValue": 3}]"#,
        )
        .unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params["Size"], "3");
    }

    #[test]
    fn test_param_file_rejects_nested_maps() {
        assert!(parse_param_file("Env: {a: b}\n").is_err());
        assert!(parse_param_file("just a string").is_err());
        assert!(parse_param_file("").unwrap().is_empty());
    }

    #[test]
    fn test_flags_override_param_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("params.json");
        fs::write(&file, r#"{"Env": "dev", "Size": "1"}"#).unwrap();
        let args = TemplateArgs {
            template: PathBuf::from("t.yaml"),
            params: vec![("Env".into(), "prod".into())],
            param_file: Some(file),
        };
        let params = read_parameters(&args).unwrap();
        assert_eq!(params["Env"], "prod");
        assert_eq!(params["Size"], "1");
    }

    #[test]
    fn test_stack_name_check() {
        assert!(check_stack_name("web").is_ok());
        assert!(check_stack_name("bad/name").is_err());
    }

    #[test]
    fn test_confirm_assume_yes() {
        assert!(confirm("Apply?", true).unwrap());
    }
}
