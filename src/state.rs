//! File-backed stack state
//!
//! One pretty-printed JSON file per stack under the state directory. Files
//! are written to a temporary sibling and renamed so a crash mid-write
//! never leaves a truncated state file behind.

use reconcile::{Error, Result, StackState, StateStore};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

// Stack names double as file names
static STACK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,127}$").unwrap());

/// Whether `name` can be used as a stack name (and file name)
pub fn is_valid_stack_name(name: &str) -> bool {
    STACK_NAME.is_match(name)
}

/// Stack state stored as `<dir>/<stack>.json`
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, stack: &str) -> Result<PathBuf> {
        if !is_valid_stack_name(stack) {
            return Err(Error::State(format!("invalid stack name '{stack}'")));
        }
        Ok(self.dir.join(format!("{stack}.json")))
    }
}

fn io_error(action: &str, path: &Path, e: impl std::fmt::Display) -> Error {
    Error::State(format!("Failed to {action} {}: {e}", path.display()))
}

impl StateStore for FileStateStore {
    fn load(&self, stack: &str) -> Result<Option<StackState>> {
        let path = self.file(stack)?;
        if !path.exists() {
            log::debug!("No state for stack {stack}");
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| io_error("read", &path, e))?;
        let state = serde_json::from_str(&content).map_err(|e| io_error("parse", &path, e))?;
        log::debug!("Loaded state from {}", path.display());
        Ok(Some(state))
    }

    fn save(&self, state: &StackState) -> Result<()> {
        let path = self.file(&state.name)?;
        fs::create_dir_all(&self.dir).map_err(|e| io_error("create", &self.dir, e))?;
        let content =
            serde_json::to_string_pretty(state).map_err(|e| io_error("serialize", &path, e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| io_error("write", &tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error("replace", &path, e))?;
        log::trace!("Saved state to {}", path.display());
        Ok(())
    }

    fn remove(&self, stack: &str) -> Result<()> {
        let path = self.file(stack)?;
        if path.exists() {
            fs::remove_file(&path).map_err(|e| io_error("remove", &path, e))?;
            log::debug!("Removed {}", path.display());
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|e| io_error("list", &self.dir, e))?;
        let mut names: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    return None;
                }
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(ToString::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }
}
