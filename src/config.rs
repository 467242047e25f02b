//! User configuration (`config.toml`)

use anyhow::{Context, Result};
use reconcile::{EngineOptions, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use template::Environment;

use crate::paths;

/// Environment variable read for the HTTP provider token by default
pub const DEFAULT_TOKEN_ENV: &str = "CAIRN_TOKEN";

/// Contents of `config.toml`; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    /// Maximum provider calls in flight
    pub jobs: Option<usize>,
    /// Per-call timeout in seconds; 0 disables the timeout
    pub operation_timeout_secs: Option<u64>,
    pub retry: RetryConfig,
    pub environment: Environment,
    pub provider: ProviderConfig,
}

/// Which control plane resources are provisioned against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// File-backed sandbox
    Local {
        /// Sandbox directory; defaults to `<state dir>/sandbox`
        #[serde(default)]
        root: Option<String>,
    },
    /// JSON REST control plane
    Http {
        endpoint: String,
        /// Environment variable holding the bearer token
        #[serde(default = "default_token_env")]
        token_env: String,
    },
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::Local { root: None }
    }
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

impl CairnConfig {
    /// Path of the config file
    pub fn path() -> Result<PathBuf> {
        Ok(paths::config_dir()?.join("config.toml"))
    }

    /// Load the config file, or defaults if it does not exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Engine options, with `jobs` from the command line taking precedence
    pub fn engine_options(&self, jobs: Option<usize>) -> EngineOptions {
        let defaults = EngineOptions::default();
        let operation_timeout = match self.operation_timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.operation_timeout,
        };
        EngineOptions {
            jobs: jobs.or(self.jobs).unwrap_or(defaults.jobs).max(1),
            operation_timeout,
            retry: self.retry.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = CairnConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, CairnConfig::default());
        assert_eq!(config.provider, ProviderConfig::Local { root: None });
    }

    #[test]
    fn test_parse_full_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
jobs = 8
operation_timeout_secs = 0

[retry]
max_attempts = 3
base_delay = 250

[environment]
region = "eu-west-1"
availability_zones = ["eu-west-1a", "eu-west-1b"]

[provider]
kind = "http"
endpoint = "https://cloud.example.com/v1"
"#,
        )
        .unwrap();

        let config = CairnConfig::load_from(&path).unwrap();
        assert_eq!(config.jobs, Some(8));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.environment.region, "eu-west-1");
        assert_eq!(config.environment.account_id, "123456789012");
        assert_eq!(
            config.provider,
            ProviderConfig::Http {
                endpoint: "https://cloud.example.com/v1".into(),
                token_env: DEFAULT_TOKEN_ENV.into(),
            }
        );

        let options = config.engine_options(None);
        assert_eq!(options.jobs, 8);
        assert_eq!(options.operation_timeout, None);
        assert_eq!(config.engine_options(Some(2)).jobs, 2);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "jobs = [").unwrap();
        let err = CairnConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
