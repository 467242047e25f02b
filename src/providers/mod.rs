//! Resource providers
//!
//! Every type in the [`catalog`] is served by one configured control plane:
//! the local sandbox or a JSON REST endpoint.

pub mod catalog;
pub mod http;
pub mod local;

use anyhow::{Context, Result};
use reconcile::ProviderRegistry;
use std::sync::Arc;

use crate::config::{CairnConfig, ProviderConfig};
use crate::paths;

/// Build the registry described by `config`
pub fn build_registry(config: &CairnConfig) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    match &config.provider {
        ProviderConfig::Local { root } => {
            let root = match root {
                Some(root) => paths::expand(root),
                None => paths::sandbox_dir().context("Could not determine sandbox directory")?,
            };
            log::debug!("Using local sandbox at {}", root.display());
            let sandbox = Arc::new(local::Sandbox::new(root, config.environment.clone()));
            for spec in catalog::all() {
                registry.register(
                    spec.resource_type,
                    Arc::new(local::LocalProvider::new(sandbox.clone(), spec)),
                );
            }
        }
        ProviderConfig::Http {
            endpoint,
            token_env,
        } => {
            let token = std::env::var(token_env).ok().filter(|t| !t.is_empty());
            if token.is_none() {
                log::warn!("{token_env} is not set; requests to {endpoint} are unauthenticated");
            }
            let client = Arc::new(http::HttpClient::new(endpoint.as_str(), token));
            log::debug!("Using HTTP control plane at {}", client.endpoint());
            for spec in catalog::all() {
                registry.register(
                    spec.resource_type,
                    Arc::new(http::HttpProvider::new(client.clone(), spec.resource_type)),
                );
            }
        }
    }
    Ok(registry)
}
