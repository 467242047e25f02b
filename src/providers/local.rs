//! File-backed sandbox control plane
//!
//! Resources live in `<root>/resources.json`. The sandbox behaves like a
//! strict cloud API: ids are minted per type, required properties are
//! enforced, referenced ids must exist, and a resource that something else
//! still references cannot be deleted.

use super::catalog::{self, TypeSpec};
use reconcile::{
    Attributes, CreateRequest, Created, Properties, Provider, ProviderError, UpdateBehavior,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use template::Environment;

/// A resource held by the sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxResource {
    pub resource_type: String,
    pub logical_name: String,
    pub properties: Properties,
    pub attributes: Attributes,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SandboxData {
    #[serde(default)]
    serial: u64,
    #[serde(default)]
    resources: BTreeMap<String, SandboxResource>,
    /// Idempotency token -> external id of live resources
    #[serde(default)]
    tokens: BTreeMap<String, String>,
}

/// The sandbox shared by every per-type provider
#[derive(Debug)]
pub struct Sandbox {
    root: PathBuf,
    env: Environment,
    lock: Mutex<()>,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>, env: Environment) -> Self {
        Self {
            root: root.into(),
            env,
            lock: Mutex::new(()),
        }
    }

    fn file(&self) -> PathBuf {
        self.root.join("resources.json")
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>, ProviderError> {
        self.lock
            .lock()
            .map_err(|_| ProviderError::Unavailable("sandbox lock poisoned".into()))
    }

    fn load(&self) -> Result<SandboxData, ProviderError> {
        let path = self.file();
        if !path.exists() {
            return Ok(SandboxData::default());
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| ProviderError::Unavailable(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| ProviderError::Unavailable(format!("parse {}: {e}", path.display())))
    }

    fn store(&self, data: &SandboxData) -> Result<(), ProviderError> {
        let unavailable = |e: std::io::Error| ProviderError::Unavailable(e.to_string());
        fs::create_dir_all(&self.root).map_err(unavailable)?;
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        let tmp = self.file().with_extension("json.tmp");
        fs::write(&tmp, content).map_err(unavailable)?;
        fs::rename(&tmp, self.file()).map_err(unavailable)
    }

    /// Every live resource, keyed by external id
    #[cfg(test)]
    pub fn resources(&self) -> Result<BTreeMap<String, SandboxResource>, ProviderError> {
        let _guard = self.guard()?;
        Ok(self.load()?.resources)
    }

    fn create(&self, spec: &TypeSpec, request: &CreateRequest) -> Result<Created, ProviderError> {
        let _guard = self.guard()?;
        let mut data = self.load()?;

        if let Some(id) = data.tokens.get(&request.idempotency_token)
            && let Some(existing) = data.resources.get(id)
        {
            log::debug!("Token {} already created {id}", request.idempotency_token);
            return Ok(Created {
                external_id: id.clone(),
                attributes: existing.attributes.clone(),
            });
        }

        validate(spec, &request.properties, &data)?;

        data.serial += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(request.idempotency_token.as_bytes());
        hasher.update(&data.serial.to_le_bytes());
        let suffix = hasher.finalize().to_hex()[..17].to_string();
        let id = spec.external_id(&suffix, &self.env);
        let attributes = spec.derive_attributes(&id, &request.properties, &self.env);

        data.resources.insert(
            id.clone(),
            SandboxResource {
                resource_type: spec.resource_type.to_string(),
                logical_name: request.logical_name.clone(),
                properties: request.properties.clone(),
                attributes: attributes.clone(),
            },
        );
        data.tokens
            .insert(request.idempotency_token.clone(), id.clone());
        self.store(&data)?;
        log::debug!("Sandbox created {id} for {}", request.logical_name);
        Ok(Created {
            external_id: id,
            attributes,
        })
    }

    fn read(&self, external_id: &str) -> Result<Attributes, ProviderError> {
        let _guard = self.guard()?;
        self.load()?
            .resources
            .get(external_id)
            .map(|r| r.attributes.clone())
            .ok_or_else(|| ProviderError::NotFound(external_id.to_string()))
    }

    fn update(
        &self,
        spec: &TypeSpec,
        external_id: &str,
        properties: &Properties,
    ) -> Result<Attributes, ProviderError> {
        let _guard = self.guard()?;
        let mut data = self.load()?;
        let current = data
            .resources
            .get(external_id)
            .ok_or_else(|| ProviderError::NotFound(external_id.to_string()))?;

        if let Some(property) = spec
            .replace_on
            .iter()
            .find(|p| current.properties.get(**p) != properties.get(**p))
        {
            return Err(ProviderError::Validation(format!(
                "{property} of {external_id} cannot be changed in place"
            )));
        }
        validate(spec, properties, &data)?;

        let attributes = spec.derive_attributes(external_id, properties, &self.env);
        if let Some(resource) = data.resources.get_mut(external_id) {
            resource.properties = properties.clone();
            resource.attributes = attributes.clone();
        }
        self.store(&data)?;
        Ok(attributes)
    }

    fn delete(&self, external_id: &str) -> Result<(), ProviderError> {
        let _guard = self.guard()?;
        let mut data = self.load()?;
        if !data.resources.contains_key(external_id) {
            return Err(ProviderError::NotFound(external_id.to_string()));
        }
        if let Some((dependent, _)) = data
            .resources
            .iter()
            .find(|(id, r)| *id != external_id && mentions(&r.properties, external_id))
        {
            return Err(ProviderError::Conflict(format!(
                "{external_id} is still in use by {dependent}"
            )));
        }
        data.resources.remove(external_id);
        data.tokens.retain(|_, id| id != external_id);
        self.store(&data)?;
        log::debug!("Sandbox deleted {external_id}");
        Ok(())
    }
}

/// Required properties present and every referenced id alive
fn validate(spec: &TypeSpec, properties: &Properties, data: &SandboxData) -> Result<(), ProviderError> {
    if let Some(missing) = spec.required.iter().find(|p| !properties.contains_key(**p)) {
        return Err(ProviderError::Validation(format!(
            "{} requires property {missing}",
            spec.resource_type
        )));
    }
    let mut ids = Vec::new();
    for value in properties.values() {
        collect_ids(value, &mut ids);
    }
    if let Some(dangling) = ids.iter().find(|id| !data.resources.contains_key(**id)) {
        return Err(ProviderError::Validation(format!(
            "referenced resource {dangling} does not exist"
        )));
    }
    Ok(())
}

fn collect_ids<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) if catalog::looks_like_id(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_ids(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_ids(v, out)),
        _ => {}
    }
}

fn mentions(properties: &Properties, id: &str) -> bool {
    let mut ids = Vec::new();
    for value in properties.values() {
        collect_ids(value, &mut ids);
    }
    ids.contains(&id)
}

/// Provider for one resource type backed by the sandbox
pub struct LocalProvider {
    sandbox: Arc<Sandbox>,
    spec: &'static TypeSpec,
}

impl LocalProvider {
    pub fn new(sandbox: Arc<Sandbox>, spec: &'static TypeSpec) -> Self {
        Self { sandbox, spec }
    }
}

impl Provider for LocalProvider {
    fn create(&self, request: &CreateRequest) -> Result<Created, ProviderError> {
        self.sandbox.create(self.spec, request)
    }

    fn read(&self, external_id: &str) -> Result<Attributes, ProviderError> {
        self.sandbox.read(external_id)
    }

    fn update(&self, external_id: &str, properties: &Properties) -> Result<Attributes, ProviderError> {
        self.sandbox.update(self.spec, external_id, properties)
    }

    fn delete(&self, external_id: &str) -> Result<(), ProviderError> {
        self.sandbox.delete(external_id)
    }

    fn update_behavior(&self, property: &str) -> UpdateBehavior {
        if self.spec.requires_replacement(property) {
            UpdateBehavior::Replace
        } else {
            UpdateBehavior::InPlace
        }
    }
}
