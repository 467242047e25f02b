//! Persisted stack state
//!
//! The state records what the engine believes exists: one record per
//! logical name with the physical id, the properties it was last applied
//! with, and the attributes the provider reported. It is the only input to
//! planning besides the template.

use crate::error::{Error, Result};
use crate::provider::{Attributes, Properties};
use crate::types::{ResourceStatus, StackStatus};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use template::{DeletionPolicy, Scope, StackIdentity};

/// Recorded state of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub logical_name: String,
    pub resource_type: String,
    pub external_id: String,
    /// Properties the resource was last created or updated with
    pub properties: Properties,
    pub attributes: Attributes,
    /// Logical names this resource depended on when last applied
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Bumped on every replacement; part of the idempotency token
    #[serde(default)]
    pub generation: u32,
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
    pub status: ResourceStatus,
}

/// An evaluated stack output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_name: Option<String>,
}

/// Everything recorded about one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    pub name: String,
    pub id: String,
    pub status: StackStatus,
    /// Parameter values of the last run, `NoEcho` values masked
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: IndexMap<String, ResourceRecord>,
    #[serde(default)]
    pub outputs: IndexMap<String, OutputValue>,
    pub updated_at: DateTime<Utc>,
}

impl StackState {
    /// Fresh state for a stack that has never been applied
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: stack_id(name, Utc::now()),
            status: StackStatus::Pending,
            parameters: BTreeMap::new(),
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Name and id used for pseudo parameters and idempotency tokens
    pub fn identity(&self) -> StackIdentity {
        StackIdentity {
            name: self.name.clone(),
            id: self.id.clone(),
        }
    }

    /// Insert or replace a resource record
    pub fn record(&mut self, record: ResourceRecord) {
        self.resources.insert(record.logical_name.clone(), record);
    }

    /// Drop a resource record, keeping the order of the rest
    pub fn forget(&mut self, logical_name: &str) -> Option<ResourceRecord> {
        self.resources.shift_remove(logical_name)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Generate a stack id from the name and creation time
pub fn stack_id(name: &str, created: DateTime<Utc>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(created.to_rfc3339().as_bytes());
    format!("{name}-{}", &hasher.finalize().to_hex()[..12])
}

/// Resolves resource references against recorded state
impl Scope for StackState {
    fn reference(&self, name: &str) -> template::Result<Value> {
        self.resources
            .get(name)
            .map(|r| Value::String(r.external_id.clone()))
            .ok_or_else(|| template::Error::Unresolved {
                name: name.to_string(),
            })
    }

    fn attribute(&self, resource: &str, attribute: &str) -> template::Result<Value> {
        let record = self
            .resources
            .get(resource)
            .ok_or_else(|| template::Error::Unresolved {
                name: resource.to_string(),
            })?;
        record
            .attributes
            .get(attribute)
            .cloned()
            .ok_or_else(|| template::Error::Unresolved {
                name: format!("{resource}.{attribute}"),
            })
    }
}

/// Storage for stack state
pub trait StateStore: Send + Sync {
    /// Load a stack's state, `None` if it was never applied
    fn load(&self, stack: &str) -> Result<Option<StackState>>;

    /// Persist a stack's state
    fn save(&self, state: &StackState) -> Result<()>;

    /// Forget a stack entirely
    fn remove(&self, stack: &str) -> Result<()>;

    /// Names of all known stacks, sorted
    fn list(&self) -> Result<Vec<String>>;
}

/// In-process store, used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    stacks: Mutex<BTreeMap<String, StackState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, StackState>>> {
        self.stacks
            .lock()
            .map_err(|_| Error::State("state store lock poisoned".to_string()))
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, stack: &str) -> Result<Option<StackState>> {
        Ok(self.lock()?.get(stack).cloned())
    }

    fn save(&self, state: &StackState) -> Result<()> {
        self.lock()?.insert(state.name.clone(), state.clone());
        Ok(())
    }

    fn remove(&self, stack: &str) -> Result<()> {
        self.lock()?.remove(stack);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
