//! Provider adapter
//!
//! A [`Provider`] performs create/read/update/delete for one resource type
//! against some control plane. Providers are registered per type in a
//! [`ProviderRegistry`]; the engine never talks to a control plane any
//! other way.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Fully evaluated resource properties
pub type Properties = Map<String, Value>;

/// Attributes reported by a provider (the targets of `Fn::GetAtt`)
pub type Attributes = Map<String, Value>;

/// How a provider applies a change to a property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateBehavior {
    /// The physical resource is modified
    InPlace,
    /// A new physical resource is required
    Replace,
}

/// Errors reported by a provider
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl ProviderError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Throttled(_) | Self::Timeout(_) | Self::Unavailable(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Input to [`Provider::create`]
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub logical_name: String,
    pub resource_type: String,
    pub properties: Properties,
    /// Stable per (stack, logical name, generation); a repeated token must
    /// return the resource created by the first call
    pub idempotency_token: String,
}

/// A physical resource returned by [`Provider::create`]
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    pub external_id: String,
    pub attributes: Attributes,
}

/// Create/read/update/delete for one resource type
pub trait Provider: Send + Sync {
    /// Create a physical resource, or return the one already created for
    /// this request's idempotency token
    fn create(&self, request: &CreateRequest) -> Result<Created, ProviderError>;

    /// Current attributes of a physical resource
    fn read(&self, external_id: &str) -> Result<Attributes, ProviderError>;

    /// Modify a physical resource in place
    fn update(&self, external_id: &str, properties: &Properties)
    -> Result<Attributes, ProviderError>;

    /// Delete a physical resource
    fn delete(&self, external_id: &str) -> Result<(), ProviderError>;

    /// Whether changing `property` can be done in place
    fn update_behavior(&self, property: &str) -> UpdateBehavior;
}

/// Providers keyed by resource type
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for a resource type, replacing any previous one
    pub fn register(&mut self, resource_type: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(resource_type.into(), provider);
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, resource_type: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.register(resource_type, provider);
        self
    }

    pub fn get(&self, resource_type: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(resource_type).cloned()
    }

    pub fn contains(&self, resource_type: &str) -> bool {
        self.providers.contains_key(resource_type)
    }

    /// Registered resource types, sorted
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.providers.keys()).finish()
    }
}

/// Idempotency token for creating `logical_name` at `generation`
pub fn idempotency_token(stack_id: &str, logical_name: &str, generation: u32) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(stack_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(logical_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(&generation.to_le_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}

/// A provider call that outlived its timeout and is still running
pub struct Abandoned<T>(mpsc::Receiver<Result<T, ProviderError>>);

impl<T> Abandoned<T> {
    /// Block until the call finishes
    pub fn join(self) -> Result<T, ProviderError> {
        self.0.recv().unwrap_or_else(|_| {
            Err(ProviderError::Unavailable(
                "provider call panicked".to_string(),
            ))
        })
    }
}

/// Run a provider call on its own thread, giving up after `timeout`
///
/// A call that times out keeps running in the background and is pushed onto
/// `abandoned`, so the caller can wait for it before acting on the failure.
/// The caller sees [`ProviderError::Timeout`], which is transient, so the
/// idempotency token makes a retried create safe.
pub fn call_with_timeout<T, F>(
    timeout: Option<Duration>,
    abandoned: &mut Vec<Abandoned<T>>,
    op: F,
) -> Result<T, ProviderError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProviderError> + Send + 'static,
{
    let Some(timeout) = timeout else {
        return op();
    };

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(op());
    });
    let outcome = rx.recv_timeout(timeout);
    match outcome {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            abandoned.push(Abandoned(rx));
            Err(ProviderError::Timeout(format!(
                "no response within {}s",
                timeout.as_secs_f64()
            )))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(ProviderError::Unavailable(
            "provider call panicked".to_string(),
        )),
    }
}
