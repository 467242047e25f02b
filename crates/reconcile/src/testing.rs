//! Test doubles shared by the unit tests

use crate::context::EventSink;
use crate::provider::{
    Attributes, CreateRequest, Created, Properties, Provider, ProviderError, ProviderRegistry,
    UpdateBehavior,
};
use crate::state::ResourceRecord;
use crate::types::{ResourceStatus, StackEvent};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use template::{DeletionPolicy, Environment, Resolved, StackIdentity, Template, resolve};

#[derive(Default)]
struct Inner {
    next_id: usize,
    /// external id -> (logical name, properties)
    resources: BTreeMap<String, (String, Properties)>,
    tokens: HashMap<String, String>,
    calls: Vec<String>,
    create_calls: usize,
    fail_create: BTreeSet<String>,
    fail_update: BTreeSet<String>,
    fail_delete: BTreeSet<String>,
    throttle_creates: usize,
    lose_creates: usize,
    /// Attribute overrides simulating out-of-band edits
    tampered: HashMap<String, Attributes>,
}

/// In-memory provider with failure injection
#[derive(Default)]
pub struct FakeProvider {
    inner: Mutex<Inner>,
    delay: Option<Duration>,
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every mutating call sleeps for `delay`
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn fail_create(&self, logical_name: &str) {
        self.lock().fail_create.insert(logical_name.to_string());
    }

    pub fn fail_update(&self, logical_name: &str) {
        self.lock().fail_update.insert(logical_name.to_string());
    }

    pub fn fail_delete(&self, logical_name: &str) {
        self.lock().fail_delete.insert(logical_name.to_string());
    }

    /// The next `n` creates are throttled before doing anything
    pub fn throttle_creates(&self, n: usize) {
        self.lock().throttle_creates = n;
    }

    /// The next `n` creates succeed but report a timeout
    pub fn lose_creates(&self, n: usize) {
        self.lock().lose_creates = n;
    }

    /// Delete a resource behind the engine's back
    pub fn remove_out_of_band(&self, external_id: &str) {
        self.lock().resources.remove(external_id);
    }

    /// Change a live attribute behind the engine's back
    pub fn tamper(&self, external_id: &str, attribute: &str, value: Value) {
        self.lock()
            .tampered
            .entry(external_id.to_string())
            .or_default()
            .insert(attribute.to_string(), value);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    pub fn live_resources(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn exists(&self, external_id: &str) -> bool {
        self.lock().resources.contains_key(external_id)
    }

    /// Logical names of live resources
    pub fn live_names(&self) -> Vec<String> {
        self.lock()
            .resources
            .values()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Most calls seen in flight at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    fn attributes(id: &str, properties: &Properties) -> Attributes {
        let mut attributes = properties.clone();
        attributes.insert("Arn".into(), json!(format!("arn:test:{id}")));
        attributes.insert("Url".into(), json!(format!("https://{id}")));
        attributes
    }

    fn name_of(inner: &Inner, id: &str) -> Result<String, ProviderError> {
        inner
            .resources
            .get(id)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }
}

impl Provider for FakeProvider {
    fn create(&self, request: &CreateRequest) -> Result<Created, ProviderError> {
        self.pause();
        let mut inner = self.lock();
        inner.create_calls += 1;
        inner.calls.push(format!("create {}", request.logical_name));

        if inner.throttle_creates > 0 {
            inner.throttle_creates -= 1;
            return Err(ProviderError::Throttled("slow down".into()));
        }
        if inner.fail_create.contains(&request.logical_name) {
            return Err(ProviderError::Validation(format!(
                "{} is invalid",
                request.logical_name
            )));
        }
        if let Some(id) = inner.tokens.get(&request.idempotency_token).cloned() {
            let properties = inner.resources[&id].1.clone();
            return Ok(Created {
                attributes: Self::attributes(&id, &properties),
                external_id: id,
            });
        }

        inner.next_id += 1;
        let id = format!("thing-{}", inner.next_id);
        inner.resources.insert(
            id.clone(),
            (request.logical_name.clone(), request.properties.clone()),
        );
        inner
            .tokens
            .insert(request.idempotency_token.clone(), id.clone());

        if inner.lose_creates > 0 {
            inner.lose_creates -= 1;
            return Err(ProviderError::Timeout("response lost".into()));
        }
        Ok(Created {
            attributes: Self::attributes(&id, &request.properties),
            external_id: id,
        })
    }

    fn read(&self, external_id: &str) -> Result<Attributes, ProviderError> {
        let inner = self.lock();
        let (_, properties) = inner
            .resources
            .get(external_id)
            .ok_or_else(|| ProviderError::NotFound(external_id.to_string()))?;
        let mut attributes = Self::attributes(external_id, properties);
        if let Some(tampered) = inner.tampered.get(external_id) {
            attributes.extend(tampered.clone());
        }
        Ok(attributes)
    }

    fn update(&self, external_id: &str, properties: &Properties) -> Result<Attributes, ProviderError> {
        self.pause();
        let mut inner = self.lock();
        let name = Self::name_of(&inner, external_id)?;
        inner.calls.push(format!("update {name}"));
        if inner.fail_update.contains(&name) {
            return Err(ProviderError::Conflict(format!("{name} is busy")));
        }
        inner
            .resources
            .insert(external_id.to_string(), (name, properties.clone()));
        Ok(Self::attributes(external_id, properties))
    }

    fn delete(&self, external_id: &str) -> Result<(), ProviderError> {
        self.pause();
        let mut inner = self.lock();
        let name = Self::name_of(&inner, external_id)?;
        inner.calls.push(format!("delete {name}"));
        if inner.fail_delete.contains(&name) {
            return Err(ProviderError::Permission(format!("{name} is protected")));
        }
        inner.resources.remove(external_id);
        inner.tokens.retain(|_, id| id != external_id);
        Ok(())
    }

    fn update_behavior(&self, property: &str) -> UpdateBehavior {
        if property == "Zone" {
            UpdateBehavior::Replace
        } else {
            UpdateBehavior::InPlace
        }
    }
}

/// Registry serving `Test::Thing` and `Test::Other` from one provider
pub fn registry_for(provider: &Arc<FakeProvider>) -> ProviderRegistry {
    ProviderRegistry::new()
        .with("Test::Thing", provider.clone())
        .with("Test::Other", provider.clone())
}

/// Parse and resolve a template for stack `test`
pub fn resolve_json(doc: Value) -> Resolved {
    let template = Template::from_value(doc).unwrap();
    resolve(
        &template,
        &BTreeMap::new(),
        &Environment::default(),
        StackIdentity {
            name: "test".into(),
            id: "test-0001".into(),
        },
    )
    .unwrap()
}

/// A completed record with the given properties and dependencies
pub fn record(
    name: &str,
    resource_type: &str,
    external_id: &str,
    properties: Value,
    depends_on: &[&str],
) -> ResourceRecord {
    let properties = properties.as_object().cloned().unwrap_or_default();
    ResourceRecord {
        logical_name: name.into(),
        resource_type: resource_type.into(),
        external_id: external_id.into(),
        attributes: FakeProvider::attributes(external_id, &properties),
        properties,
        depends_on: depends_on.iter().map(|d| (*d).to_string()).collect(),
        generation: 0,
        deletion_policy: DeletionPolicy::Delete,
        status: ResourceStatus::Complete,
    }
}

/// Sink that keeps every event
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StackEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<StackEvent> {
        self.events.lock().unwrap().clone()
    }

    /// `"Name STATUS"` for every resource event
    pub fn resource_events(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| !e.is_stack())
            .map(|e| format!("{} {}", e.logical_name, e.status))
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: &StackEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
