//! Reconciliation engine
//!
//! Drives a [`Plan`] against the registered providers, persisting stack
//! state after every completed operation and emitting a [`StackEvent`] for
//! every status transition.

mod apply;
mod destroy;
mod drift;
mod invoker;

pub use drift::{AttributeDrift, DriftStatus, ResourceDrift};

use crate::context::{CancelToken, EventSink, NoEvents};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::planner::{self, Plan};
use crate::provider::ProviderRegistry;
use crate::state::{StackState, StateStore};
use crate::types::{EngineOptions, ResourceStatus, RunReport, StackEvent, StackStatus};
use invoker::Invoker;
use template::Resolved;

/// Applies plans and tears down stacks
pub struct Engine<'a> {
    registry: &'a ProviderRegistry,
    store: &'a dyn StateStore,
    events: &'a dyn EventSink,
    options: EngineOptions,
    cancel: CancelToken,
}

impl<'a> Engine<'a> {
    pub fn new(registry: &'a ProviderRegistry, store: &'a dyn StateStore) -> Self {
        Self {
            registry,
            store,
            events: &NoEvents,
            options: EngineOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Stream events to `sink`
    pub fn with_events(mut self, sink: &'a dyn EventSink) -> Self {
        self.events = sink;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Stop dispatching new work once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        self.registry
    }

    /// Build the graph and plan for a resolved template
    ///
    /// Pure: no provider is called and nothing is persisted.
    pub fn plan(&self, resolved: &Resolved, state: &StackState) -> Result<Plan> {
        let graph = Graph::build(resolved, self.registry)?;
        planner::plan(resolved, graph, state, self.registry)
    }

    /// Converge the stack to `plan`, rolling back on failure
    ///
    /// Pre-flight problems return `Err` before anything is touched; once the
    /// first provider call is made the outcome is reported in the
    /// [`RunReport`] instead.
    pub fn apply(&self, resolved: &Resolved, plan: &Plan, state: StackState) -> Result<RunReport> {
        apply::run(self, resolved, plan, state)
    }

    /// Delete every resource of the stack, dependents first
    pub fn destroy(&self, state: StackState) -> Result<RunReport> {
        destroy::run(self, state)
    }

    /// Compare recorded attributes with what the providers report
    pub fn detect_drift(&self, state: &StackState) -> Result<Vec<ResourceDrift>> {
        drift::detect(self, state)
    }

    /// Forget resources that no longer exist so the next apply recreates them
    ///
    /// Returns the logical names that were dropped.
    pub fn refresh(&self, state: &mut StackState) -> Result<Vec<String>> {
        drift::refresh(self, state)
    }

    fn invoker(&self, logical_name: &str, resource_type: &str, cancellable: bool) -> Result<Invoker> {
        let provider =
            self.registry
                .get(resource_type)
                .ok_or_else(|| Error::UnsupportedResourceType {
                    logical_name: logical_name.to_string(),
                    resource_type: resource_type.to_string(),
                })?;
        Ok(Invoker::new(
            provider,
            logical_name,
            &self.options,
            cancellable.then(|| self.cancel.clone()),
        ))
    }

    fn emit(&self, event: StackEvent) {
        self.events.on_event(&event);
    }

    fn emit_resource(
        &self,
        logical_name: &str,
        resource_type: &str,
        status: ResourceStatus,
        reason: Option<String>,
    ) {
        self.emit(StackEvent::resource(
            logical_name,
            resource_type,
            status,
            reason,
        ));
    }

    fn set_stack_status(&self, state: &mut StackState, status: StackStatus, reason: Option<String>) {
        log::info!("Stack {} {}", state.name, status);
        state.status = status;
        self.emit(StackEvent::stack(&state.name, status, reason));
    }

    fn save(&self, state: &mut StackState) -> Result<()> {
        state.touch();
        self.store.save(state)
    }
}

impl std::fmt::Debug for Engine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", self.registry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
