//! # Reconcile
//!
//! Plans and applies resolved templates against pluggable resource
//! providers.
//!
//! This crate provides:
//! - A dependency graph over realized resources with cycle detection
//! - A planner that classifies every resource as create, update, replace,
//!   delete or no change by diffing against recorded state
//! - An engine that runs independent operations in parallel, persists
//!   state after each one and rolls back in reverse order on failure
//! - Drift detection against what providers currently report
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{Engine, MemoryStateStore, ProviderRegistry, StackState};
//!
//! let store = MemoryStateStore::new();
//! let engine = Engine::new(&registry, &store);
//! let state = StackState::new("net");
//! let plan = engine.plan(&resolved, &state)?;
//! let report = engine.apply(&resolved, &plan, state)?;
//! assert!(report.is_success());
//! ```
//!
//! ## Retry Logic
//!
//! Throttling, timeouts and unavailability are retried with exponential
//! backoff per [`RetryConfig`]. Creates carry an idempotency token derived
//! from the stack id, logical name and replacement generation, so a retried
//! create never leaves a duplicate behind.

pub mod context;
pub mod engine;
pub mod error;
pub mod graph;
pub mod outputs;
pub mod planner;
pub mod provider;
pub mod retry;
mod scheduler;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

pub use context::{CancelToken, EventSink, LogEvents, NoEvents};
pub use engine::{AttributeDrift, DriftStatus, Engine, ResourceDrift};
pub use error::{Error, ErrorCategory, Result};
pub use graph::{Graph, Node};
pub use planner::{
    Action, Plan, PlanSummary, PlannedChange, PlannedValue, PropertyChange, ReplaceStrategy,
};
pub use provider::{
    Attributes, CreateRequest, Created, Properties, Provider, ProviderError, ProviderRegistry,
    UpdateBehavior, idempotency_token,
};
pub use retry::{NoCallback, RetryCallback, RetryConfig, with_retry};
pub use state::{MemoryStateStore, OutputValue, ResourceRecord, StackState, StateStore};
pub use types::{
    EngineOptions, EventStatus, Operation, ResourceStatus, RunReport, RunSummary, StackEvent,
    StackStatus,
};
