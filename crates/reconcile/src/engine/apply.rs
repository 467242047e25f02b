//! Apply: converge, then roll back or clean up

use super::Engine;
use super::invoker::{Invoker, Settled};
use crate::error::{Error, Result};
use crate::outputs;
use crate::planner::{self, Action, Plan, PlannedValue, ReplaceStrategy};
use crate::provider::{Attributes, CreateRequest, Created, Properties, idempotency_token};
use crate::scheduler::{self, Coordinator, Dispatch};
use crate::state::{ResourceRecord, StackState};
use crate::types::{ResourceStatus, RunReport, RunSummary, StackStatus};
use std::collections::HashMap;
use template::{Resolved, evaluate};

pub(super) fn run(
    engine: &Engine<'_>,
    resolved: &Resolved,
    plan: &Plan,
    mut state: StackState,
) -> Result<RunReport> {
    state.parameters = resolved
        .parameters
        .iter()
        .map(|(name, p)| (name.clone(), p.display_value()))
        .collect();
    engine.set_stack_status(&mut state, StackStatus::InProgress, None);
    engine.save(&mut state)?;

    let dependencies: HashMap<String, Vec<String>> = plan
        .creation_order
        .iter()
        .map(|name| {
            let deps = plan.graph.dependencies(name).map(String::from).collect();
            (name.clone(), deps)
        })
        .collect();

    let mut apply = Apply {
        engine,
        resolved,
        plan,
        state,
        dispatched: HashMap::new(),
        undo: Vec::new(),
        superseded: Vec::new(),
        summary: RunSummary::default(),
        failure: None,
    };
    let outcome = scheduler::run(
        &plan.creation_order,
        &dependencies,
        engine.options.jobs,
        &engine.cancel,
        &mut apply,
    )?;

    if outcome.cancelled && apply.failure.is_none() {
        log::warn!("Apply of {} cancelled", apply.state.name);
        apply.failure = Some(Error::Cancelled);
    }

    if apply.failure.is_some() {
        Ok(apply.rollback())
    } else {
        Ok(apply.finish())
    }
}

/// What a worker did
struct TaskOutput {
    /// Destroy-before-create removed the old physical resource
    deleted_old: bool,
    result: Result<Applied>,
    /// Landed after the call had already failed with a timeout
    late: Option<Applied>,
}

impl TaskOutput {
    fn created(settled: Settled<Created>, deleted_old: bool) -> Self {
        Self {
            deleted_old,
            result: settled.result.map(Applied::Created),
            late: settled.late.map(Applied::Created),
        }
    }

    fn updated(settled: Settled<Attributes>) -> Self {
        Self {
            deleted_old: false,
            result: settled.result.map(Applied::Updated),
            late: settled.late.map(Applied::Updated),
        }
    }
}

enum Applied {
    Created(Created),
    Updated(Attributes),
}

/// Context kept for an in-flight resource
struct Dispatched {
    action: Action,
    properties: Properties,
    generation: u32,
}

/// Compensation for one completed operation
enum Undo {
    /// Created in this run: delete it
    Created { logical_name: String },
    /// Updated in place: restore the previous properties
    Updated { previous: ResourceRecord },
    /// Replaced: drop the new resource and bring the previous one back
    Replaced {
        previous: ResourceRecord,
        strategy: ReplaceStrategy,
    },
    /// Old resource deleted but its replacement failed: recreate it
    Removed { previous: ResourceRecord },
}

struct Apply<'e, 'a> {
    engine: &'e Engine<'a>,
    resolved: &'e Resolved,
    plan: &'e Plan,
    state: StackState,
    dispatched: HashMap<String, Dispatched>,
    undo: Vec<Undo>,
    /// Old physical resources of create-before-destroy replacements
    superseded: Vec<ResourceRecord>,
    summary: RunSummary,
    failure: Option<Error>,
}

impl Coordinator for Apply<'_, '_> {
    type Output = TaskOutput;

    fn dispatch(&mut self, name: &str) -> Dispatch<TaskOutput> {
        match self.prepare(name) {
            Ok(dispatch) => dispatch,
            Err(e) => {
                let resource_type = self.resource_type(name);
                self.engine.emit_resource(
                    name,
                    &resource_type,
                    ResourceStatus::Failed,
                    Some(e.to_string()),
                );
                self.summary.failed += 1;
                self.fail(e);
                Dispatch::Failed
            }
        }
    }

    fn complete(&mut self, name: &str, output: TaskOutput) -> bool {
        let Some(dispatched) = self.dispatched.remove(name) else {
            self.fail(Error::State(format!("completion for {name}, which was not dispatched")));
            return false;
        };
        let resource_type = self.resource_type(name);
        let previous = self.state.resources.get(name).cloned();

        let ok = match output.result {
            Ok(applied) => {
                self.count(dispatched.action);
                self.record_applied(name, &resource_type, dispatched, applied, previous);
                self.engine
                    .emit_resource(name, &resource_type, ResourceStatus::Complete, None);
                true
            }
            Err(e) => {
                if let Some(late) = output.late {
                    // Record it so rollback undoes it
                    log::warn!("{name}: {} landed after timing out", dispatched.action);
                    self.record_applied(name, &resource_type, dispatched, late, previous);
                    if let Some(record) = self.state.resources.get_mut(name) {
                        record.status = ResourceStatus::Failed;
                    }
                } else if let Some(previous) = previous {
                    if output.deleted_old {
                        self.state.forget(name);
                        self.undo.push(Undo::Removed { previous });
                    } else if let Some(record) = self.state.resources.get_mut(name) {
                        record.status = ResourceStatus::Failed;
                    }
                }
                self.engine.emit_resource(
                    name,
                    &resource_type,
                    ResourceStatus::Failed,
                    Some(e.to_string()),
                );
                self.summary.failed += 1;
                self.fail(e);
                false
            }
        };

        if let Err(e) = self.engine.save(&mut self.state) {
            self.fail(e);
            return false;
        }
        ok
    }
}

impl Apply<'_, '_> {
    /// Evaluate properties against current state and decide what to run
    fn prepare(&mut self, name: &str) -> Result<Dispatch<TaskOutput>> {
        let resource = &self.resolved.resources[name];
        let planned = self.plan.action(name).unwrap_or(Action::Create);
        if planned == Action::NoChange {
            self.summary.unchanged += 1;
            return Ok(Dispatch::Done);
        }

        let mut properties = Properties::new();
        for (key, expr) in &resource.properties {
            if let Some(value) = evaluate(expr, &self.state)? {
                properties.insert(key.clone(), value);
            }
        }

        let invoker = self
            .engine
            .invoker(name, &resource.resource_type, true)?;
        let record = self.state.resources.get(name);

        // Values unknown at plan time are known now; re-check what changed
        let action = match record {
            None => Action::Create,
            Some(record) => {
                let desired = properties
                    .iter()
                    .map(|(k, v)| (k.clone(), PlannedValue::Known(v.clone())))
                    .collect();
                let provider = self
                    .engine
                    .registry
                    .get(&resource.resource_type)
                    .ok_or_else(|| Error::UnsupportedResourceType {
                        logical_name: name.to_string(),
                        resource_type: resource.resource_type.clone(),
                    })?;
                let changes = planner::diff_properties(record, &desired, provider.as_ref());
                planner::classify(
                    record,
                    &resource.resource_type,
                    &changes,
                    planner::is_referenced(&self.plan.graph, &self.state, name),
                )
            }
        };
        if action == Action::NoChange {
            log::debug!("{name} turned out unchanged");
            self.summary.unchanged += 1;
            return Ok(Dispatch::Done);
        }

        let generation = match (action, record) {
            (Action::Replace(_), Some(r)) => r.generation + 1,
            (_, Some(r)) => r.generation,
            (_, None) => 0,
        };
        let old_id = record.map(|r| r.external_id.clone());

        if let Some(record) = self.state.resources.get_mut(name) {
            record.status = ResourceStatus::InProgress;
        }
        let reason = match action {
            Action::Create => None,
            other => Some(other.to_string()),
        };
        self.engine.emit_resource(
            name,
            &resource.resource_type,
            ResourceStatus::InProgress,
            reason,
        );
        self.dispatched.insert(
            name.to_string(),
            Dispatched {
                action,
                properties: properties.clone(),
                generation,
            },
        );

        let request = CreateRequest {
            logical_name: name.to_string(),
            resource_type: resource.resource_type.clone(),
            properties: properties.clone(),
            idempotency_token: idempotency_token(&self.state.id, name, generation),
        };
        let task: Box<dyn FnOnce() -> TaskOutput + Send> = match (action, old_id) {
            (Action::Update, Some(id)) => {
                Box::new(move || TaskOutput::updated(invoker.update(&id, properties)))
            }
            (Action::Replace(ReplaceStrategy::DestroyBeforeCreate), Some(id)) => {
                Box::new(move || destroy_then_create(&invoker, &id, request))
            }
            _ => Box::new(move || TaskOutput::created(invoker.create(request), false)),
        };
        Ok(Dispatch::Spawn(task))
    }

    /// Record what a provider did and how to undo it
    fn record_applied(
        &mut self,
        name: &str,
        resource_type: &str,
        dispatched: Dispatched,
        applied: Applied,
        previous: Option<ResourceRecord>,
    ) {
        let resource = &self.resolved.resources[name];
        let (external_id, attributes) = match applied {
            Applied::Created(c) => (c.external_id, c.attributes),
            Applied::Updated(attributes) => (
                previous
                    .as_ref()
                    .map(|p| p.external_id.clone())
                    .unwrap_or_default(),
                attributes,
            ),
        };
        self.state.record(ResourceRecord {
            logical_name: name.to_string(),
            resource_type: resource_type.to_string(),
            external_id,
            properties: dispatched.properties,
            attributes,
            depends_on: self.plan.graph.dependencies(name).map(String::from).collect(),
            generation: dispatched.generation,
            deletion_policy: resource.deletion_policy,
            status: ResourceStatus::Complete,
        });

        match (dispatched.action, previous) {
            (Action::Update, Some(previous)) => {
                self.undo.push(Undo::Updated { previous });
            }
            (Action::Replace(strategy), Some(previous)) => {
                if strategy == ReplaceStrategy::CreateBeforeDestroy {
                    self.superseded.push(previous.clone());
                }
                self.undo.push(Undo::Replaced { previous, strategy });
            }
            _ => {
                self.undo.push(Undo::Created {
                    logical_name: name.to_string(),
                });
            }
        }
    }

    fn count(&mut self, action: Action) {
        match action {
            Action::Update => self.summary.updated += 1,
            Action::Replace(_) => self.summary.replaced += 1,
            _ => self.summary.created += 1,
        }
    }

    fn resource_type(&self, name: &str) -> String {
        self.resolved
            .resources
            .get(name)
            .map(|r| r.resource_type.clone())
            .unwrap_or_default()
    }

    fn fail(&mut self, error: Error) {
        log::error!("{error}");
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    /// Undo every completed operation in reverse completion order
    fn rollback(mut self) -> RunReport {
        let reason = self.failure.as_ref().map(ToString::to_string);
        self.engine
            .set_stack_status(&mut self.state, StackStatus::RollingBack, reason);
        self.persist();

        let mut errors = Vec::new();
        let mut stuck = Vec::new();
        while let Some(undo) = self.undo.pop() {
            let name = match &undo {
                Undo::Created { logical_name } => logical_name.clone(),
                Undo::Updated { previous }
                | Undo::Replaced { previous, .. }
                | Undo::Removed { previous } => previous.logical_name.clone(),
            };
            let resource_type = self
                .state
                .resources
                .get(&name)
                .map(|r| r.resource_type.clone())
                .or_else(|| match &undo {
                    Undo::Created { .. } => None,
                    Undo::Updated { previous }
                    | Undo::Replaced { previous, .. }
                    | Undo::Removed { previous } => Some(previous.resource_type.clone()),
                })
                .unwrap_or_default();

            match self.compensate(undo) {
                Ok(()) => {
                    self.summary.rolled_back += 1;
                    self.engine.emit_resource(
                        &name,
                        &resource_type,
                        ResourceStatus::RolledBack,
                        None,
                    );
                }
                Err(e) => {
                    log::error!("Rollback of {name} failed: {e}");
                    if let Some(record) = self.state.resources.get_mut(&name) {
                        record.status = ResourceStatus::Failed;
                    }
                    self.engine.emit_resource(
                        &name,
                        &resource_type,
                        ResourceStatus::Failed,
                        Some(format!("rollback failed: {e}")),
                    );
                    stuck.push(name);
                    errors.push(e);
                }
            }
            self.persist();
        }

        let status = if errors.is_empty() {
            for record in self.state.resources.values_mut() {
                record.status = ResourceStatus::Complete;
            }
            StackStatus::RolledBack
        } else {
            StackStatus::Failed
        };
        self.engine.set_stack_status(&mut self.state, status, None);
        self.persist();

        let mut rollback_errors = Vec::new();
        if !errors.is_empty() {
            rollback_errors.push(Error::RollbackFailed {
                resources: stuck,
                message: errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            });
            rollback_errors.extend(errors);
        }
        RunReport {
            status,
            summary: self.summary,
            error: self.failure,
            rollback_errors,
            cleanup_errors: Vec::new(),
        }
    }

    fn compensate(&mut self, undo: Undo) -> Result<()> {
        match undo {
            Undo::Created { logical_name } => {
                let Some(record) = self.state.resources.get(&logical_name).cloned() else {
                    return Ok(());
                };
                self.rollback_invoker(&record)?.delete(&record.external_id)?;
                self.state.forget(&logical_name);
            }
            Undo::Updated { previous } => {
                let current = self
                    .state
                    .resources
                    .get(&previous.logical_name)
                    .map_or_else(|| previous.external_id.clone(), |r| r.external_id.clone());
                let attributes = self
                    .rollback_invoker(&previous)?
                    .update(&current, previous.properties.clone())
                    .accept_late()?;
                self.state.record(ResourceRecord {
                    attributes,
                    ..previous
                });
            }
            Undo::Replaced {
                previous,
                strategy: ReplaceStrategy::CreateBeforeDestroy,
            } => {
                if let Some(new) = self.state.resources.get(&previous.logical_name).cloned() {
                    self.rollback_invoker(&new)?.delete(&new.external_id)?;
                }
                self.superseded
                    .retain(|r| r.external_id != previous.external_id);
                self.state.record(previous);
            }
            Undo::Replaced {
                previous,
                strategy: ReplaceStrategy::DestroyBeforeCreate,
            } => {
                if let Some(new) = self.state.resources.get(&previous.logical_name).cloned() {
                    self.rollback_invoker(&new)?.delete(&new.external_id)?;
                    self.state.forget(&new.logical_name);
                }
                self.recreate(previous)?;
            }
            Undo::Removed { previous } => self.recreate(previous)?,
        }
        Ok(())
    }

    /// Bring back a resource whose physical instance was deleted in this run
    fn recreate(&mut self, previous: ResourceRecord) -> Result<()> {
        // Skip the generation a failed replacement may have used
        let generation = previous.generation + 2;
        let created = self.rollback_invoker(&previous)?.create(CreateRequest {
            logical_name: previous.logical_name.clone(),
            resource_type: previous.resource_type.clone(),
            properties: previous.properties.clone(),
            idempotency_token: idempotency_token(
                &self.state.id,
                &previous.logical_name,
                generation,
            ),
        })
        .accept_late()?;
        self.state.record(ResourceRecord {
            external_id: created.external_id,
            attributes: created.attributes,
            generation,
            status: ResourceStatus::Complete,
            ..previous
        });
        Ok(())
    }

    fn rollback_invoker(&self, record: &ResourceRecord) -> Result<Invoker> {
        // Rollback ignores cancellation so it is not cut short
        self.engine
            .invoker(&record.logical_name, &record.resource_type, false)
    }

    /// Project outputs, then delete removed and superseded resources
    ///
    /// Outputs that cannot be evaluated fail the run and roll it back, before
    /// anything is deleted.
    fn finish(mut self) -> RunReport {
        let plan = self.plan;
        let outputs = match outputs::project(self.resolved, &plan.graph, &self.state) {
            Ok(values) => values,
            Err(e) => {
                self.fail(e);
                return self.rollback();
            }
        };
        let mut cleanup_errors = Vec::new();

        for name in &plan.removal_order {
            let Some(record) = self.state.resources.get(name).cloned() else {
                continue;
            };
            if plan.action(name) == Some(Action::Retain) {
                self.state.forget(name);
                self.summary.retained += 1;
                self.engine.emit_resource(
                    name,
                    &record.resource_type,
                    ResourceStatus::Retained,
                    Some("removed from template".to_string()),
                );
                self.persist();
                continue;
            }
            match self
                .rollback_invoker(&record)
                .and_then(|inv| inv.delete(&record.external_id))
            {
                Ok(()) => {
                    self.state.forget(name);
                    self.summary.deleted += 1;
                    self.engine.emit_resource(
                        name,
                        &record.resource_type,
                        ResourceStatus::Deleted,
                        Some("removed from template".to_string()),
                    );
                }
                Err(e) => {
                    log::warn!("Cleanup of {name} failed: {e}");
                    if let Some(r) = self.state.resources.get_mut(name) {
                        r.status = ResourceStatus::Failed;
                    }
                    cleanup_errors.push(e);
                }
            }
            self.persist();
        }

        // Superseded resources go dependents first
        let position = |r: &ResourceRecord| {
            plan.creation_order
                .iter()
                .position(|n| *n == r.logical_name)
                .unwrap_or(0)
        };
        let mut superseded = std::mem::take(&mut self.superseded);
        superseded.sort_by_key(|r| std::cmp::Reverse(position(r)));
        for old in superseded {
            match self
                .rollback_invoker(&old)
                .and_then(|inv| inv.delete(&old.external_id))
            {
                Ok(()) => self.engine.emit_resource(
                    &old.logical_name,
                    &old.resource_type,
                    ResourceStatus::Deleted,
                    Some(format!("replaced; deleted old {}", old.external_id)),
                ),
                Err(e) => {
                    log::warn!("Deleting replaced {} failed: {e}", old.external_id);
                    cleanup_errors.push(e);
                }
            }
        }

        self.state.outputs = outputs;
        let status = StackStatus::Complete;
        self.engine.set_stack_status(&mut self.state, status, None);
        let error = self.engine.save(&mut self.state).err();

        RunReport {
            status,
            summary: self.summary,
            error,
            rollback_errors: Vec::new(),
            cleanup_errors,
        }
    }

    /// Save state, logging failures; used where the run must go on
    fn persist(&mut self) {
        if let Err(e) = self.engine.save(&mut self.state) {
            log::error!("Failed to persist state for {}: {e}", self.state.name);
        }
    }
}

fn destroy_then_create(invoker: &Invoker, old_id: &str, request: CreateRequest) -> TaskOutput {
    if let Err(e) = invoker.delete(old_id) {
        return TaskOutput {
            deleted_old: false,
            result: Err(e),
            late: None,
        };
    }
    TaskOutput::created(invoker.create(request), true)
}
