//! Stack teardown

use super::Engine;
use crate::error::{Error, Result};
use crate::planner;
use crate::scheduler::{self, Coordinator, Dispatch};
use crate::state::StackState;
use crate::types::{ResourceStatus, RunReport, RunSummary, StackStatus};
use indexmap::IndexSet;
use std::collections::HashMap;
use template::DeletionPolicy;

pub(super) fn run(engine: &Engine<'_>, mut state: StackState) -> Result<RunReport> {
    let names: IndexSet<String> = state.resources.keys().cloned().collect();
    let order = planner::removal_order(&state, &names);

    // A resource can go once everything that depended on it is gone
    let mut blockers: HashMap<String, Vec<String>> = HashMap::new();
    for record in state.resources.values() {
        for dep in &record.depends_on {
            blockers
                .entry(dep.clone())
                .or_default()
                .push(record.logical_name.clone());
        }
    }

    engine.set_stack_status(&mut state, StackStatus::InProgress, Some("destroy".to_string()));
    engine.save(&mut state)?;

    let mut destroy = Destroy {
        engine,
        state,
        summary: RunSummary::default(),
        failure: None,
    };
    let outcome = scheduler::run(
        &order,
        &blockers,
        engine.options.jobs,
        &engine.cancel,
        &mut destroy,
    )?;
    if outcome.cancelled && destroy.failure.is_none() {
        destroy.failure = Some(Error::Cancelled);
    }

    let Destroy {
        mut state,
        summary,
        failure,
        ..
    } = destroy;

    if let Some(error) = failure {
        engine.set_stack_status(&mut state, StackStatus::Failed, Some(error.to_string()));
        engine.save(&mut state)?;
        return Ok(RunReport {
            status: StackStatus::Failed,
            summary,
            error: Some(error),
            ..RunReport::default()
        });
    }

    engine.set_stack_status(&mut state, StackStatus::Complete, Some("destroyed".to_string()));
    engine.store.remove(&state.name)?;
    Ok(RunReport {
        status: StackStatus::Complete,
        summary,
        ..RunReport::default()
    })
}

struct Destroy<'e, 'a> {
    engine: &'e Engine<'a>,
    state: StackState,
    summary: RunSummary,
    failure: Option<Error>,
}

impl Coordinator for Destroy<'_, '_> {
    type Output = Result<()>;

    fn dispatch(&mut self, name: &str) -> Dispatch<Result<()>> {
        let Some(record) = self.state.resources.get_mut(name) else {
            return Dispatch::Done;
        };
        let resource_type = record.resource_type.clone();

        if record.deletion_policy == DeletionPolicy::Retain {
            self.state.forget(name);
            self.summary.retained += 1;
            self.engine.emit_resource(
                name,
                &resource_type,
                ResourceStatus::Retained,
                Some("deletion policy is Retain".to_string()),
            );
            return Dispatch::Done;
        }

        record.status = ResourceStatus::InProgress;
        let external_id = record.external_id.clone();
        match self.engine.invoker(name, &resource_type, true) {
            Ok(invoker) => {
                self.engine
                    .emit_resource(name, &resource_type, ResourceStatus::InProgress, None);
                Dispatch::Spawn(Box::new(move || invoker.delete(&external_id)))
            }
            Err(e) => {
                self.failed(name, &resource_type, e);
                Dispatch::Failed
            }
        }
    }

    fn complete(&mut self, name: &str, output: Result<()>) -> bool {
        let resource_type = self
            .state
            .resources
            .get(name)
            .map(|r| r.resource_type.clone())
            .unwrap_or_default();
        let ok = match output {
            Ok(()) => {
                self.state.forget(name);
                self.summary.deleted += 1;
                self.engine
                    .emit_resource(name, &resource_type, ResourceStatus::Deleted, None);
                true
            }
            Err(e) => {
                self.failed(name, &resource_type, e);
                false
            }
        };
        if let Err(e) = self.engine.save(&mut self.state) {
            log::error!("Failed to persist state for {}: {e}", self.state.name);
            self.failure.get_or_insert(e);
            return false;
        }
        ok
    }
}

impl Destroy<'_, '_> {
    fn failed(&mut self, name: &str, resource_type: &str, error: Error) {
        log::error!("{error}");
        if let Some(record) = self.state.resources.get_mut(name) {
            record.status = ResourceStatus::Failed;
        }
        self.engine.emit_resource(
            name,
            resource_type,
            ResourceStatus::Failed,
            Some(error.to_string()),
        );
        self.summary.failed += 1;
        self.failure.get_or_insert(error);
    }
}
