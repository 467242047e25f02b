//! Topological planner
//!
//! Orders realized resources so every dependency comes first and
//! classifies each one against recorded state. Planning never calls a
//! provider except to ask for its update policy.

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::provider::{Provider, ProviderRegistry, UpdateBehavior};
use crate::state::{ResourceRecord, StackState};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use template::{DeletionPolicy, Expr, Resolved, Scope, evaluate};

/// Order of operations when a resource must be replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReplaceStrategy {
    /// New resource first, old one deleted during cleanup
    CreateBeforeDestroy,
    /// Old resource deleted, then the new one created
    DestroyBeforeCreate,
}

/// What will happen to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    Create,
    NoChange,
    Update,
    Replace(ReplaceStrategy),
    Delete,
    /// Removed from the stack but left in place
    Retain,
}

impl Action {
    /// Whether the action calls a provider or changes state
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoChange)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::NoChange => "no change",
            Self::Update => "update",
            Self::Replace(ReplaceStrategy::CreateBeforeDestroy) => "replace (create before destroy)",
            Self::Replace(ReplaceStrategy::DestroyBeforeCreate) => "replace (destroy before create)",
            Self::Delete => "delete",
            Self::Retain => "retain",
        })
    }
}

/// A property value as far as it is known at plan time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlannedValue {
    Known(Value),
    /// Depends on a resource that is created, replaced or updated in this run
    Unknown,
}

/// One changed property
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyChange {
    pub property: String,
    pub before: Option<Value>,
    pub after: Option<PlannedValue>,
    pub requires_replacement: bool,
}

/// The plan for one resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedChange {
    pub logical_name: String,
    pub resource_type: String,
    pub action: Action,
    /// Changed properties; empty for creates and deletes
    pub changes: Vec<PropertyChange>,
}

/// Counts per action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub retain: usize,
    pub unchanged: usize,
}

impl PlanSummary {
    pub fn total_changes(&self) -> usize {
        self.create + self.update + self.replace + self.delete + self.retain
    }
}

/// A complete plan for one run
#[derive(Debug, Clone)]
pub struct Plan {
    pub graph: Graph,
    /// Realized resources, dependencies first
    pub creation_order: Vec<String>,
    /// Recorded resources no longer in the template, dependents first
    pub removal_order: Vec<String>,
    /// Every planned change: realized resources in creation order, then
    /// removed resources in removal order
    pub changes: IndexMap<String, PlannedChange>,
}

impl Plan {
    pub fn change(&self, logical_name: &str) -> Option<&PlannedChange> {
        self.changes.get(logical_name)
    }

    pub fn action(&self, logical_name: &str) -> Option<Action> {
        self.changes.get(logical_name).map(|c| c.action)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in self.changes.values() {
            match change.action {
                Action::Create => summary.create += 1,
                Action::NoChange => summary.unchanged += 1,
                Action::Update => summary.update += 1,
                Action::Replace(_) => summary.replace += 1,
                Action::Delete => summary.delete += 1,
                Action::Retain => summary.retain += 1,
            }
        }
        summary
    }

    pub fn has_changes(&self) -> bool {
        self.changes.values().any(|c| c.action.is_change())
    }
}

/// Creation order: Kahn's algorithm, ties broken by declaration order
pub fn topological_order(graph: &Graph) -> Result<Vec<String>> {
    let names: Vec<&str> = graph.nodes().map(|n| n.logical_name.as_str()).collect();
    let mut remaining: Vec<usize> = graph.nodes().map(|n| n.dependencies.len()).collect();
    let mut ready: BTreeSet<usize> = remaining
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(names.len());
    while let Some(i) = ready.pop_first() {
        order.push(names[i].to_string());
        for dependent in graph.dependents(names[i]) {
            if let Some(j) = graph.declaration_index(dependent) {
                remaining[j] -= 1;
                if remaining[j] == 0 {
                    ready.insert(j);
                }
            }
        }
    }

    if order.len() != names.len() {
        let resources = names
            .iter()
            .enumerate()
            .filter(|(i, _)| remaining[*i] > 0)
            .map(|(_, n)| (*n).to_string())
            .collect();
        return Err(Error::CycleDetected { resources });
    }
    Ok(order)
}

/// Deletion order for recorded resources: the reverse of their creation
/// order, computed from the dependencies recorded in state
///
/// Dependencies on resources outside `names` are ignored.
pub fn removal_order(state: &StackState, names: &IndexSet<String>) -> Vec<String> {
    let members: Vec<&ResourceRecord> = state
        .resources
        .values()
        .filter(|r| names.contains(&r.logical_name))
        .collect();
    let index: HashMap<&str, usize> = members
        .iter()
        .enumerate()
        .map(|(i, r)| (r.logical_name.as_str(), i))
        .collect();

    let deps: Vec<Vec<usize>> = members
        .iter()
        .map(|r| {
            r.depends_on
                .iter()
                .filter_map(|d| index.get(d.as_str()).copied())
                .collect()
        })
        .collect();
    let mut remaining: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = (0..members.len()).filter(|i| remaining[*i] == 0).collect();

    let mut order = Vec::with_capacity(members.len());
    let mut done = vec![false; members.len()];
    while let Some(i) = ready.pop_first() {
        done[i] = true;
        order.push(members[i].logical_name.clone());
        for (j, d) in deps.iter().enumerate() {
            if d.contains(&i) {
                remaining[j] -= 1;
                if remaining[j] == 0 {
                    ready.insert(j);
                }
            }
        }
    }
    // Recorded cycles cannot come from a valid apply; keep them in state order
    order.extend(
        members
            .iter()
            .enumerate()
            .filter(|(i, _)| !done[*i])
            .map(|(_, r)| r.logical_name.clone()),
    );
    order.reverse();
    order
}

/// Whether anything points at `name` while the stack converges
///
/// Resources removed from the template stay live until cleanup, so their
/// recorded dependencies count too.
pub(crate) fn is_referenced(graph: &Graph, state: &StackState, name: &str) -> bool {
    graph.is_referenced(name)
        || state.resources.values().any(|r| {
            !graph.contains(&r.logical_name) && r.depends_on.iter().any(|d| d == name)
        })
}

/// Build the plan for applying `resolved` on top of `state`
pub fn plan(
    resolved: &Resolved,
    graph: Graph,
    state: &StackState,
    registry: &ProviderRegistry,
) -> Result<Plan> {
    let creation_order = topological_order(&graph)?;
    let mut pending: HashMap<String, Pending> = HashMap::new();
    let mut changes = IndexMap::new();

    for name in &creation_order {
        let resource = &resolved.resources[name.as_str()];
        let provider = registry
            .get(&resource.resource_type)
            .ok_or_else(|| Error::UnsupportedResourceType {
                logical_name: name.clone(),
                resource_type: resource.resource_type.clone(),
            })?;

        let change = match state.resources.get(name) {
            None => PlannedChange {
                logical_name: name.clone(),
                resource_type: resource.resource_type.clone(),
                action: Action::Create,
                changes: Vec::new(),
            },
            Some(record) => {
                let scope = PlanScope {
                    state,
                    pending: &pending,
                };
                let desired = plan_properties(&resource.properties, &scope)?;
                let property_changes = diff_properties(record, &desired, provider.as_ref());
                let action = classify(
                    record,
                    &resource.resource_type,
                    &property_changes,
                    is_referenced(&graph, state, name),
                );
                PlannedChange {
                    logical_name: name.clone(),
                    resource_type: resource.resource_type.clone(),
                    action,
                    changes: property_changes,
                }
            }
        };

        match change.action {
            Action::Create | Action::Replace(_) => {
                pending.insert(name.clone(), Pending::New);
            }
            Action::Update => {
                pending.insert(name.clone(), Pending::Updated);
            }
            _ => {}
        }
        log::debug!("Planned {name}: {}", change.action);
        changes.insert(name.clone(), change);
    }

    let removed: IndexSet<String> = state
        .resources
        .keys()
        .filter(|name| !graph.contains(name))
        .cloned()
        .collect();
    let removal_order = removal_order(state, &removed);
    for name in &removal_order {
        let record = &state.resources[name.as_str()];
        let action = match record.deletion_policy {
            DeletionPolicy::Delete => Action::Delete,
            DeletionPolicy::Retain => Action::Retain,
        };
        changes.insert(
            name.clone(),
            PlannedChange {
                logical_name: name.clone(),
                resource_type: record.resource_type.clone(),
                action,
                changes: Vec::new(),
            },
        );
    }

    Ok(Plan {
        graph,
        creation_order,
        removal_order,
        changes,
    })
}

/// Compare desired properties with what was last applied
pub(crate) fn diff_properties(
    record: &ResourceRecord,
    desired: &IndexMap<String, PlannedValue>,
    provider: &dyn Provider,
) -> Vec<PropertyChange> {
    let mut keys: IndexSet<&str> = desired.keys().map(String::as_str).collect();
    keys.extend(record.properties.keys().map(String::as_str));

    keys.into_iter()
        .filter_map(|key| {
            let before = record.properties.get(key);
            let after = desired.get(key);
            let unchanged = match (before, after) {
                (Some(b), Some(PlannedValue::Known(a))) => a == b,
                (None, None) => true,
                _ => false,
            };
            (!unchanged).then(|| PropertyChange {
                property: key.to_string(),
                before: before.cloned(),
                after: after.cloned(),
                requires_replacement: provider.update_behavior(key) == UpdateBehavior::Replace,
            })
        })
        .collect()
}

/// Decide between no-op, in-place update and replacement
pub(crate) fn classify(
    record: &ResourceRecord,
    resource_type: &str,
    changes: &[PropertyChange],
    referenced: bool,
) -> Action {
    let replace = record.resource_type != resource_type
        || changes.iter().any(|c| c.requires_replacement);
    if replace {
        Action::Replace(if referenced {
            ReplaceStrategy::CreateBeforeDestroy
        } else {
            ReplaceStrategy::DestroyBeforeCreate
        })
    } else if changes.is_empty() {
        Action::NoChange
    } else {
        Action::Update
    }
}

/// Evaluate prepared properties, marking values that are not known yet
pub(crate) fn plan_properties(
    properties: &IndexMap<String, Expr>,
    scope: &dyn Scope,
) -> Result<IndexMap<String, PlannedValue>> {
    let mut out = IndexMap::with_capacity(properties.len());
    for (key, expr) in properties {
        match evaluate(expr, scope) {
            Ok(Some(value)) => {
                out.insert(key.clone(), PlannedValue::Known(value));
            }
            Ok(None) => {}
            Err(e) if e.is_unknown() => {
                out.insert(key.clone(), PlannedValue::Unknown);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    /// Gets a new physical id in this run
    New,
    /// Keeps its id, attributes may change
    Updated,
}

/// Scope over recorded state that reports values changing in this run as
/// unknown
struct PlanScope<'a> {
    state: &'a StackState,
    pending: &'a HashMap<String, Pending>,
}

impl Scope for PlanScope<'_> {
    fn reference(&self, name: &str) -> template::Result<Value> {
        if self.pending.get(name) == Some(&Pending::New) {
            return Err(template::Error::Unknown {
                reference: name.to_string(),
            });
        }
        self.state.reference(name)
    }

    fn attribute(&self, resource: &str, attribute: &str) -> template::Result<Value> {
        if self.pending.contains_key(resource) {
            return Err(template::Error::Unknown {
                reference: format!("{resource}.{attribute}"),
            });
        }
        self.state.attribute(resource, attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProvider, record, registry_for, resolve_json};
    use crate::types::ResourceStatus;
    use serde_json::json;

    fn make_plan(doc: serde_json::Value, state: &StackState) -> Plan {
        let provider = FakeProvider::new();
        let registry = registry_for(&provider);
        let resolved = resolve_json(doc);
        let graph = Graph::build(&resolved, &registry).unwrap();
        plan(&resolved, graph, state, &registry).unwrap()
    }

    fn two_resources() -> serde_json::Value {
        json!({
            "Resources": {
                "B": {"Type": "Test::Thing", "Properties": {"Parent": {"Ref": "A"}}},
                "A": {"Type": "Test::Thing", "Properties": {"Name": "a"}}
            }
        })
    }

    #[test]
    fn test_dependencies_come_first() {
        let plan = make_plan(two_resources(), &StackState::new("s"));
        assert_eq!(plan.creation_order, vec!["A", "B"]);
        assert_eq!(plan.action("A"), Some(Action::Create));
        assert_eq!(plan.action("B"), Some(Action::Create));
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let plan = make_plan(
            json!({
                "Resources": {
                    "Z": {"Type": "Test::Thing"},
                    "Y": {"Type": "Test::Thing", "DependsOn": "X"},
                    "X": {"Type": "Test::Thing"},
                    "W": {"Type": "Test::Thing"}
                }
            }),
            &StackState::new("s"),
        );
        assert_eq!(plan.creation_order, vec!["Z", "X", "Y", "W"]);
    }

    #[test]
    fn test_every_resource_after_its_dependencies() {
        let plan = make_plan(
            json!({
                "Resources": {
                    "App": {"Type": "Test::Thing", "DependsOn": ["Db", "Cache"]},
                    "Cache": {"Type": "Test::Thing", "Properties": {"Net": {"Ref": "Net"}}},
                    "Db": {"Type": "Test::Thing", "Properties": {"Net": {"Ref": "Net"}}},
                    "Net": {"Type": "Test::Thing"},
                    "Dns": {"Type": "Test::Thing", "Properties": {"Target": {"Fn::GetAtt": ["App", "Url"]}}}
                }
            }),
            &StackState::new("s"),
        );
        let position = |n: &str| plan.creation_order.iter().position(|x| x == n).unwrap();
        for node in plan.graph.nodes() {
            for dep in &node.dependencies {
                assert!(position(&node.logical_name) > position(dep));
            }
        }
    }

    #[test]
    fn test_unchanged_resource_is_no_change() {
        let mut state = StackState::new("s");
        state.record(record("A", "Test::Thing", "id-a", json!({"Name": "a"}), &[]));
        state.record(record("B", "Test::Thing", "id-b", json!({"Parent": "id-a"}), &["A"]));
        let plan = make_plan(two_resources(), &state);
        assert_eq!(plan.action("A"), Some(Action::NoChange));
        assert_eq!(plan.action("B"), Some(Action::NoChange));
        assert!(!plan.has_changes());
    }

    #[test]
    fn test_in_place_update() {
        let mut state = StackState::new("s");
        state.record(record("A", "Test::Thing", "id-a", json!({"Name": "old"}), &[]));
        let plan = make_plan(
            json!({"Resources": {"A": {"Type": "Test::Thing", "Properties": {"Name": "new"}}}}),
            &state,
        );
        let change = plan.change("A").unwrap();
        assert_eq!(change.action, Action::Update);
        assert_eq!(change.changes.len(), 1);
        assert_eq!(change.changes[0].before, Some(json!("old")));
        assert_eq!(
            change.changes[0].after,
            Some(PlannedValue::Known(json!("new")))
        );
    }

    #[test]
    fn test_replacement_strategy_depends_on_references() {
        let mut state = StackState::new("s");
        state.record(record("A", "Test::Thing", "id-a", json!({"Name": "a", "Zone": "1"}), &[]));
        state.record(record("B", "Test::Thing", "id-b", json!({"Parent": "id-a"}), &["A"]));
        let doc = json!({
            "Resources": {
                "B": {"Type": "Test::Thing", "Properties": {"Parent": {"Ref": "A"}}},
                "A": {"Type": "Test::Thing", "Properties": {"Name": "a", "Zone": "2"}}
            }
        });
        let plan = make_plan(doc, &state);
        assert_eq!(
            plan.action("A"),
            Some(Action::Replace(ReplaceStrategy::CreateBeforeDestroy))
        );
        // B's Ref to A is unknown until A is replaced
        let b = plan.change("B").unwrap();
        assert_eq!(b.action, Action::Update);
        assert_eq!(b.changes[0].after, Some(PlannedValue::Unknown));
    }

    #[test]
    fn test_removed_dependent_keeps_original_alive() {
        let mut state = StackState::new("s");
        state.record(record("A", "Test::Thing", "id-a", json!({"Zone": "1"}), &[]));
        state.record(record("Old", "Test::Thing", "id-old", json!({"Parent": "id-a"}), &["A"]));
        let doc = json!({
            "Resources": {
                "A": {"Type": "Test::Thing", "Properties": {"Zone": "2"}}
            }
        });
        let plan = make_plan(doc, &state);
        assert_eq!(
            plan.action("A"),
            Some(Action::Replace(ReplaceStrategy::CreateBeforeDestroy))
        );
        assert_eq!(plan.action("Old"), Some(Action::Delete));
    }

    #[test]
    fn test_unknown_replacement_property_forces_replace() {
        let mut state = StackState::new("s");
        state.record(record("A", "Test::Thing", "id-a", json!({"Name": "a", "Zone": "1"}), &[]));
        state.record(record("B", "Test::Thing", "id-b", json!({"Zone": "id-a"}), &["A"]));
        let doc = json!({
            "Resources": {
                "A": {"Type": "Test::Thing", "Properties": {"Name": "a", "Zone": "2"}},
                "B": {"Type": "Test::Thing", "Properties": {"Zone": {"Ref": "A"}}}
            }
        });
        let plan = make_plan(doc, &state);
        assert_eq!(
            plan.action("B"),
            Some(Action::Replace(ReplaceStrategy::DestroyBeforeCreate))
        );
    }

    #[test]
    fn test_type_change_replaces() {
        let mut state = StackState::new("s");
        state.record(record("A", "Test::Other", "id-a", json!({}), &[]));
        let plan = make_plan(json!({"Resources": {"A": {"Type": "Test::Thing"}}}), &state);
        assert_eq!(
            plan.action("A"),
            Some(Action::Replace(ReplaceStrategy::DestroyBeforeCreate))
        );
    }

    #[test]
    fn test_removed_resources_deleted_in_reverse_order() {
        let mut state = StackState::new("s");
        state.record(record("Keep", "Test::Thing", "id-k", json!({}), &[]));
        state.record(record("A", "Test::Thing", "id-a", json!({}), &[]));
        state.record(record("B", "Test::Thing", "id-b", json!({}), &["A"]));
        let mut retained = record("C", "Test::Thing", "id-c", json!({}), &["B"]);
        retained.deletion_policy = DeletionPolicy::Retain;
        retained.status = ResourceStatus::Complete;
        state.record(retained);

        let plan = make_plan(json!({"Resources": {"Keep": {"Type": "Test::Thing"}}}), &state);
        assert_eq!(plan.removal_order, vec!["C", "B", "A"]);
        assert_eq!(plan.action("C"), Some(Action::Retain));
        assert_eq!(plan.action("A"), Some(Action::Delete));
        let summary = plan.summary();
        assert_eq!(summary.delete, 2);
        assert_eq!(summary.retain, 1);
        assert_eq!(summary.unchanged, 1);
    }

    #[test]
    fn test_excluded_resource_never_planned() {
        let plan = make_plan(
            json!({
                "Conditions": {"Never": {"Fn::Equals": ["x", "y"]}},
                "Resources": {
                    "A": {"Type": "Test::Thing"},
                    "Gated": {"Type": "Test::Thing", "Condition": "Never"}
                }
            }),
            &StackState::new("s"),
        );
        assert!(plan.change("Gated").is_none());
        assert_eq!(plan.creation_order, vec!["A"]);
    }
}
