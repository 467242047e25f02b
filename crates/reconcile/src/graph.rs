//! Resource graph builder
//!
//! Edges come from two places: references found in a resource's prepared
//! properties (`Ref`, `Fn::GetAtt`, `Fn::Sub` variables) and its explicit
//! `DependsOn` list. An edge `A -> B` means A needs B to exist first.

use crate::error::{Error, Result};
use crate::provider::ProviderRegistry;
use indexmap::{IndexMap, IndexSet};
use template::Resolved;

/// A realized resource in the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub logical_name: String,
    pub resource_type: String,
    /// Resources that must exist before this one
    pub dependencies: IndexSet<String>,
}

/// Dependency graph over realized resources, keyed by logical name
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// Nodes in declaration order
    nodes: IndexMap<String, Node>,
    /// Outputs left out because they reference excluded resources
    dropped_outputs: IndexSet<String>,
}

impl Graph {
    /// Build and validate the graph for a resolved template
    pub fn build(resolved: &Resolved, registry: &ProviderRegistry) -> Result<Self> {
        let mut nodes = IndexMap::with_capacity(resolved.resources.len());

        for (name, resource) in &resolved.resources {
            if !registry.contains(&resource.resource_type) {
                return Err(Error::UnsupportedResourceType {
                    logical_name: name.clone(),
                    resource_type: resource.resource_type.clone(),
                });
            }

            let mut dependencies = IndexSet::new();
            let referenced = resource
                .properties
                .values()
                .flat_map(|expr| expr.references())
                .map(|r| r.target().to_string());
            for target in referenced.chain(resource.depends_on.iter().cloned()) {
                if !resolved.resources.contains_key(&target) {
                    return Err(Error::UnresolvedReference {
                        from: name.clone(),
                        target,
                    });
                }
                dependencies.insert(target);
            }

            nodes.insert(
                name.clone(),
                Node {
                    logical_name: name.clone(),
                    resource_type: resource.resource_type.clone(),
                    dependencies,
                },
            );
        }

        let cycle = find_cycles(&nodes);
        if !cycle.is_empty() {
            return Err(Error::CycleDetected { resources: cycle });
        }

        let mut dropped_outputs = IndexSet::new();
        for (name, output) in &resolved.outputs {
            let mut references = output.value.references();
            if let Some(export) = &output.export_name {
                references.extend(export.references());
            }
            let targets: Vec<String> = references
                .iter()
                .map(|r| r.target().to_string())
                .collect();
            if targets.iter().any(|t| resolved.excluded.contains(t)) {
                log::debug!("Output {name} dropped: it references an excluded resource");
                dropped_outputs.insert(name.clone());
                continue;
            }
            if let Some(target) = targets.into_iter().find(|t| !nodes.contains_key(t)) {
                return Err(Error::UnresolvedReference {
                    from: format!("Outputs.{name}"),
                    target,
                });
            }
        }

        log::debug!(
            "Built graph with {} resources and {} edges",
            nodes.len(),
            nodes.values().map(|n| n.dependencies.len()).sum::<usize>()
        );
        Ok(Self {
            nodes,
            dropped_outputs,
        })
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn get(&self, logical_name: &str) -> Option<&Node> {
        self.nodes.get(logical_name)
    }

    pub fn contains(&self, logical_name: &str) -> bool {
        self.nodes.contains_key(logical_name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Position of a resource in declaration order
    pub fn declaration_index(&self, logical_name: &str) -> Option<usize> {
        self.nodes.get_index_of(logical_name)
    }

    /// Direct dependencies of a resource
    pub fn dependencies(&self, logical_name: &str) -> impl Iterator<Item = &str> {
        self.nodes
            .get(logical_name)
            .into_iter()
            .flat_map(|n| n.dependencies.iter().map(String::as_str))
    }

    /// Resources that depend directly on `logical_name`, in declaration order
    pub fn dependents(&self, logical_name: &str) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.dependencies.contains(logical_name))
            .map(|n| n.logical_name.as_str())
            .collect()
    }

    /// Whether any other resource references this one
    pub fn is_referenced(&self, logical_name: &str) -> bool {
        self.nodes
            .values()
            .any(|n| n.logical_name != logical_name && n.dependencies.contains(logical_name))
    }

    /// Whether an output was dropped for referencing an excluded resource
    pub fn is_output_dropped(&self, name: &str) -> bool {
        self.dropped_outputs.contains(name)
    }

    pub fn dropped_outputs(&self) -> impl Iterator<Item = &str> {
        self.dropped_outputs.iter().map(String::as_str)
    }
}

/// Every resource on a cycle, in declaration order
///
/// Uses Tarjan's strongly connected components: members of a component
/// with more than one node, plus nodes with a self-loop.
fn find_cycles(nodes: &IndexMap<String, Node>) -> Vec<String> {
    struct Tarjan<'a> {
        nodes: &'a IndexMap<String, Node>,
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next: usize,
        cyclic: Vec<bool>,
    }

    impl Tarjan<'_> {
        fn visit(&mut self, v: usize) {
            self.index[v] = Some(self.next);
            self.lowlink[v] = self.next;
            self.next += 1;
            self.stack.push(v);
            self.on_stack[v] = true;

            let deps: Vec<usize> = self.nodes[v]
                .dependencies
                .iter()
                .filter_map(|d| self.nodes.get_index_of(d))
                .collect();
            for w in deps {
                match self.index[w] {
                    None => {
                        self.visit(w);
                        self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                    }
                    Some(w_index) if self.on_stack[w] => {
                        self.lowlink[v] = self.lowlink[v].min(w_index);
                    }
                    Some(_) => {}
                }
            }

            if Some(self.lowlink[v]) == self.index[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                let self_loop = self.nodes[v].dependencies.contains(&self.nodes[v].logical_name);
                if component.len() > 1 || self_loop {
                    for w in component {
                        self.cyclic[w] = true;
                    }
                }
            }
        }
    }

    let n = nodes.len();
    let mut tarjan = Tarjan {
        nodes,
        index: vec![None; n],
        lowlink: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next: 0,
        cyclic: vec![false; n],
    };
    for v in 0..n {
        if tarjan.index[v].is_none() {
            tarjan.visit(v);
        }
    }

    nodes
        .keys()
        .zip(tarjan.cyclic)
        .filter(|(_, cyclic)| *cyclic)
        .map(|(name, _)| name.clone())
        .collect()
}
