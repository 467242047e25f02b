//! Output projection
//!
//! Outputs are evaluated against stack state once every resource has
//! converged. Outputs that reference an excluded resource are skipped.

use crate::error::Result;
use crate::graph::Graph;
use crate::state::{OutputValue, StackState};
use indexmap::IndexMap;
use serde_json::Value;
use template::{Resolved, evaluate};

/// Evaluate every realized output
pub fn project(
    resolved: &Resolved,
    graph: &Graph,
    state: &StackState,
) -> Result<IndexMap<String, OutputValue>> {
    let mut values = IndexMap::with_capacity(resolved.outputs.len());
    for (name, output) in &resolved.outputs {
        if graph.is_output_dropped(name) {
            log::debug!("Skipping output {name}: references an excluded resource");
            continue;
        }
        let value = evaluate(&output.value, state)?.ok_or_else(|| {
            template::Error::template(format!("Outputs.{name}.Value"), "evaluates to no value")
        })?;
        let export_name = match &output.export_name {
            Some(expr) => match evaluate(expr, state)? {
                Some(Value::String(s)) => Some(s),
                _ => {
                    return Err(template::Error::template(
                        format!("Outputs.{name}.Export.Name"),
                        "export name must be a string",
                    )
                    .into());
                }
            },
            None => None,
        };
        values.insert(
            name.clone(),
            OutputValue {
                value,
                description: output.description.clone(),
                export_name,
            },
        );
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProvider, record, registry_for, resolve_json};
    use serde_json::json;

    fn setup(doc: Value) -> (Resolved, Graph) {
        let provider = FakeProvider::new();
        let resolved = resolve_json(doc);
        let graph = Graph::build(&resolved, &registry_for(&provider)).unwrap();
        (resolved, graph)
    }

    #[test]
    fn test_outputs_read_state() {
        let (resolved, graph) = setup(json!({
            "Resources": {"Site": {"Type": "Test::Thing"}},
            "Outputs": {
                "Id": {"Value": {"Ref": "Site"}, "Description": "site id"},
                "Url": {
                    "Value": {"Fn::GetAtt": ["Site", "Url"]},
                    "Export": {"Name": {"Fn::Sub": "${AWS::StackName}-url"}}
                }
            }
        }));
        let mut state = StackState::new("test");
        let mut site = record("Site", "Test::Thing", "thing-1", json!({}), &[]);
        site.attributes.insert("Url".into(), json!("https://thing-1"));
        state.record(site);

        let outputs = project(&resolved, &graph, &state).unwrap();
        assert_eq!(outputs["Id"].value, json!("thing-1"));
        assert_eq!(outputs["Id"].description.as_deref(), Some("site id"));
        assert_eq!(outputs["Url"].value, json!("https://thing-1"));
        assert_eq!(outputs["Url"].export_name.as_deref(), Some("test-url"));
    }

    #[test]
    fn test_output_of_excluded_resource_is_skipped() {
        let (resolved, graph) = setup(json!({
            "Conditions": {"Off": {"Fn::Equals": ["a", "b"]}},
            "Resources": {
                "Gated": {"Type": "Test::Thing", "Condition": "Off"},
                "A": {"Type": "Test::Thing"}
            },
            "Outputs": {
                "Gated": {"Value": {"Ref": "Gated"}},
                "A": {"Value": {"Ref": "A"}}
            }
        }));
        let mut state = StackState::new("test");
        state.record(record("A", "Test::Thing", "thing-1", json!({}), &[]));
        let outputs = project(&resolved, &graph, &state).unwrap();
        assert_eq!(outputs.keys().collect::<Vec<_>>(), vec!["A"]);
    }
}
