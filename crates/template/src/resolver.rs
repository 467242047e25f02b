//! Value resolver
//!
//! Turns a [`Template`] plus parameter overrides into a [`Resolved`] stack
//! description: parameters validated, conditions evaluated, mappings looked
//! up, and every expression folded so that only resource references remain
//! open. Everything that can fail before touching a provider fails here.

use crate::document::{DeletionPolicy, Template};
use crate::error::{Error, Result};
use crate::eval::{self, Scope};
use crate::expr::{ConditionExpr, Expr, NO_VALUE, SubPart, is_pseudo};
use crate::functions;
use crate::parameters::{ResolvedParameter, resolve_parameters};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Facts about the target environment exposed as pseudo parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub region: String,
    pub account_id: String,
    pub partition: String,
    pub url_suffix: String,
    /// Zones returned by `Fn::GetAZs`; derived from the region when empty
    pub availability_zones: Vec<String>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            account_id: "123456789012".to_string(),
            partition: "aws".to_string(),
            url_suffix: "amazonaws.com".to_string(),
            availability_zones: Vec::new(),
        }
    }
}

impl Environment {
    /// Availability zones, falling back to `<region>a`, `<region>b`, `<region>c`
    pub fn zones(&self) -> Vec<String> {
        if self.availability_zones.is_empty() {
            ["a", "b", "c"]
                .iter()
                .map(|s| format!("{}{s}", self.region))
                .collect()
        } else {
            self.availability_zones.clone()
        }
    }
}

/// Name and stable id of the stack being resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackIdentity {
    pub name: String,
    pub id: String,
}

/// A realized resource with folded properties
#[derive(Debug, Clone)]
pub struct PreparedResource {
    pub logical_name: String,
    pub resource_type: String,
    /// Only resource references remain open in these expressions
    pub properties: IndexMap<String, Expr>,
    pub depends_on: Vec<String>,
    pub deletion_policy: DeletionPolicy,
}

/// A realized output with a folded value expression
#[derive(Debug, Clone)]
pub struct PreparedOutput {
    pub name: String,
    pub value: Expr,
    pub description: Option<String>,
    pub export_name: Option<Expr>,
}

/// The outcome of resolution
#[derive(Debug, Clone)]
pub struct Resolved {
    pub stack: StackIdentity,
    pub parameters: IndexMap<String, ResolvedParameter>,
    pub conditions: IndexMap<String, bool>,
    /// Resources whose condition holds, in declaration order
    pub resources: IndexMap<String, PreparedResource>,
    /// Resources gated off by a false condition
    pub excluded: IndexSet<String>,
    /// Outputs whose condition holds
    pub outputs: IndexMap<String, PreparedOutput>,
}

/// Resolve a template for one run
pub fn resolve(
    template: &Template,
    overrides: &BTreeMap<String, String>,
    env: &Environment,
    stack: StackIdentity,
) -> Result<Resolved> {
    let parameters = resolve_parameters(&template.parameters, overrides)?;
    let mut resolver = Resolver {
        template,
        parameters,
        conditions: IndexMap::new(),
        env,
        stack,
    };
    resolver.evaluate_conditions()?;

    let mut resources = IndexMap::new();
    let mut excluded = IndexSet::new();
    for (name, decl) in &template.resources {
        if let Some(cond) = &decl.condition
            && !resolver.conditions[cond.as_str()]
        {
            log::debug!("Resource {name} excluded by condition {cond}");
            excluded.insert(name.clone());
            continue;
        }

        let mut properties = IndexMap::with_capacity(decl.properties.len());
        for (key, expr) in &decl.properties {
            let folded = resolver
                .fold(expr)
                .map_err(|e| locate(e, &format!("Resources.{name}.Properties.{key}")))?;
            if !folded.is_no_value() {
                properties.insert(key.clone(), folded);
            }
        }

        resources.insert(
            name.clone(),
            PreparedResource {
                logical_name: name.clone(),
                resource_type: decl.resource_type.clone(),
                properties,
                depends_on: decl.depends_on.clone(),
                deletion_policy: decl.deletion_policy,
            },
        );
    }

    let mut outputs = IndexMap::new();
    for (name, decl) in &template.outputs {
        if let Some(cond) = &decl.condition
            && !resolver.conditions[cond.as_str()]
        {
            continue;
        }
        let location = format!("Outputs.{name}");
        let value = resolver.fold(&decl.value).map_err(|e| locate(e, &location))?;
        let export_name = decl
            .export_name
            .as_ref()
            .map(|e| resolver.fold(e))
            .transpose()
            .map_err(|e| locate(e, &location))?;
        outputs.insert(
            name.clone(),
            PreparedOutput {
                name: name.clone(),
                value,
                description: decl.description.clone(),
                export_name,
            },
        );
    }

    Ok(Resolved {
        stack: resolver.stack,
        parameters: resolver.parameters,
        conditions: resolver.conditions,
        resources,
        excluded,
        outputs,
    })
}

/// Attach a location to errors that have none of their own
fn locate(err: Error, location: &str) -> Error {
    match err {
        Error::Evaluation { function, message } => {
            Error::template(location, format!("{function}: {message}"))
        }
        other => other,
    }
}

struct Resolver<'a> {
    template: &'a Template,
    parameters: IndexMap<String, ResolvedParameter>,
    conditions: IndexMap<String, bool>,
    env: &'a Environment,
    stack: StackIdentity,
}

impl Resolver<'_> {
    /// Evaluate every condition, detecting reference cycles
    fn evaluate_conditions(&mut self) -> Result<()> {
        let names: Vec<String> = self.template.conditions.keys().cloned().collect();
        let mut visiting: Vec<String> = Vec::new();
        for name in names {
            self.evaluate_condition(&name, &mut visiting)?;
        }
        Ok(())
    }

    fn evaluate_condition(&mut self, name: &str, visiting: &mut Vec<String>) -> Result<bool> {
        if let Some(value) = self.conditions.get(name) {
            return Ok(*value);
        }
        if let Some(pos) = visiting.iter().position(|n| n == name) {
            let mut cycle = visiting[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(Error::ConditionCycle { conditions: cycle });
        }

        let expr = self.template.conditions.get(name).cloned().ok_or_else(|| {
            Error::template("Conditions", format!("unknown condition {name}"))
        })?;

        visiting.push(name.to_string());
        for dep in expr.dependencies() {
            self.evaluate_condition(dep, visiting)?;
        }
        visiting.pop();

        let value = self
            .condition_value(&expr)
            .map_err(|e| match e {
                Error::Unresolved { name: target } => Error::template(
                    format!("Conditions.{name}"),
                    format!("conditions may only reference parameters, not {target}"),
                ),
                other => locate(other, &format!("Conditions.{name}")),
            })?;
        log::debug!("Condition {name} = {value}");
        self.conditions.insert(name.to_string(), value);
        Ok(value)
    }

    fn condition_value(&self, expr: &ConditionExpr) -> Result<bool> {
        Ok(match expr {
            ConditionExpr::Equals(a, b) => {
                let a = eval::evaluate(a, self)?.unwrap_or(Value::Null);
                let b = eval::evaluate(b, self)?.unwrap_or(Value::Null);
                functions::values_equal(&a, &b)
            }
            ConditionExpr::And(items) => {
                for item in items {
                    if !self.condition_value(item)? {
                        return Ok(false);
                    }
                }
                true
            }
            ConditionExpr::Or(items) => {
                for item in items {
                    if self.condition_value(item)? {
                        return Ok(true);
                    }
                }
                false
            }
            ConditionExpr::Not(inner) => !self.condition_value(inner)?,
            ConditionExpr::Condition(name) => self.condition(name)?,
        })
    }

    /// Fold everything that does not depend on a resource into literals
    fn fold(&self, expr: &Expr) -> Result<Expr> {
        Ok(match expr {
            Expr::Literal(_) | Expr::GetAtt { .. } => expr.clone(),
            Expr::List(items) => Expr::List(
                items
                    .iter()
                    .map(|e| self.fold(e))
                    .filter(|e| !matches!(e, Ok(folded) if folded.is_no_value()))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Expr::Object(fields) => {
                let mut out = IndexMap::with_capacity(fields.len());
                for (k, v) in fields {
                    let folded = self.fold(v)?;
                    if !folded.is_no_value() {
                        out.insert(k.clone(), folded);
                    }
                }
                Expr::Object(out)
            }
            Expr::Ref(name) if name == NO_VALUE => expr.clone(),
            Expr::Ref(name) => match self.parameter_or_pseudo(name) {
                Some(value) => Expr::from_value(&value),
                None => expr.clone(),
            },
            Expr::FindInMap { map, top, second } => {
                let key = |e: &Expr| -> Result<String> {
                    let folded = self.fold(e)?;
                    let value = folded.as_value().ok_or_else(|| {
                        Error::evaluation(
                            "Fn::FindInMap",
                            "keys must not depend on resources",
                        )
                    })?;
                    functions::scalar_string(&value, "Fn::FindInMap")
                };
                let (map, top, second) = (key(map)?, key(top)?, key(second)?);
                Expr::from_value(&self.mapping(&map, &top, &second)?)
            }
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                if self.condition(condition)? {
                    self.fold(then)?
                } else {
                    self.fold(otherwise)?
                }
            }
            Expr::Join { separator, items } => self.close(Expr::Join {
                separator: separator.clone(),
                items: Box::new(self.fold(items)?),
            })?,
            Expr::Sub { parts, vars } => self.fold_sub(parts, vars)?,
            Expr::Select { index, list } => self.close(Expr::Select {
                index: Box::new(self.fold(index)?),
                list: Box::new(self.fold(list)?),
            })?,
            Expr::Split { separator, source } => self.close(Expr::Split {
                separator: separator.clone(),
                source: Box::new(self.fold(source)?),
            })?,
            Expr::Base64(inner) => self.close(Expr::Base64(Box::new(self.fold(inner)?)))?,
            Expr::GetAzs(region) => {
                let folded = self.fold(region)?;
                if folded.as_value().is_none() {
                    return Err(Error::evaluation(
                        "Fn::GetAZs",
                        "region must not depend on resources",
                    ));
                }
                self.close(Expr::GetAzs(Box::new(folded)))?
            }
            Expr::Cidr { block, count, bits } => self.close(Expr::Cidr {
                block: Box::new(self.fold(block)?),
                count: Box::new(self.fold(count)?),
                bits: Box::new(self.fold(bits)?),
            })?,
        })
    }

    /// Evaluate a function node whose arguments are all literal
    fn close(&self, node: Expr) -> Result<Expr> {
        let closed = match &node {
            Expr::Join { items, .. } => items.as_value().is_some(),
            Expr::Select { index, list } => index.as_value().is_some() && list.as_value().is_some(),
            Expr::Split { source, .. } => source.as_value().is_some(),
            Expr::Base64(inner) | Expr::GetAzs(inner) => inner.as_value().is_some(),
            Expr::Cidr { block, count, bits } => {
                block.as_value().is_some() && count.as_value().is_some() && bits.as_value().is_some()
            }
            _ => false,
        };
        if !closed {
            return Ok(node);
        }
        let value = eval::evaluate(&node, self)?.unwrap_or(Value::Null);
        Ok(Expr::from_value(&value))
    }

    fn fold_sub(&self, parts: &[SubPart], vars: &IndexMap<String, Expr>) -> Result<Expr> {
        let mut folded_vars = IndexMap::new();
        for (name, value) in vars {
            folded_vars.insert(name.clone(), self.fold(value)?);
        }

        let mut out_parts: Vec<SubPart> = Vec::with_capacity(parts.len());
        let mut open_vars = IndexMap::new();
        let push_text = |out: &mut Vec<SubPart>, text: String| {
            if let Some(SubPart::Text(prev)) = out.last_mut() {
                prev.push_str(&text);
            } else {
                out.push(SubPart::Text(text));
            }
        };

        for part in parts {
            match part {
                SubPart::Text(text) => push_text(&mut out_parts, text.clone()),
                SubPart::Var(var) => {
                    let literal = match folded_vars.get(var) {
                        Some(bound) => match bound.as_value() {
                            Some(v) => Some(v),
                            None => {
                                open_vars.insert(var.clone(), bound.clone());
                                None
                            }
                        },
                        None => self.parameter_or_pseudo(var),
                    };
                    match literal {
                        Some(value) => {
                            push_text(&mut out_parts, functions::scalar_string(&value, "Fn::Sub")?);
                        }
                        None => out_parts.push(SubPart::Var(var.clone())),
                    }
                }
            }
        }

        if out_parts.iter().all(|p| matches!(p, SubPart::Text(_))) {
            let text: String = out_parts
                .into_iter()
                .map(|p| match p {
                    SubPart::Text(t) => t,
                    SubPart::Var(_) => String::new(),
                })
                .collect();
            return Ok(Expr::Literal(Value::String(text)));
        }
        Ok(Expr::Sub {
            parts: out_parts,
            vars: open_vars,
        })
    }

    fn parameter_or_pseudo(&self, name: &str) -> Option<Value> {
        if let Some(p) = self.parameters.get(name) {
            return Some(p.value.clone());
        }
        if !is_pseudo(name) {
            return None;
        }
        let value = match name {
            "AWS::Region" => self.env.region.clone(),
            "AWS::AccountId" => self.env.account_id.clone(),
            "AWS::Partition" => self.env.partition.clone(),
            "AWS::URLSuffix" => self.env.url_suffix.clone(),
            "AWS::StackName" => self.stack.name.clone(),
            "AWS::StackId" => self.stack.id.clone(),
            _ => return None,
        };
        Some(Value::String(value))
    }
}

impl Scope for Resolver<'_> {
    fn reference(&self, name: &str) -> Result<Value> {
        self.parameter_or_pseudo(name).ok_or_else(|| Error::Unresolved {
            name: name.to_string(),
        })
    }

    fn attribute(&self, resource: &str, attribute: &str) -> Result<Value> {
        Err(Error::Unresolved {
            name: format!("{resource}.{attribute}"),
        })
    }

    fn condition(&self, name: &str) -> Result<bool> {
        self.conditions.get(name).copied().ok_or_else(|| {
            Error::template("Conditions", format!("condition {name} is not evaluated"))
        })
    }

    fn mapping(&self, map: &str, top: &str, second: &str) -> Result<Value> {
        let table = self.template.mappings.get(map).ok_or_else(|| {
            Error::template("Mappings", format!("unknown mapping {map}"))
        })?;
        let row = table.get(top).ok_or_else(|| Error::MappingKeyNotFound {
            map: map.to_string(),
            key: top.to_string(),
        })?;
        row.get(second)
            .cloned()
            .ok_or_else(|| Error::MappingKeyNotFound {
                map: map.to_string(),
                key: format!("{top}.{second}"),
            })
    }

    fn availability_zones(&self, region: &str) -> Result<Vec<String>> {
        if region.is_empty() || region == self.env.region {
            Ok(self.env.zones())
        } else {
            Err(Error::evaluation(
                "Fn::GetAZs",
                format!("no availability zones known for region {region}"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stack() -> StackIdentity {
        StackIdentity {
            name: "net".into(),
            id: "stack-abc".into(),
        }
    }

    fn run(doc: Value, overrides: &[(&str, &str)]) -> Result<Resolved> {
        let template = Template::from_value(doc).unwrap();
        let overrides = overrides
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        resolve(&template, &overrides, &Environment::default(), stack())
    }

    fn network() -> Value {
        json!({
            "Parameters": {
                "Env": {"Type": "String", "Default": "dev", "AllowedValues": ["dev", "prod"]}
            },
            "Mappings": {
                "RegionMap": {"us-east-1": {"Ami": "ami-east"}, "eu-west-1": {"Ami": "ami-west"}}
            },
            "Conditions": {
                "IsProd": {"Fn::Equals": [{"Ref": "Env"}, "prod"]},
                "IsDev": {"Fn::Not": [{"Condition": "IsProd"}]}
            },
            "Resources": {
                "Vpc": {"Type": "AWS::EC2::VPC", "Properties": {
                    "CidrBlock": "10.0.0.0/16",
                    "Tags": [{"Key": "Name", "Value": {"Fn::Sub": "${AWS::StackName}-${Env}"}}]
                }},
                "Subnet": {"Type": "AWS::EC2::Subnet", "Properties": {
                    "VpcId": {"Ref": "Vpc"},
                    "AvailabilityZone": {"Fn::Select": [1, {"Fn::GetAZs": ""}]},
                    "CidrBlock": {"Fn::Select": [0, {"Fn::Cidr": ["10.0.0.0/16", 2, 8]}]}
                }},
                "Nat": {"Type": "AWS::EC2::NatGateway", "Condition": "IsProd", "Properties": {
                    "SubnetId": {"Ref": "Subnet"}
                }},
                "Server": {"Type": "AWS::EC2::Instance", "Properties": {
                    "ImageId": {"Fn::FindInMap": ["RegionMap", {"Ref": "AWS::Region"}, "Ami"]},
                    "Gateway": {"Fn::If": ["IsProd", {"Ref": "Nat"}, {"Ref": "AWS::NoValue"}]}
                }}
            },
            "Outputs": {
                "NatId": {"Condition": "IsProd", "Value": {"Ref": "Nat"}},
                "VpcId": {"Value": {"Ref": "Vpc"}}
            }
        })
    }

    #[test]
    fn test_folds_parameters_pseudo_and_functions() {
        let r = run(network(), &[]).unwrap();
        let vpc = &r.resources["Vpc"].properties;
        assert_eq!(
            vpc["Tags"].as_value().unwrap(),
            json!([{"Key": "Name", "Value": "net-dev"}])
        );
        let subnet = &r.resources["Subnet"].properties;
        assert_eq!(subnet["AvailabilityZone"], Expr::Literal(json!("us-east-1b")));
        assert_eq!(subnet["CidrBlock"], Expr::Literal(json!("10.0.0.0/24")));
        assert_eq!(subnet["VpcId"], Expr::Ref("Vpc".into()));
    }

    #[test]
    fn test_false_condition_excludes_resource_output_and_branch() {
        let r = run(network(), &[]).unwrap();
        assert!(!r.resources.contains_key("Nat"));
        assert!(r.excluded.contains("Nat"));
        assert!(!r.outputs.contains_key("NatId"));
        assert!(r.outputs.contains_key("VpcId"));
        assert!(!r.resources["Server"].properties.contains_key("Gateway"));
        assert!(r.conditions["IsDev"]);
    }

    #[test]
    fn test_true_condition_keeps_resource() {
        let r = run(network(), &[("Env", "prod")]).unwrap();
        assert!(r.resources.contains_key("Nat"));
        assert_eq!(
            r.resources["Server"].properties["Gateway"],
            Expr::Ref("Nat".into())
        );
    }

    #[test]
    fn test_mapping_lookup_by_region() {
        let r = run(network(), &[]).unwrap();
        assert_eq!(
            r.resources["Server"].properties["ImageId"],
            Expr::Literal(json!("ami-east"))
        );
    }

    #[test]
    fn test_missing_region_in_mapping_fails_preflight() {
        let template = Template::from_value(network()).unwrap();
        let env = Environment {
            region: "ap-south-1".into(),
            ..Environment::default()
        };
        let err = resolve(&template, &BTreeMap::new(), &env, stack()).unwrap_err();
        assert!(
            matches!(err, Error::MappingKeyNotFound { ref map, ref key } if map == "RegionMap" && key == "ap-south-1")
        );
    }

    #[test]
    fn test_condition_cycle_is_reported() {
        let doc = json!({
            "Conditions": {
                "A": {"Fn::Not": [{"Condition": "B"}]},
                "B": {"Fn::Not": [{"Condition": "A"}]}
            },
            "Resources": {"X": {"Type": "T"}}
        });
        let err = run(doc, &[]).unwrap_err();
        match err {
            Error::ConditionCycle { conditions } => {
                assert_eq!(conditions, vec!["A", "B", "A"]);
            }
            other => panic!("expected ConditionCycle, got {other:?}"),
        }
    }

    #[test]
    fn test_conditions_cannot_reference_resources() {
        let doc = json!({
            "Conditions": {"HasVpc": {"Fn::Equals": [{"Ref": "Vpc"}, "x"]}},
            "Resources": {"Vpc": {"Type": "AWS::EC2::VPC"}}
        });
        let err = run(doc, &[]).unwrap_err();
        assert!(err.to_string().contains("may only reference parameters"));
    }

    #[test]
    fn test_find_in_map_keys_cannot_reference_resources() {
        let doc = json!({
            "Mappings": {"M": {"a": {"b": "c"}}},
            "Resources": {
                "Vpc": {"Type": "AWS::EC2::VPC"},
                "X": {"Type": "T", "Properties": {"P": {"Fn::FindInMap": ["M", {"Ref": "Vpc"}, "b"]}}}
            }
        });
        let err = run(doc, &[]).unwrap_err();
        assert!(err.to_string().contains("Resources.X.Properties.P"));
    }

    #[test]
    fn test_sub_keeps_resource_vars_open() {
        let doc = json!({
            "Parameters": {"Env": {"Type": "String", "Default": "dev"}},
            "Resources": {
                "Alb": {"Type": "AWS::ElasticLoadBalancingV2::LoadBalancer"},
                "X": {"Type": "T", "Properties": {"Url": {"Fn::Sub": "http://${Alb.DNSName}/${Env}"}}}
            }
        });
        let r = run(doc, &[]).unwrap();
        assert_eq!(
            r.resources["X"].properties["Url"],
            Expr::Sub {
                parts: vec![
                    SubPart::Text("http://".into()),
                    SubPart::Var("Alb.DNSName".into()),
                    SubPart::Text("/dev".into()),
                ],
                vars: IndexMap::new(),
            }
        );
    }
}
