//! Declaration document model and loading
//!
//! A template is a JSON or YAML document with `Parameters`, `Mappings`,
//! `Conditions`, `Resources` and `Outputs` sections. Loading validates the
//! structure and parses every expression; it does not resolve anything.

use crate::error::{Error, Result};
use crate::expr::{ConditionExpr, Expr};
use crate::yaml;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Two-level lookup table: top key -> second key -> value
pub type Mapping = IndexMap<String, IndexMap<String, Value>>;

/// A parsed stack template
#[derive(Debug, Clone, Default)]
pub struct Template {
    pub description: Option<String>,
    pub parameters: IndexMap<String, Parameter>,
    pub mappings: IndexMap<String, Mapping>,
    pub conditions: IndexMap<String, ConditionExpr>,
    /// Resources in declaration order
    pub resources: IndexMap<String, ResourceDecl>,
    pub outputs: IndexMap<String, OutputDecl>,
}

/// Declared type of a parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
    String,
    Number,
    CommaDelimitedList,
    NumberList,
    /// Vendor-specific types (e.g. `AWS::EC2::KeyPair::KeyName`), validated as strings
    Named(String),
}

impl ParameterType {
    fn parse(raw: &str) -> Self {
        match raw {
            "String" => Self::String,
            "Number" => Self::Number,
            "CommaDelimitedList" => Self::CommaDelimitedList,
            "List<Number>" => Self::NumberList,
            other => Self::Named(other.to_string()),
        }
    }

    /// Whether values of this type are lists
    pub fn is_list(&self) -> bool {
        matches!(self, Self::CommaDelimitedList | Self::NumberList)
            || matches!(self, Self::Named(n) if n.starts_with("List<"))
    }
}

/// A parameter declaration
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterType,
    pub default: Option<String>,
    pub allowed_values: Vec<String>,
    pub allowed_pattern: Option<String>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub no_echo: bool,
    pub description: Option<String>,
    pub constraint_description: Option<String>,
}

/// What happens to a resource when it leaves the stack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    #[default]
    Delete,
    Retain,
}

/// A resource declaration
#[derive(Debug, Clone)]
pub struct ResourceDecl {
    pub logical_name: String,
    pub resource_type: String,
    pub properties: IndexMap<String, Expr>,
    pub depends_on: Vec<String>,
    pub condition: Option<String>,
    pub deletion_policy: DeletionPolicy,
}

/// An output declaration
#[derive(Debug, Clone)]
pub struct OutputDecl {
    pub name: String,
    pub value: Expr,
    pub description: Option<String>,
    pub export_name: Option<Expr>,
    pub condition: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTemplate {
    #[serde(rename = "AWSTemplateFormatVersion", default)]
    _format_version: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: IndexMap<String, RawParameter>,
    #[serde(default)]
    mappings: IndexMap<String, Mapping>,
    #[serde(default)]
    conditions: IndexMap<String, Value>,
    #[serde(default)]
    resources: IndexMap<String, RawResource>,
    #[serde(default)]
    outputs: IndexMap<String, RawOutput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawParameter {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    allowed_values: Vec<Value>,
    #[serde(default)]
    allowed_pattern: Option<String>,
    #[serde(default)]
    min_length: Option<usize>,
    #[serde(default)]
    max_length: Option<usize>,
    #[serde(default)]
    min_value: Option<f64>,
    #[serde(default)]
    max_value: Option<f64>,
    #[serde(default)]
    no_echo: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    constraint_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawResource {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(default)]
    properties: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    depends_on: Option<Value>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    deletion_policy: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawOutput {
    value: Value,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    export: Option<RawExport>,
    #[serde(default)]
    condition: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawExport {
    name: Value,
}

impl Template {
    /// Load a template from a file, choosing JSON or YAML by extension
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        log::debug!("Loading template {}", path.display());
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Parse a JSON document
    pub fn from_json(content: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(content)?)
    }

    /// Parse a YAML document, including short-form tags such as `!Ref`
    pub fn from_yaml(content: &str) -> Result<Self> {
        let doc: serde_yaml::Value = serde_yaml::from_str(content)?;
        Self::from_value(yaml::to_json(doc)?)
    }

    /// Build a template from an already-parsed document
    pub fn from_value(doc: Value) -> Result<Self> {
        if !doc.is_object() {
            return Err(Error::template("<root>", "template must be a map"));
        }
        let raw: RawTemplate = serde_json::from_value(doc)
            .map_err(|e| Error::template("<root>", e.to_string()))?;

        if raw.resources.is_empty() {
            return Err(Error::template(
                "Resources",
                "a template must declare at least one resource",
            ));
        }

        let mut template = Self {
            description: raw.description,
            mappings: raw.mappings,
            ..Self::default()
        };

        for (name, p) in raw.parameters {
            let param = convert_parameter(&name, p)?;
            template.parameters.insert(name, param);
        }

        for (name, body) in raw.conditions {
            let location = format!("Conditions.{name}");
            let cond = ConditionExpr::parse(&body, &location)?;
            template.conditions.insert(name, cond);
        }

        for (name, r) in raw.resources {
            let location = format!("Resources.{name}");
            if !is_logical_name(&name) {
                return Err(Error::template(location, "logical names must be alphanumeric"));
            }
            if template.parameters.contains_key(&name) {
                return Err(Error::template(
                    location,
                    "logical name collides with a parameter",
                ));
            }
            let decl = convert_resource(&name, r, &location)?;
            template.resources.insert(name, decl);
        }

        for (name, o) in raw.outputs {
            let location = format!("Outputs.{name}");
            let decl = OutputDecl {
                value: Expr::parse(&o.value, &format!("{location}.Value"))?,
                description: o.description,
                export_name: o
                    .export
                    .map(|e| Expr::parse(&e.name, &format!("{location}.Export.Name")))
                    .transpose()?,
                condition: o.condition,
                name: name.clone(),
            };
            template.outputs.insert(name, decl);
        }

        template.check_condition_names()?;
        Ok(template)
    }

    /// Make sure every condition name used anywhere is declared
    fn check_condition_names(&self) -> Result<()> {
        let known = |name: &str, location: String| {
            if self.conditions.contains_key(name) {
                Ok(())
            } else {
                Err(Error::template(
                    location,
                    format!("unknown condition {name}"),
                ))
            }
        };

        for (name, cond) in &self.conditions {
            for dep in cond.dependencies() {
                known(dep, format!("Conditions.{name}"))?;
            }
        }
        for (name, r) in &self.resources {
            if let Some(c) = &r.condition {
                known(c, format!("Resources.{name}.Condition"))?;
            }
            for (prop, expr) in &r.properties {
                for c in expr.condition_names() {
                    known(&c, format!("Resources.{name}.Properties.{prop}"))?;
                }
            }
        }
        for (name, o) in &self.outputs {
            if let Some(c) = &o.condition {
                known(c, format!("Outputs.{name}.Condition"))?;
            }
            for c in o.value.condition_names() {
                known(&c, format!("Outputs.{name}.Value"))?;
            }
        }
        Ok(())
    }
}

fn convert_parameter(name: &str, p: RawParameter) -> Result<Parameter> {
    let location = format!("Parameters.{name}");
    let as_string = |v: &Value, what: &str| -> Result<String> {
        match v {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Array(items) => items
                .iter()
                .map(|i| match i {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    _ => Err(Error::template(&location, format!("{what} must be scalar"))),
                })
                .collect::<Result<Vec<_>>>()
                .map(|parts| parts.join(",")),
            _ => Err(Error::template(&location, format!("{what} must be scalar"))),
        }
    };

    let no_echo = match &p.no_echo {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        Some(_) => return Err(Error::template(&location, "NoEcho must be a boolean")),
    };

    Ok(Parameter {
        name: name.to_string(),
        kind: ParameterType::parse(&p.kind),
        default: p.default.as_ref().map(|d| as_string(d, "Default")).transpose()?,
        allowed_values: p
            .allowed_values
            .iter()
            .map(|v| as_string(v, "AllowedValues"))
            .collect::<Result<Vec<_>>>()?,
        allowed_pattern: p.allowed_pattern,
        min_length: p.min_length,
        max_length: p.max_length,
        min_value: p.min_value,
        max_value: p.max_value,
        no_echo,
        description: p.description,
        constraint_description: p.constraint_description,
    })
}

fn convert_resource(name: &str, r: RawResource, location: &str) -> Result<ResourceDecl> {
    if r.kind.trim().is_empty() {
        return Err(Error::template(location, "resource Type must not be empty"));
    }

    let mut properties = IndexMap::new();
    for (key, value) in r.properties.unwrap_or_default() {
        let expr = Expr::parse(&value, &format!("{location}.Properties.{key}"))?;
        properties.insert(key, expr);
    }

    let depends_on = match r.depends_on {
        None => Vec::new(),
        Some(Value::String(s)) => vec![s],
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(Error::template(location, "DependsOn entries must be names")),
            })
            .collect::<Result<Vec<_>>>()?,
        Some(_) => {
            return Err(Error::template(
                location,
                "DependsOn must be a name or list of names",
            ));
        }
    };

    let deletion_policy = match r.deletion_policy.as_deref() {
        None | Some("Delete") => DeletionPolicy::Delete,
        Some("Retain") => DeletionPolicy::Retain,
        Some(other) => {
            return Err(Error::template(
                location,
                format!("unsupported DeletionPolicy {other}"),
            ));
        }
    };

    Ok(ResourceDecl {
        logical_name: name.to_string(),
        resource_type: r.kind,
        properties,
        depends_on,
        condition: r.condition,
        deletion_policy,
    })
}

fn is_logical_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vpc_template() -> Value {
        json!({
            "AWSTemplateFormatVersion": "2010-09-09",
            "Parameters": {
                "Env": {"Type": "String", "Default": "dev", "AllowedValues": ["dev", "prod"]},
                "Port": {"Type": "Number", "Default": 80}
            },
            "Mappings": {
                "RegionMap": {"us-east-1": {"Ami": "ami-123"}}
            },
            "Conditions": {
                "IsProd": {"Fn::Equals": [{"Ref": "Env"}, "prod"]}
            },
            "Resources": {
                "Vpc": {"Type": "AWS::EC2::VPC", "Properties": {"CidrBlock": "10.0.0.0/16"}},
                "Subnet": {
                    "Type": "AWS::EC2::Subnet",
                    "DependsOn": "Vpc",
                    "Properties": {"VpcId": {"Ref": "Vpc"}}
                },
                "Nat": {"Type": "AWS::EC2::NatGateway", "Condition": "IsProd", "DeletionPolicy": "Retain"}
            },
            "Outputs": {
                "VpcId": {"Value": {"Ref": "Vpc"}, "Export": {"Name": {"Fn::Sub": "${AWS::StackName}-Vpc"}}}
            }
        })
    }

    #[test]
    fn test_loads_all_sections_in_declaration_order() {
        let t = Template::from_value(vpc_template()).unwrap();
        assert_eq!(
            t.resources.keys().collect::<Vec<_>>(),
            vec!["Vpc", "Subnet", "Nat"]
        );
        assert_eq!(t.parameters["Port"].default.as_deref(), Some("80"));
        assert_eq!(t.parameters["Env"].allowed_values, vec!["dev", "prod"]);
        assert_eq!(t.resources["Subnet"].depends_on, vec!["Vpc"]);
        assert_eq!(t.resources["Nat"].deletion_policy, DeletionPolicy::Retain);
        assert!(t.outputs["VpcId"].export_name.is_some());
    }

    #[test]
    fn test_rejects_unknown_condition() {
        let mut doc = vpc_template();
        doc["Resources"]["Nat"]["Condition"] = json!("Missing");
        let err = Template::from_value(doc).unwrap_err();
        assert!(err.to_string().contains("unknown condition Missing"));
    }

    #[test]
    fn test_rejects_non_alphanumeric_logical_name() {
        let doc = json!({"Resources": {"my-vpc": {"Type": "AWS::EC2::VPC"}}});
        assert!(Template::from_value(doc).is_err());
    }

    #[test]
    fn test_rejects_empty_resources() {
        assert!(Template::from_value(json!({"Resources": {}})).is_err());
    }

    #[test]
    fn test_list_type_detection() {
        assert!(ParameterType::parse("CommaDelimitedList").is_list());
        assert!(ParameterType::parse("List<AWS::EC2::Subnet::Id>").is_list());
        assert!(!ParameterType::parse("AWS::EC2::KeyPair::KeyName").is_list());
    }

    #[test]
    fn test_loads_yaml_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vpc.yaml");
        fs::write(
            &path,
            "Resources:\n  Vpc:\n    Type: AWS::EC2::VPC\n    Properties:\n      CidrBlock: !Ref Cidr\nParameters:\n  Cidr:\n    Type: String\n",
        )
        .unwrap();
        let t = Template::load(&path).unwrap();
        assert_eq!(
            t.resources["Vpc"].properties["CidrBlock"],
            Expr::Ref("Cidr".into())
        );
    }
}
