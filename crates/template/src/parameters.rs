//! Parameter validation
//!
//! Overrides arrive as strings (from the command line or a parameter file);
//! each is checked against the declared type and constraints.

use crate::document::{Parameter, ParameterType};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// A validated parameter value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedParameter {
    pub name: String,
    /// String for scalar types, list of strings for list types
    pub value: Value,
    pub no_echo: bool,
}

impl ResolvedParameter {
    /// Text suitable for display, masking `NoEcho` values
    pub fn display_value(&self) -> String {
        if self.no_echo {
            return "****".to_string();
        }
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(","),
            other => other.to_string(),
        }
    }
}

/// Validate overrides against declarations and fill in defaults
pub fn resolve_parameters(
    declared: &IndexMap<String, Parameter>,
    overrides: &BTreeMap<String, String>,
) -> Result<IndexMap<String, ResolvedParameter>> {
    if let Some(unknown) = overrides.keys().find(|k| !declared.contains_key(*k)) {
        return Err(Error::InvalidParameter {
            name: unknown.clone(),
            reason: "not declared in the template".to_string(),
        });
    }

    let mut resolved = IndexMap::with_capacity(declared.len());
    for (name, param) in declared {
        let raw = overrides
            .get(name)
            .or(param.default.as_ref())
            .ok_or_else(|| Error::InvalidParameter {
                name: name.clone(),
                reason: "no value supplied and no default declared".to_string(),
            })?;
        let value = validate(param, raw)?;
        log::debug!(
            "Parameter {} = {}",
            name,
            if param.no_echo { "****" } else { raw.as_str() }
        );
        resolved.insert(
            name.clone(),
            ResolvedParameter {
                name: name.clone(),
                value,
                no_echo: param.no_echo,
            },
        );
    }
    Ok(resolved)
}

fn validate(param: &Parameter, raw: &str) -> Result<Value> {
    let reject = |reason: String| Error::InvalidParameter {
        name: param.name.clone(),
        reason: param
            .constraint_description
            .clone()
            .map_or(reason.clone(), |c| format!("{reason} ({c})")),
    };

    let pattern = param
        .allowed_pattern
        .as_deref()
        .map(|p| {
            Regex::new(&format!("^(?:{p})$"))
                .map_err(|e| reject(format!("invalid AllowedPattern: {e}")))
        })
        .transpose()?;

    let items: Vec<&str> = if param.kind.is_list() {
        raw.split(',').map(str::trim).collect()
    } else {
        vec![raw]
    };

    for &item in &items {
        if !param.allowed_values.is_empty() && !param.allowed_values.iter().any(|a| a == item) {
            return Err(reject(format!(
                "{item:?} is not one of [{}]",
                param.allowed_values.join(", ")
            )));
        }
        if let Some(re) = &pattern
            && !re.is_match(item)
        {
            return Err(reject(format!("{item:?} does not match the allowed pattern")));
        }
        if matches!(param.kind, ParameterType::Number | ParameterType::NumberList) {
            let n: f64 = item
                .parse()
                .map_err(|_| reject(format!("{item:?} is not a number")))?;
            if param.min_value.is_some_and(|min| n < min) {
                return Err(reject(format!("{n} is below the minimum")));
            }
            if param.max_value.is_some_and(|max| n > max) {
                return Err(reject(format!("{n} is above the maximum")));
            }
        }
    }

    if !param.kind.is_list() {
        let len = raw.chars().count();
        if param.min_length.is_some_and(|min| len < min) {
            return Err(reject(format!("length {len} is below the minimum")));
        }
        if param.max_length.is_some_and(|max| len > max) {
            return Err(reject(format!("length {len} is above the maximum")));
        }
        return Ok(Value::String(raw.to_string()));
    }

    Ok(Value::Array(
        items
            .into_iter()
            .map(|s| Value::String(s.to_string()))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Template;
    use serde_json::json;

    fn params() -> IndexMap<String, Parameter> {
        Template::from_value(json!({
            "Parameters": {
                "Env": {"Type": "String", "Default": "dev", "AllowedValues": ["dev", "prod"]},
                "Count": {"Type": "Number", "Default": "2", "MinValue": 1, "MaxValue": 4},
                "Key": {"Type": "AWS::EC2::KeyPair::KeyName", "AllowedPattern": "[a-z]+",
                        "ConstraintDescription": "lowercase letters only"},
                "Zones": {"Type": "CommaDelimitedList", "Default": "a, b"},
                "Secret": {"Type": "String", "NoEcho": true, "Default": "hunter2"}
            },
            "Resources": {"X": {"Type": "T"}}
        }))
        .unwrap()
        .parameters
    }

    fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_and_overrides() {
        let resolved = resolve_parameters(&params(), &overrides(&[("Key", "abc")])).unwrap();
        assert_eq!(resolved["Env"].value, json!("dev"));
        assert_eq!(resolved["Zones"].value, json!(["a", "b"]));
        assert_eq!(resolved["Secret"].display_value(), "****");
    }

    #[test]
    fn test_missing_required_parameter() {
        let err = resolve_parameters(&params(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name, .. } if name == "Key"));
    }

    #[test]
    fn test_value_outside_allowed_set() {
        let err =
            resolve_parameters(&params(), &overrides(&[("Key", "abc"), ("Env", "qa")])).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref name, .. } if name == "Env"));
        assert!(err.to_string().contains("not one of"));
    }

    #[test]
    fn test_pattern_failure_uses_constraint_description() {
        let err = resolve_parameters(&params(), &overrides(&[("Key", "ABC")])).unwrap_err();
        assert!(err.to_string().contains("lowercase letters only"));
    }

    #[test]
    fn test_number_bounds() {
        let err = resolve_parameters(&params(), &overrides(&[("Key", "a"), ("Count", "9")]))
            .unwrap_err();
        assert!(err.to_string().contains("above the maximum"));
        let err = resolve_parameters(&params(), &overrides(&[("Key", "a"), ("Count", "x")]))
            .unwrap_err();
        assert!(err.to_string().contains("not a number"));
    }

    #[test]
    fn test_undeclared_override() {
        let err = resolve_parameters(&params(), &overrides(&[("Key", "a"), ("Nope", "1")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name, .. } if name == "Nope"));
    }
}
