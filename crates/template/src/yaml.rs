//! YAML to JSON conversion with short-form intrinsic tags
//!
//! `!Ref X` becomes `{"Ref": "X"}`, `!Condition X` becomes
//! `{"Condition": "X"}`, and every other `!Name arg` becomes
//! `{"Fn::Name": arg}`.

use crate::error::{Error, Result};
use serde_json::{Map, Number, Value};
use serde_yaml::Value as Yaml;

/// Convert a YAML document into the JSON form the parser understands
pub fn to_json(value: Yaml) -> Result<Value> {
    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => number(&n)?,
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        Yaml::Mapping(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(key(k)?, to_json(v)?);
            }
            Value::Object(out)
        }
        Yaml::Tagged(tagged) => {
            let tag = tagged.tag.to_string();
            let name = tag.trim_start_matches('!');
            let key = match name {
                "Ref" | "Condition" => name.to_string(),
                other => format!("Fn::{other}"),
            };
            let mut out = Map::with_capacity(1);
            out.insert(key, to_json(tagged.value)?);
            Value::Object(out)
        }
    })
}

fn number(n: &serde_yaml::Number) -> Result<Value> {
    if let Some(i) = n.as_i64() {
        return Ok(Value::Number(i.into()));
    }
    if let Some(u) = n.as_u64() {
        return Ok(Value::Number(u.into()));
    }
    n.as_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| Error::template("<yaml>", format!("unrepresentable number {n}")))
}

fn key(k: Yaml) -> Result<String> {
    match k {
        Yaml::String(s) => Ok(s),
        Yaml::Bool(b) => Ok(b.to_string()),
        Yaml::Number(n) => Ok(n.to_string()),
        other => Err(Error::template(
            "<yaml>",
            format!("unsupported mapping key {other:?}"),
        )),
    }
}
