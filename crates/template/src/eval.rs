//! Expression evaluation against a scope

use crate::error::{Error, Result};
use crate::expr::{Expr, NO_VALUE, SubPart};
use crate::functions;
use serde_json::Value;

/// Source of values for names an expression refers to
///
/// The resolver implements this for parameters and mappings; the
/// reconciliation engine implements it for materialized resources.
pub trait Scope {
    /// Value of `Ref name`
    fn reference(&self, name: &str) -> Result<Value>;

    /// Value of `Fn::GetAtt [resource, attribute]`
    fn attribute(&self, resource: &str, attribute: &str) -> Result<Value>;

    /// Truth value of a named condition
    fn condition(&self, name: &str) -> Result<bool> {
        Err(Error::Unresolved {
            name: name.to_string(),
        })
    }

    /// `Fn::FindInMap` lookup
    fn mapping(&self, map: &str, top: &str, _second: &str) -> Result<Value> {
        Err(Error::MappingKeyNotFound {
            map: map.to_string(),
            key: top.to_string(),
        })
    }

    /// Availability zones for `Fn::GetAZs`
    fn availability_zones(&self, region: &str) -> Result<Vec<String>> {
        Err(Error::evaluation(
            "Fn::GetAZs",
            format!("no availability zones known for {region:?}"),
        ))
    }
}

/// Evaluate an expression to a value
///
/// Returns `None` when the expression is `AWS::NoValue`.
pub fn evaluate(expr: &Expr, scope: &dyn Scope) -> Result<Option<Value>> {
    let value = match expr {
        Expr::Literal(v) => v.clone(),
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(v) = evaluate(item, scope)? {
                    out.push(v);
                }
            }
            Value::Array(out)
        }
        Expr::Object(fields) => {
            let mut out = serde_json::Map::with_capacity(fields.len());
            for (key, field) in fields {
                if let Some(v) = evaluate(field, scope)? {
                    out.insert(key.clone(), v);
                }
            }
            Value::Object(out)
        }
        Expr::Ref(name) if name == NO_VALUE => return Ok(None),
        Expr::Ref(name) => scope.reference(name)?,
        Expr::GetAtt {
            resource,
            attribute,
        } => scope.attribute(resource, attribute)?,
        Expr::FindInMap { map, top, second } => {
            let map = string_arg(map, scope, "Fn::FindInMap")?;
            let top = string_arg(top, scope, "Fn::FindInMap")?;
            let second = string_arg(second, scope, "Fn::FindInMap")?;
            scope.mapping(&map, &top, &second)?
        }
        Expr::If {
            condition,
            then,
            otherwise,
        } => {
            return if scope.condition(condition)? {
                evaluate(then, scope)
            } else {
                evaluate(otherwise, scope)
            };
        }
        Expr::Join { separator, items } => {
            functions::join(separator, &required(items, scope, "Fn::Join")?)?
        }
        Expr::Sub { parts, vars } => {
            let mut out = String::new();
            for part in parts {
                match part {
                    SubPart::Text(text) => out.push_str(text),
                    SubPart::Var(var) => {
                        let value = match vars.get(var) {
                            Some(bound) => required(bound, scope, "Fn::Sub")?,
                            None => match var.split_once('.') {
                                Some((res, attr)) if !var.starts_with("AWS::") => {
                                    scope.attribute(res, attr)?
                                }
                                _ => scope.reference(var)?,
                            },
                        };
                        out.push_str(&functions::scalar_string(&value, "Fn::Sub")?);
                    }
                }
            }
            Value::String(out)
        }
        Expr::Select { index, list } => functions::select(
            &required(index, scope, "Fn::Select")?,
            &required(list, scope, "Fn::Select")?,
        )?,
        Expr::Split { separator, source } => {
            functions::split(separator, &required(source, scope, "Fn::Split")?)?
        }
        Expr::Base64(inner) => functions::base64(&required(inner, scope, "Fn::Base64")?)?,
        Expr::GetAzs(region) => {
            let region = string_arg(region, scope, "Fn::GetAZs")?;
            Value::Array(
                scope
                    .availability_zones(&region)?
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            )
        }
        Expr::Cidr { block, count, bits } => functions::cidr(
            &required(block, scope, "Fn::Cidr")?,
            &required(count, scope, "Fn::Cidr")?,
            &required(bits, scope, "Fn::Cidr")?,
        )?,
    };
    Ok(Some(value))
}

fn required(expr: &Expr, scope: &dyn Scope, function: &'static str) -> Result<Value> {
    evaluate(expr, scope)?
        .ok_or_else(|| Error::evaluation(function, "argument evaluated to AWS::NoValue"))
}

fn string_arg(expr: &Expr, scope: &dyn Scope, function: &'static str) -> Result<String> {
    functions::scalar_string(&required(expr, scope, function)?, function)
}
