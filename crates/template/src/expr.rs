//! Intrinsic expression language
//!
//! Property values, output values and condition operands are parsed into
//! [`Expr`] trees once, at load time. Later phases never look at raw JSON
//! again.

use crate::error::{Error, Result};
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

/// Pseudo parameter that removes the enclosing property or list element
pub const NO_VALUE: &str = "AWS::NoValue";

/// An expression in a template
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// String, number, bool or null
    Literal(Value),
    List(Vec<Expr>),
    Object(IndexMap<String, Expr>),
    /// `Ref`: a parameter, pseudo parameter or resource
    Ref(String),
    /// `Fn::GetAtt`
    GetAtt { resource: String, attribute: String },
    /// `Fn::FindInMap`
    FindInMap {
        map: Box<Expr>,
        top: Box<Expr>,
        second: Box<Expr>,
    },
    /// `Fn::If`
    If {
        condition: String,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `Fn::Join`
    Join { separator: String, items: Box<Expr> },
    /// `Fn::Sub`
    Sub {
        parts: Vec<SubPart>,
        vars: IndexMap<String, Expr>,
    },
    /// `Fn::Select`
    Select { index: Box<Expr>, list: Box<Expr> },
    /// `Fn::Split`
    Split { separator: String, source: Box<Expr> },
    /// `Fn::Base64`
    Base64(Box<Expr>),
    /// `Fn::GetAZs`
    GetAzs(Box<Expr>),
    /// `Fn::Cidr`
    Cidr {
        block: Box<Expr>,
        count: Box<Expr>,
        bits: Box<Expr>,
    },
}

/// A piece of an `Fn::Sub` template string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubPart {
    Text(String),
    /// `${Name}` or `${Resource.Attribute}`
    Var(String),
}

/// A boolean condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionExpr {
    Equals(Expr, Expr),
    And(Vec<ConditionExpr>),
    Or(Vec<ConditionExpr>),
    Not(Box<ConditionExpr>),
    /// Reference to another named condition
    Condition(String),
}

/// A resource reference found inside an expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// `Ref` to a name that is not a parameter (resolved later)
    Name(String),
    /// `Fn::GetAtt` or `${Res.Attr}`
    Attribute { resource: String, attribute: String },
}

impl Reference {
    /// The logical name this reference points at
    pub fn target(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Attribute { resource, .. } => resource,
        }
    }
}

impl Expr {
    /// Parse a JSON value into an expression
    ///
    /// `location` is used in error messages only.
    pub fn parse(value: &Value, location: &str) -> Result<Self> {
        match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| Self::parse(v, &format!("{location}[{i}]")))
                .collect::<Result<Vec<_>>>()
                .map(Self::List),
            Value::Object(map) => {
                if map.len() == 1
                    && let Some((key, arg)) = map.iter().next()
                    && (key == "Ref" || key.starts_with("Fn::"))
                {
                    return parse_intrinsic(key, arg, &format!("{location}.{key}"));
                }
                let mut fields = IndexMap::with_capacity(map.len());
                for (key, v) in map {
                    fields.insert(key.clone(), Self::parse(v, &format!("{location}.{key}"))?);
                }
                Ok(Self::Object(fields))
            }
            scalar => Ok(Self::Literal(scalar.clone())),
        }
    }

    /// Build a literal expression tree from a plain value
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Array(items) => Self::List(items.iter().map(Self::from_value).collect()),
            Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_value(v)))
                    .collect(),
            ),
            scalar => Self::Literal(scalar.clone()),
        }
    }

    /// Convert back to a plain value if the tree contains no functions
    pub fn as_value(&self) -> Option<Value> {
        match self {
            Self::Literal(v) => Some(v.clone()),
            Self::List(items) => items
                .iter()
                .map(Self::as_value)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Self::Object(fields) => {
                let mut map = serde_json::Map::with_capacity(fields.len());
                for (k, v) in fields {
                    map.insert(k.clone(), v.as_value()?);
                }
                Some(Value::Object(map))
            }
            _ => None,
        }
    }

    /// Whether this is the `AWS::NoValue` marker
    pub fn is_no_value(&self) -> bool {
        matches!(self, Self::Ref(name) if name == NO_VALUE)
    }

    /// Collect every `Ref` name and attribute reference in this tree
    ///
    /// Pseudo parameters (`AWS::*`) are skipped. `Fn::Sub` variables bound
    /// in the variable map are not references.
    pub fn references(&self) -> IndexSet<Reference> {
        let mut out = IndexSet::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut IndexSet<Reference>) {
        match self {
            Self::Literal(_) => {}
            Self::List(items) => items.iter().for_each(|e| e.collect_references(out)),
            Self::Object(fields) => fields.values().for_each(|e| e.collect_references(out)),
            Self::Ref(name) => {
                if !is_pseudo(name) {
                    out.insert(Reference::Name(name.clone()));
                }
            }
            Self::GetAtt {
                resource,
                attribute,
            } => {
                out.insert(Reference::Attribute {
                    resource: resource.clone(),
                    attribute: attribute.clone(),
                });
            }
            Self::FindInMap { map, top, second } => {
                map.collect_references(out);
                top.collect_references(out);
                second.collect_references(out);
            }
            Self::If {
                then, otherwise, ..
            } => {
                then.collect_references(out);
                otherwise.collect_references(out);
            }
            Self::Join { items, .. } => items.collect_references(out),
            Self::Sub { parts, vars } => {
                for part in parts {
                    if let SubPart::Var(var) = part
                        && !vars.contains_key(var)
                        && !is_pseudo(var)
                    {
                        out.insert(sub_reference(var));
                    }
                }
                vars.values().for_each(|e| e.collect_references(out));
            }
            Self::Select { index, list } => {
                index.collect_references(out);
                list.collect_references(out);
            }
            Self::Split { source, .. } => source.collect_references(out),
            Self::Base64(inner) | Self::GetAzs(inner) => inner.collect_references(out),
            Self::Cidr { block, count, bits } => {
                block.collect_references(out);
                count.collect_references(out);
                bits.collect_references(out);
            }
        }
    }

    /// Names of conditions used by `Fn::If` anywhere in this tree
    pub fn condition_names(&self) -> IndexSet<String> {
        let mut out = IndexSet::new();
        self.walk(&mut |e| {
            if let Self::If { condition, .. } = e {
                out.insert(condition.clone());
            }
        });
        out
    }

    fn walk(&self, f: &mut impl FnMut(&Self)) {
        f(self);
        match self {
            Self::Literal(_) | Self::Ref(_) | Self::GetAtt { .. } => {}
            Self::List(items) => items.iter().for_each(|e| e.walk(f)),
            Self::Object(fields) => fields.values().for_each(|e| e.walk(f)),
            Self::FindInMap { map, top, second } => {
                map.walk(f);
                top.walk(f);
                second.walk(f);
            }
            Self::If {
                then, otherwise, ..
            } => {
                then.walk(f);
                otherwise.walk(f);
            }
            Self::Join { items, .. } => items.walk(f),
            Self::Sub { vars, .. } => vars.values().for_each(|e| e.walk(f)),
            Self::Select { index, list } => {
                index.walk(f);
                list.walk(f);
            }
            Self::Split { source, .. } => source.walk(f),
            Self::Base64(inner) | Self::GetAzs(inner) => inner.walk(f),
            Self::Cidr { block, count, bits } => {
                block.walk(f);
                count.walk(f);
                bits.walk(f);
            }
        }
    }
}

impl ConditionExpr {
    /// Parse a condition body
    pub fn parse(value: &Value, location: &str) -> Result<Self> {
        let Some((key, arg)) = value.as_object().and_then(|m| {
            if m.len() == 1 {
                m.iter().next()
            } else {
                None
            }
        }) else {
            return Err(Error::template(
                location,
                "a condition must be a single Fn::Equals, Fn::And, Fn::Or, Fn::Not or Condition",
            ));
        };
        let here = format!("{location}.{key}");

        match key.as_str() {
            "Fn::Equals" => {
                let [a, b] = fixed_args::<2>(arg, &here)?;
                Ok(Self::Equals(Expr::parse(a, &here)?, Expr::parse(b, &here)?))
            }
            "Fn::And" | "Fn::Or" => {
                let items = arg
                    .as_array()
                    .ok_or_else(|| Error::template(&here, "expected a list of conditions"))?;
                if !(2..=10).contains(&items.len()) {
                    return Err(Error::template(&here, "expects between 2 and 10 conditions"));
                }
                let parsed = items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| Self::parse(v, &format!("{here}[{i}]")))
                    .collect::<Result<Vec<_>>>()?;
                Ok(if key == "Fn::And" {
                    Self::And(parsed)
                } else {
                    Self::Or(parsed)
                })
            }
            "Fn::Not" => {
                let [inner] = fixed_args::<1>(arg, &here)?;
                Ok(Self::Not(Box::new(Self::parse(inner, &here)?)))
            }
            "Condition" => arg
                .as_str()
                .map(|name| Self::Condition(name.to_string()))
                .ok_or_else(|| Error::template(&here, "expected a condition name")),
            other => Err(Error::template(
                location,
                format!("{other} is not a condition function"),
            )),
        }
    }

    /// Names of other conditions this one references directly
    pub fn dependencies(&self) -> Vec<&str> {
        match self {
            Self::Equals(..) => Vec::new(),
            Self::And(items) | Self::Or(items) => {
                items.iter().flat_map(ConditionExpr::dependencies).collect()
            }
            Self::Not(inner) => inner.dependencies(),
            Self::Condition(name) => vec![name.as_str()],
        }
    }
}

/// Whether a name is a pseudo parameter
pub fn is_pseudo(name: &str) -> bool {
    name.starts_with("AWS::")
}

/// Split `Res.Attr` into an attribute reference, or keep a bare name
fn sub_reference(var: &str) -> Reference {
    match var.split_once('.') {
        Some((resource, attribute)) => Reference::Attribute {
            resource: resource.to_string(),
            attribute: attribute.to_string(),
        },
        None => Reference::Name(var.to_string()),
    }
}

/// Parse an `Fn::Sub` template string into parts
///
/// `${!Literal}` is written out as `${Literal}`.
pub fn parse_sub(template: &str, location: &str) -> Result<Vec<SubPart>> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        text.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| Error::template(location, "unterminated ${ in Fn::Sub"))?;
        let name = &after[..end];
        if let Some(literal) = name.strip_prefix('!') {
            text.push_str("${");
            text.push_str(literal);
            text.push('}');
        } else {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::template(location, "empty ${} in Fn::Sub"));
            }
            if !text.is_empty() {
                parts.push(SubPart::Text(std::mem::take(&mut text)));
            }
            parts.push(SubPart::Var(name.to_string()));
        }
        rest = &after[end + 1..];
    }
    text.push_str(rest);
    if !text.is_empty() {
        parts.push(SubPart::Text(text));
    }
    Ok(parts)
}

fn parse_intrinsic(key: &str, arg: &Value, location: &str) -> Result<Expr> {
    match key {
        "Ref" => arg
            .as_str()
            .map(|name| Expr::Ref(name.to_string()))
            .ok_or_else(|| Error::template(location, "Ref expects a name")),
        "Fn::GetAtt" => {
            let (resource, attribute) = match arg {
                Value::String(dotted) => dotted
                    .split_once('.')
                    .map(|(r, a)| (r.to_string(), a.to_string()))
                    .ok_or_else(|| Error::template(location, "expected Resource.Attribute"))?,
                Value::Array(_) => {
                    let [r, a] = fixed_args::<2>(arg, location)?;
                    match (r.as_str(), a.as_str()) {
                        (Some(r), Some(a)) => (r.to_string(), a.to_string()),
                        _ => return Err(Error::template(location, "expected two strings")),
                    }
                }
                _ => return Err(Error::template(location, "expected [Resource, Attribute]")),
            };
            Ok(Expr::GetAtt {
                resource,
                attribute,
            })
        }
        "Fn::FindInMap" => {
            let [map, top, second] = fixed_args::<3>(arg, location)?;
            Ok(Expr::FindInMap {
                map: Box::new(Expr::parse(map, location)?),
                top: Box::new(Expr::parse(top, location)?),
                second: Box::new(Expr::parse(second, location)?),
            })
        }
        "Fn::If" => {
            let [cond, then, otherwise] = fixed_args::<3>(arg, location)?;
            let condition = cond
                .as_str()
                .ok_or_else(|| Error::template(location, "first argument must be a condition name"))?;
            Ok(Expr::If {
                condition: condition.to_string(),
                then: Box::new(Expr::parse(then, &format!("{location}[1]"))?),
                otherwise: Box::new(Expr::parse(otherwise, &format!("{location}[2]"))?),
            })
        }
        "Fn::Join" => {
            let [sep, items] = fixed_args::<2>(arg, location)?;
            Ok(Expr::Join {
                separator: literal_string(sep, location)?,
                items: Box::new(Expr::parse(items, location)?),
            })
        }
        "Fn::Sub" => {
            let (template, vars) = match arg {
                Value::String(s) => (s.as_str(), IndexMap::new()),
                Value::Array(_) => {
                    let [t, v] = fixed_args::<2>(arg, location)?;
                    let t = t
                        .as_str()
                        .ok_or_else(|| Error::template(location, "template must be a string"))?;
                    let v = v
                        .as_object()
                        .ok_or_else(|| Error::template(location, "variables must be a map"))?;
                    let mut vars = IndexMap::with_capacity(v.len());
                    for (name, value) in v {
                        vars.insert(name.clone(), Expr::parse(value, location)?);
                    }
                    (t, vars)
                }
                _ => return Err(Error::template(location, "expected a string or [string, map]")),
            };
            Ok(Expr::Sub {
                parts: parse_sub(template, location)?,
                vars,
            })
        }
        "Fn::Select" => {
            let [index, list] = fixed_args::<2>(arg, location)?;
            Ok(Expr::Select {
                index: Box::new(Expr::parse(index, location)?),
                list: Box::new(Expr::parse(list, location)?),
            })
        }
        "Fn::Split" => {
            let [sep, source] = fixed_args::<2>(arg, location)?;
            Ok(Expr::Split {
                separator: literal_string(sep, location)?,
                source: Box::new(Expr::parse(source, location)?),
            })
        }
        "Fn::Base64" => Ok(Expr::Base64(Box::new(Expr::parse(arg, location)?))),
        "Fn::GetAZs" => Ok(Expr::GetAzs(Box::new(Expr::parse(arg, location)?))),
        "Fn::Cidr" => {
            let [block, count, bits] = fixed_args::<3>(arg, location)?;
            Ok(Expr::Cidr {
                block: Box::new(Expr::parse(block, location)?),
                count: Box::new(Expr::parse(count, location)?),
                bits: Box::new(Expr::parse(bits, location)?),
            })
        }
        other => Err(Error::template(
            location,
            format!("unsupported intrinsic function {other}"),
        )),
    }
}

fn fixed_args<'a, const N: usize>(arg: &'a Value, location: &str) -> Result<[&'a Value; N]> {
    let items = arg
        .as_array()
        .filter(|items| items.len() == N)
        .ok_or_else(|| Error::template(location, format!("expected a list of {N} arguments")))?;
    let refs: Vec<&Value> = items.iter().collect();
    refs.try_into()
        .map_err(|_| Error::template(location, format!("expected a list of {N} arguments")))
}

fn literal_string(value: &Value, location: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::template(location, "expected a literal string"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_nested_intrinsics() {
        let expr = Expr::parse(
            &json!({"Fn::Select": [0, {"Fn::GetAZs": {"Ref": "AWS::Region"}}]}),
            "Test",
        )
        .unwrap();
        assert_eq!(
            expr,
            Expr::Select {
                index: Box::new(Expr::Literal(json!(0))),
                list: Box::new(Expr::GetAzs(Box::new(Expr::Ref("AWS::Region".into())))),
            }
        );
    }

    #[test]
    fn test_getatt_accepts_dotted_string() {
        let expr = Expr::parse(&json!({"Fn::GetAtt": "Alb.DNSName"}), "Test").unwrap();
        assert_eq!(
            expr,
            Expr::GetAtt {
                resource: "Alb".into(),
                attribute: "DNSName".into()
            }
        );
    }

    #[test]
    fn test_multi_key_objects_are_plain_maps() {
        let expr = Expr::parse(&json!({"Ref": "A", "Other": 1}), "Test").unwrap();
        assert!(matches!(expr, Expr::Object(ref m) if m.len() == 2));
    }

    #[test]
    fn test_sub_parses_vars_and_escapes() {
        let parts = parse_sub("arn:${AWS::Partition}:${Vpc}/${!Literal}", "Test").unwrap();
        assert_eq!(
            parts,
            vec![
                SubPart::Text("arn:".into()),
                SubPart::Var("AWS::Partition".into()),
                SubPart::Text(":".into()),
                SubPart::Var("Vpc".into()),
                SubPart::Text("/${Literal}".into()),
            ]
        );
    }

    #[test]
    fn test_unterminated_sub_is_rejected() {
        assert!(parse_sub("${Vpc", "Test").is_err());
    }

    #[test]
    fn test_references_skip_pseudo_and_bound_sub_vars() {
        let expr = Expr::parse(
            &json!({
                "A": {"Ref": "Vpc"},
                "B": {"Ref": "AWS::Region"},
                "C": {"Fn::Sub": ["${Name}-${Alb.DNSName}", {"Name": {"Ref": "Env"}}]}
            }),
            "Test",
        )
        .unwrap();
        let refs: Vec<_> = expr.references().into_iter().collect();
        assert_eq!(
            refs,
            vec![
                Reference::Name("Vpc".into()),
                Reference::Attribute {
                    resource: "Alb".into(),
                    attribute: "DNSName".into()
                },
                Reference::Name("Env".into()),
            ]
        );
    }

    #[test]
    fn test_unsupported_function_names_location() {
        let err = Expr::parse(&json!({"Fn::Transform": {}}), "Resources.X").unwrap_err();
        assert!(err.to_string().contains("Resources.X"));
    }

    #[test]
    fn test_condition_dependencies() {
        let cond = ConditionExpr::parse(
            &json!({"Fn::And": [{"Condition": "IsProd"}, {"Fn::Not": [{"Condition": "IsDev"}]}]}),
            "Conditions.X",
        )
        .unwrap();
        assert_eq!(cond.dependencies(), vec!["IsProd", "IsDev"]);
    }

    #[test]
    fn test_equals_requires_two_arguments() {
        assert!(ConditionExpr::parse(&json!({"Fn::Equals": ["a"]}), "C").is_err());
    }
}
