//! Pure implementations of the intrinsic functions over plain values

use crate::error::{Error, Result};
use base64::Engine;
use serde_json::Value;
use std::net::Ipv4Addr;

/// Render a scalar value as a string
pub fn scalar_string(value: &Value, function: &'static str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(Error::evaluation(
            function,
            format!("expected a scalar, got {other}"),
        )),
    }
}

/// Compare two values the way `Fn::Equals` does
///
/// Scalars compare by their string form so that `"8"` equals `8`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(_), _) | (_, Value::Object(_)) => a == b,
        (Value::Array(_), _) | (_, Value::Array(_)) => false,
        _ => match (scalar_string(a, "Fn::Equals"), scalar_string(b, "Fn::Equals")) {
            (Ok(x), Ok(y)) => x == y,
            _ => a == b,
        },
    }
}

/// `Fn::Join`
pub fn join(separator: &str, items: &Value) -> Result<Value> {
    let items = items
        .as_array()
        .ok_or_else(|| Error::evaluation("Fn::Join", "second argument must be a list"))?;
    let parts = items
        .iter()
        .map(|v| scalar_string(v, "Fn::Join"))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::String(parts.join(separator)))
}

/// `Fn::Select`
pub fn select(index: &Value, list: &Value) -> Result<Value> {
    let index: usize = scalar_string(index, "Fn::Select")?
        .parse()
        .map_err(|_| Error::evaluation("Fn::Select", "index must be a non-negative integer"))?;
    let list = list
        .as_array()
        .ok_or_else(|| Error::evaluation("Fn::Select", "second argument must be a list"))?;
    list.get(index).cloned().ok_or_else(|| {
        Error::evaluation(
            "Fn::Select",
            format!("index {index} out of range for list of {}", list.len()),
        )
    })
}

/// `Fn::Split`
pub fn split(separator: &str, source: &Value) -> Result<Value> {
    if separator.is_empty() {
        return Err(Error::evaluation("Fn::Split", "separator must not be empty"));
    }
    let source = scalar_string(source, "Fn::Split")?;
    Ok(Value::Array(
        source
            .split(separator)
            .map(|s| Value::String(s.to_string()))
            .collect(),
    ))
}

/// `Fn::Base64`
pub fn base64(value: &Value) -> Result<Value> {
    let raw = scalar_string(value, "Fn::Base64")?;
    Ok(Value::String(
        base64::engine::general_purpose::STANDARD.encode(raw.as_bytes()),
    ))
}

/// `Fn::Cidr`: carve `count` subnets with `bits` host bits out of an IPv4 block
pub fn cidr(block: &Value, count: &Value, bits: &Value) -> Result<Value> {
    let block = scalar_string(block, "Fn::Cidr")?;
    let count: u32 = scalar_string(count, "Fn::Cidr")?
        .parse()
        .map_err(|_| Error::evaluation("Fn::Cidr", "count must be an integer"))?;
    let bits: u32 = scalar_string(bits, "Fn::Cidr")?
        .parse()
        .map_err(|_| Error::evaluation("Fn::Cidr", "cidrBits must be an integer"))?;

    let (addr, prefix) = block
        .split_once('/')
        .ok_or_else(|| Error::evaluation("Fn::Cidr", format!("{block} is not a CIDR block")))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| Error::evaluation("Fn::Cidr", format!("{block} is not an IPv4 block")))?;
    let prefix: u32 = prefix
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| Error::evaluation("Fn::Cidr", format!("bad prefix in {block}")))?;

    if !(1..=256).contains(&count) {
        return Err(Error::evaluation("Fn::Cidr", "count must be between 1 and 256"));
    }
    if bits == 0 || bits > 32 - prefix {
        return Err(Error::evaluation(
            "Fn::Cidr",
            format!("cidrBits {bits} does not fit in /{prefix}"),
        ));
    }

    let subnet_prefix = 32 - bits;
    let available = 1u64 << (subnet_prefix - prefix);
    if u64::from(count) > available {
        return Err(Error::evaluation(
            "Fn::Cidr",
            format!("{block} only has room for {available} /{subnet_prefix} subnets"),
        ));
    }

    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let base = u32::from(addr) & mask;
    let step = 1u64 << bits;
    let subnets = (0..u64::from(count))
        .map(|i| {
            let start = u64::from(base) + i * step;
            Value::String(format!("{}/{subnet_prefix}", Ipv4Addr::from(start as u32)))
        })
        .collect();
    Ok(Value::Array(subnets))
}
