//! # JSON Text Codec
//!
//! Maps JSON-safe [`Value`]s to and from `serde_json`, for transports that
//! carry text. Values should pass through
//! [`JsonSerialization`](crate::serialization::JsonSerialization) first; this
//! codec refuses anything it cannot represent rather than guessing.
//!
//! - `undefined` is written as `null`.
//! - Integral numbers are written as integers, everything else as floats.
//!   Non-finite numbers have no JSON form and are written as `null`.
//! - Cycles have no JSON form; they trip the depth limit.

use std::fmt;

use serde_json::Map;
use serde_json::Number;

use crate::value::Array;
use crate::value::Object;
use crate::value::Value;

/// Nesting limit for [`to_json`].
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The value has no JSON representation.
    Unsupported(&'static str),
    /// Nesting exceeded [`MAX_DEPTH`], which includes any cycle.
    RecursionLimitExceeded,
    /// The input text is not valid JSON.
    Parse(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(kind) => write!(f, "Cannot encode {} as JSON", kind),
            Self::RecursionLimitExceeded => write!(f, "Recursion limit of {} exceeded", MAX_DEPTH),
            Self::Parse(msg) => write!(f, "Invalid JSON: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn to_json(value: &Value) -> Result<serde_json::Value> {
    encode(value, 0)
}

fn encode(value: &Value, depth: usize) -> Result<serde_json::Value> {
    if depth > MAX_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    let json = match value {
        Value::Undefined | Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => number(*n),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => {
            let items = items
                .to_vec()
                .iter()
                .map(|item| encode(item, depth + 1))
                .collect::<Result<Vec<_>>>()?;
            serde_json::Value::Array(items)
        }
        Value::Object(object) => {
            let mut map = Map::new();
            for (key, item) in object.entries() {
                map.insert(key, encode(&item, depth + 1)?);
            }
            serde_json::Value::Object(map)
        }
        other => return Err(Error::Unsupported(other.type_name())),
    };
    Ok(json)
}

fn number(n: f64) -> serde_json::Value {
    const SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

    if n.fract() == 0.0 && n.abs() <= SAFE_INTEGER {
        return serde_json::Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(from_json).collect::<Array>()),
        serde_json::Value::Object(map) => {
            let object = Object::new();
            for (key, item) in map {
                object.insert(key.clone(), from_json(item));
            }
            Value::Object(object)
        }
    }
}

pub fn to_string(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&to_json(value)?)?)
}

pub fn from_str(text: &str) -> Result<Value> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    Ok(from_json(&json))
}
