//! # Value Walker
//!
//! The encoder and decoder shared by both serialization strategies.
//!
//! ## Invariants
//!
//! - **Cycles**: every container gets its output placeholder recorded in
//!   `seen` before its children are visited, so a back-reference resolves to
//!   the same (partially built) output instead of recursing forever.
//! - **Pinning**: `seen` holds each visited source next to its output. The
//!   key is an allocation address, and a source freed mid-walk (a temporary
//!   produced by a custom value or a hook) would hand its address to the next
//!   temporary.
//! - **Permissive**: anything the rules do not cover passes through unchanged.
//!   Malformed tagged wrappers decode as plain objects.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;

use crate::error::ErrorValue;
use crate::iterator::IteratorKind;
use crate::iterator::ValueIterator;
use crate::serialization::SerializationHooks;
use crate::serialization::tags;
use crate::thread::Thread;
use crate::transfer::Transferable;
use crate::value::Array;
use crate::value::MapValue;
use crate::value::Object;
use crate::value::RegExp;
use crate::value::SetValue;
use crate::value::TypedArray;
use crate::value::TypedArrayKind;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flavor {
    StructuredClone,
    Json,
}

/// Visited containers, keyed by identity: `(source, output)`.
type Seen = HashMap<usize, (Value, Value)>;

fn remember(seen: &mut Seen, source: &Value, output: Value) {
    if let Some(id) = source.identity() {
        seen.insert(id, (source.clone(), output));
    }
}

fn tagged(tag: &str, payload: Value) -> Value {
    let wrapper = Object::new();
    wrapper.insert(tag, payload);
    Value::Object(wrapper)
}

/// The `(tag, payload)` of a wrapper object, if `object` looks like one.
fn as_tagged(object: &Object) -> Option<(String, Value)> {
    if object.len() != 1 {
        return None;
    }
    let (key, payload) = object.entries().into_iter().next()?;
    key.starts_with("_@").then_some((key, payload))
}

// ============================================================================
//  Encoding
// ============================================================================

pub(crate) struct Encoder<'a> {
    flavor: Flavor,
    thread: &'a Thread,
    hooks: Option<&'a dyn SerializationHooks>,
    transferable: Option<&'a mut Vec<Transferable>>,
    seen: Seen,
}

impl<'a> Encoder<'a> {
    pub(crate) fn new(
        flavor: Flavor,
        thread: &'a Thread,
        hooks: Option<&'a dyn SerializationHooks>,
        transferable: Option<&'a mut Vec<Transferable>>,
    ) -> Self {
        Self {
            flavor,
            thread,
            hooks,
            transferable,
            seen: HashMap::new(),
        }
    }

    pub(crate) fn encode(&mut self, value: &Value) -> Value {
        if let Some((_, done)) = value.identity().and_then(|id| self.seen.get(&id)) {
            return done.clone();
        }

        if !value.is_primitive() {
            if let Some(hooks) = self.hooks {
                if let Some(encoded) = hooks.serialize(value, &mut |inner| self.encode(inner)) {
                    return encoded;
                }
            }
        }

        let json = self.flavor == Flavor::Json;
        match value {
            Value::Undefined if json => tagged(tags::UNDEFINED, Value::Bool(true)),
            Value::Number(n) if json && !n.is_finite() => {
                tagged(tags::NUMBER, Value::String(non_finite_name(*n).to_string()))
            }
            Value::BigInt(n) if json => tagged(tags::BIGINT, Value::String(n.to_string())),
            Value::Date(date) if json => tagged(
                tags::DATE,
                Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ),
            Value::RegExp(regexp) if json => tagged(
                tags::REGEXP,
                Value::array([regexp.source.as_str(), regexp.flags.as_str()]),
            ),
            Value::Error(error) if json => tagged(tags::ERROR, error_fields(error)),
            Value::Bytes(bytes) if json => tagged(
                tags::TYPED_ARRAY,
                Value::array([
                    Value::from(bytes.kind.name()),
                    Value::String(BASE64.encode(&bytes.bytes)),
                ]),
            ),

            Value::Array(array) => {
                let out = Array::new();
                remember(&mut self.seen, value, Value::Array(out.clone()));
                for item in array.to_vec() {
                    out.push(self.encode(&item));
                }
                Value::Array(out)
            }
            Value::Object(object) => {
                let out = Object::new();
                remember(&mut self.seen, value, Value::Object(out.clone()));
                for (key, item) in object.entries() {
                    out.insert(key, self.encode(&item));
                }
                Value::Object(out)
            }
            Value::Map(map) if json => {
                let entries = Array::new();
                let wrapper = tagged(tags::MAP, Value::Array(entries.clone()));
                remember(&mut self.seen, value, wrapper.clone());
                for (key, item) in map.entries() {
                    let pair = Value::array([self.encode(&key), self.encode(&item)]);
                    entries.push(pair);
                }
                wrapper
            }
            Value::Map(map) => {
                let out = MapValue::new();
                remember(&mut self.seen, value, Value::Map(out.clone()));
                for (key, item) in map.entries() {
                    let key = self.encode(&key);
                    let item = self.encode(&item);
                    out.push_entry(key, item);
                }
                Value::Map(out)
            }
            Value::Set(set) if json => {
                let values = Array::new();
                let wrapper = tagged(tags::SET, Value::Array(values.clone()));
                remember(&mut self.seen, value, wrapper.clone());
                for item in set.values() {
                    values.push(self.encode(&item));
                }
                wrapper
            }
            Value::Set(set) => {
                let out = SetValue::new();
                remember(&mut self.seen, value, Value::Set(out.clone()));
                for item in set.values() {
                    out.push_value(self.encode(&item));
                }
                Value::Set(out)
            }

            Value::Function(function) => {
                let id = self.thread.functions().serialize(function, self.thread);
                tagged(tags::FUNCTION, Value::String(id))
            }
            Value::Iterator(iterator) => {
                let body = Object::new();
                body.insert("next", self.encode(&Value::Function(iterator.next_fn().clone())));
                if let Some(f) = iterator.return_fn() {
                    body.insert("return", self.encode(&Value::Function(f.clone())));
                }
                if let Some(f) = iterator.throw_fn() {
                    body.insert("throw", self.encode(&Value::Function(f.clone())));
                }
                let tag = match iterator.kind() {
                    IteratorKind::Sync => tags::ITERATOR,
                    IteratorKind::Async => tags::ASYNC_ITERATOR,
                };
                tagged(tag, Value::Object(body))
            }
            Value::Transferable(transferable) => {
                if let Some(list) = self.transferable.as_mut() {
                    list.push(transferable.clone());
                }
                value.clone()
            }
            Value::Custom(custom) => custom.serialize(&mut |inner| self.encode(inner)),

            other => other.clone(),
        }
    }
}

fn non_finite_name(n: f64) -> &'static str {
    if n.is_nan() {
        "NaN"
    } else if n > 0.0 {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn error_fields(error: &ErrorValue) -> Value {
    let fields = Object::new();
    fields.insert("name", error.name.as_str());
    fields.insert("message", error.message.as_str());
    if let Some(stack) = &error.stack {
        fields.insert("stack", stack.as_str());
    }
    Value::Object(fields)
}

// ============================================================================
//  Decoding
// ============================================================================

pub(crate) struct Decoder<'a> {
    flavor: Flavor,
    thread: &'a Thread,
    hooks: Option<&'a dyn SerializationHooks>,
    seen: Seen,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(flavor: Flavor, thread: &'a Thread, hooks: Option<&'a dyn SerializationHooks>) -> Self {
        Self {
            flavor,
            thread,
            hooks,
            seen: HashMap::new(),
        }
    }

    pub(crate) fn decode(&mut self, value: &Value) -> Value {
        if let Some((_, done)) = value.identity().and_then(|id| self.seen.get(&id)) {
            return done.clone();
        }

        if !value.is_primitive() {
            if let Some(hooks) = self.hooks {
                if let Some(decoded) = hooks.deserialize(value, &mut |inner| self.decode(inner)) {
                    return decoded;
                }
            }
        }

        match value {
            Value::Object(object) => {
                if let Some((tag, payload)) = as_tagged(object) {
                    if let Some(decoded) = self.decode_tagged(object, &tag, &payload) {
                        return decoded;
                    }
                }
                let out = Object::new();
                remember(&mut self.seen, value, Value::Object(out.clone()));
                for (key, item) in object.entries() {
                    out.insert(key, self.decode(&item));
                }
                Value::Object(out)
            }
            Value::Array(array) => {
                let out = Array::new();
                remember(&mut self.seen, value, Value::Array(out.clone()));
                for item in array.to_vec() {
                    out.push(self.decode(&item));
                }
                Value::Array(out)
            }
            Value::Map(map) => {
                let out = MapValue::new();
                remember(&mut self.seen, value, Value::Map(out.clone()));
                for (key, item) in map.entries() {
                    let key = self.decode(&key);
                    let item = self.decode(&item);
                    out.push_entry(key, item);
                }
                Value::Map(out)
            }
            Value::Set(set) => {
                let out = SetValue::new();
                remember(&mut self.seen, value, Value::Set(out.clone()));
                for item in set.values() {
                    out.push_value(self.decode(&item));
                }
                Value::Set(out)
            }
            other => other.clone(),
        }
    }

    /// Decodes a wrapper object. `None` means "not a wrapper after all".
    fn decode_tagged(&mut self, wrapper: &Object, tag: &str, payload: &Value) -> Option<Value> {
        match tag {
            tags::FUNCTION => {
                let id = payload.as_str()?;
                let function = self.thread.functions().deserialize(id, self.thread);
                Some(Value::Function(function))
            }
            tags::ITERATOR | tags::ASYNC_ITERATOR => {
                let body = payload.as_object()?;
                let next = self.decode(&body.get("next")?).as_function()?;
                let return_fn = body.get("return").and_then(|f| self.decode(&f).as_function());
                let throw_fn = body.get("throw").and_then(|f| self.decode(&f).as_function());
                let kind = if tag == tags::ITERATOR {
                    IteratorKind::Sync
                } else {
                    IteratorKind::Async
                };
                Some(Value::Iterator(ValueIterator::from_parts(kind, next, return_fn, throw_fn)))
            }
            _ if self.flavor != Flavor::Json => None,

            tags::UNDEFINED => Some(Value::Undefined),
            tags::NUMBER => match payload.as_str()? {
                "NaN" => Some(Value::Number(f64::NAN)),
                "Infinity" => Some(Value::Number(f64::INFINITY)),
                "-Infinity" => Some(Value::Number(f64::NEG_INFINITY)),
                _ => None,
            },
            tags::BIGINT => payload.as_str()?.parse::<i128>().ok().map(Value::BigInt),
            tags::DATE => {
                let date = DateTime::parse_from_rfc3339(payload.as_str()?).ok()?;
                Some(Value::Date(date.with_timezone(&Utc)))
            }
            tags::REGEXP => {
                let parts = payload.as_array()?;
                let source = parts.get(0)?.as_str()?.to_string();
                let flags = parts.get(1).and_then(|f| f.as_str().map(str::to_string)).unwrap_or_default();
                Some(Value::RegExp(RegExp { source, flags }))
            }
            tags::ERROR => {
                let fields = payload.as_object()?;
                let text = |key: &str| fields.get(key).and_then(|v| v.as_str().map(str::to_string));
                Some(Value::Error(ErrorValue {
                    name: text("name").unwrap_or_else(|| "Error".to_string()),
                    message: text("message").unwrap_or_default(),
                    stack: text("stack"),
                }))
            }
            tags::TYPED_ARRAY => {
                let parts = payload.as_array()?;
                let kind = TypedArrayKind::from_name(parts.get(0)?.as_str()?)?;
                let bytes = BASE64.decode(parts.get(1)?.as_str()?).ok()?;
                Some(Value::Bytes(TypedArray { kind, bytes }))
            }
            tags::MAP => {
                let pairs = entry_pairs(payload)?;
                let out = MapValue::new();
                remember(&mut self.seen, &Value::Object(wrapper.clone()), Value::Map(out.clone()));
                for (key, item) in pairs {
                    let key = self.decode(&key);
                    let item = self.decode(&item);
                    out.push_entry(key, item);
                }
                Some(Value::Map(out))
            }
            tags::SET => {
                let values = payload.as_array()?;
                let out = SetValue::new();
                remember(&mut self.seen, &Value::Object(wrapper.clone()), Value::Set(out.clone()));
                for item in values.to_vec() {
                    out.push_value(self.decode(&item));
                }
                Some(Value::Set(out))
            }
            _ => None,
        }
    }
}

/// Validates a map payload up front, so a malformed one is rejected before
/// anything is recorded in `seen`.
fn entry_pairs(payload: &Value) -> Option<Vec<(Value, Value)>> {
    payload
        .as_array()?
        .to_vec()
        .into_iter()
        .map(|entry| {
            let pair = entry.as_array()?;
            if pair.len() != 2 {
                return None;
            }
            Some((pair.get(0)?, pair.get(1)?))
        })
        .collect()
}
