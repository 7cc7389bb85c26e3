//! # Values
//!
//! The universe of values that can cross a thread boundary.
//!
//! Primitives are plain data. Arrays, objects, maps and sets are shared handles:
//! cloning a `Value::Array` clones the handle, not the items, so identity is
//! observable and cyclic graphs can be built. Serialization relies on that
//! identity to keep cycles intact.
//!
//! ## Invariants
//!
//! - Container handles never hold their lock while visiting children, so a
//!   container that contains itself can be walked without deadlocking.
//! - `deep_eq` terminates on cyclic graphs.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::ErrorValue;
use crate::function::Function;
use crate::iterator::ValueIterator;
use crate::serialization::Serializable;
use crate::transfer::Transferable;

/// Nesting depth after which `Debug` output is elided.
const MAX_DEBUG_DEPTH: usize = 8;

/// A value that can be passed to, or returned from, a remote call.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i128),
    String(String),
    Date(DateTime<Utc>),
    RegExp(RegExp),
    Error(ErrorValue),
    Bytes(TypedArray),
    Array(Array),
    Object(Object),
    Map(MapValue),
    Set(SetValue),
    Function(Function),
    Iterator(ValueIterator),
    Transferable(Transferable),
    /// A value that encodes itself.
    Custom(Arc<dyn Serializable>),
}

impl Value {
    /// Builds an array from anything yielding values.
    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    /// Builds an object from `(key, value)` pairs.
    pub fn object<K, V, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let object = Object::new();
        for (key, value) in entries {
            object.insert(key, value);
        }
        Value::Object(object)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// True for `undefined` and `null`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// True for values copied by value (no identity).
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Undefined
                | Value::Null
                | Value::Bool(_)
                | Value::Number(_)
                | Value::BigInt(_)
                | Value::String(_)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<Array> {
        match self {
            Value::Array(a) => Some(a.clone()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<Object> {
        match self {
            Value::Object(o) => Some(o.clone()),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<Function> {
        match self {
            Value::Function(f) => Some(f.clone()),
            _ => None,
        }
    }

    pub fn as_iterator(&self) -> Option<ValueIterator> {
        match self {
            Value::Iterator(i) => Some(i.clone()),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorValue> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Reads a property of an object value.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(o) => o.get(key),
            _ => None,
        }
    }

    /// A short, stable name for the variant, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::String(_) => "string",
            Value::Date(_) => "Date",
            Value::RegExp(_) => "RegExp",
            Value::Error(_) => "Error",
            Value::Bytes(t) => t.kind.name(),
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
            Value::Map(_) => "Map",
            Value::Set(_) => "Set",
            Value::Function(_) => "Function",
            Value::Iterator(_) => "Iterator",
            Value::Transferable(_) => "Transferable",
            Value::Custom(_) => "Custom",
        }
    }

    /// Structural equality. Functions, transferables and custom values compare
    /// by identity; containers compare by contents. Terminates on cycles.
    pub fn deep_eq(&self, other: &Value) -> bool {
        let mut visited = HashSet::new();
        deep_eq(self, other, &mut visited)
    }

    /// Identity of a container handle, if this value is one.
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            Value::Array(a) => Some(a.identity()),
            Value::Object(o) => Some(o.identity()),
            Value::Map(m) => Some(m.identity()),
            Value::Set(s) => Some(s.identity()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.deep_eq(other)
    }
}

/// `SameValueZero`: the key equality used by maps and sets.
pub fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::BigInt(x), Value::BigInt(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
        (Value::Transferable(x), Value::Transferable(y)) => x.ptr_eq(y),
        _ => match (a.identity(), b.identity()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn deep_eq(a: &Value, b: &Value, visited: &mut HashSet<(usize, usize)>) -> bool {
    if let (Some(x), Some(y)) = (a.identity(), b.identity()) {
        // A pair already under comparison is assumed equal; any difference
        // shows up elsewhere in the walk.
        if !visited.insert((x, y)) {
            return true;
        }
    }

    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::BigInt(x), Value::BigInt(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::RegExp(x), Value::RegExp(y)) => x == y,
        (Value::Error(x), Value::Error(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => all_eq(&x.to_vec(), &y.to_vec(), visited),
        (Value::Set(x), Value::Set(y)) => all_eq(&x.values(), &y.values(), visited),
        (Value::Object(x), Value::Object(y)) => {
            let xs = x.entries();
            let ys = y.entries();
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|((kx, vx), (ky, vy))| kx == ky && deep_eq(vx, vy, visited))
        }
        (Value::Map(x), Value::Map(y)) => {
            let xs = x.entries();
            let ys = y.entries();
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|((kx, vx), (ky, vy))| deep_eq(kx, ky, visited) && deep_eq(vx, vy, visited))
        }
        (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
        (Value::Iterator(x), Value::Iterator(y)) => x.ptr_eq(y),
        (Value::Transferable(x), Value::Transferable(y)) => x.ptr_eq(y),
        (Value::Custom(x), Value::Custom(y)) => {
            std::ptr::addr_eq(Arc::as_ptr(x), Arc::as_ptr(y))
        }
        _ => false,
    }
}

fn all_eq(xs: &[Value], ys: &[Value], visited: &mut HashSet<(usize, usize)>) -> bool {
    xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_eq(x, y, visited))
}

// ============================================================================
//  Built-ins
// ============================================================================

/// A regular expression, carried as source and flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegExp {
    pub source: String,
    pub flags: String,
}

impl RegExp {
    pub fn new(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            flags: flags.into(),
        }
    }
}

/// The element type of a byte-backed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedArrayKind {
    ArrayBuffer,
    DataView,
    Int8Array,
    Uint8Array,
    Uint8ClampedArray,
    Int16Array,
    Uint16Array,
    Int32Array,
    Uint32Array,
    Float32Array,
    Float64Array,
    BigInt64Array,
    BigUint64Array,
}

impl TypedArrayKind {
    const ALL: [TypedArrayKind; 13] = [
        Self::ArrayBuffer,
        Self::DataView,
        Self::Int8Array,
        Self::Uint8Array,
        Self::Uint8ClampedArray,
        Self::Int16Array,
        Self::Uint16Array,
        Self::Int32Array,
        Self::Uint32Array,
        Self::Float32Array,
        Self::Float64Array,
        Self::BigInt64Array,
        Self::BigUint64Array,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ArrayBuffer => "ArrayBuffer",
            Self::DataView => "DataView",
            Self::Int8Array => "Int8Array",
            Self::Uint8Array => "Uint8Array",
            Self::Uint8ClampedArray => "Uint8ClampedArray",
            Self::Int16Array => "Int16Array",
            Self::Uint16Array => "Uint16Array",
            Self::Int32Array => "Int32Array",
            Self::Uint32Array => "Uint32Array",
            Self::Float32Array => "Float32Array",
            Self::Float64Array => "Float64Array",
            Self::BigInt64Array => "BigInt64Array",
            Self::BigUint64Array => "BigUint64Array",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// Raw bytes tagged with the array type they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedArray {
    pub kind: TypedArrayKind,
    pub bytes: Vec<u8>,
}

impl TypedArray {
    pub fn new(kind: TypedArrayKind, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            bytes: bytes.into(),
        }
    }
}

// ============================================================================
//  Containers
// ============================================================================

fn arc_identity<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as *const () as usize
}

/// A shared, growable list of values.
#[derive(Clone, Default)]
pub struct Array(Arc<RwLock<Vec<Value>>>);

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.read().get(index).cloned()
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.0.write().push(value.into());
    }

    /// Writes `value` at `index`, padding with `undefined` as needed.
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        let mut items = self.0.write();
        if index >= items.len() {
            items.resize(index + 1, Value::Undefined);
        }
        items[index] = value.into();
    }

    /// A snapshot of the current items.
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.read().clone()
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn identity(&self) -> usize {
        arc_identity(&self.0)
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

/// A shared map from string keys to values.
#[derive(Clone, Default)]
pub struct Object(Arc<RwLock<BTreeMap<String, Value>>>);

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.read().contains_key(key)
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.write().insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.write().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.read().keys().cloned().collect()
    }

    /// A snapshot of the current entries, sorted by key.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn identity(&self) -> usize {
        arc_identity(&self.0)
    }
}

/// A shared, insertion-ordered map with arbitrary keys.
#[derive(Clone, Default)]
pub struct MapValue(Arc<RwLock<Vec<(Value, Value)>>>);

impl MapValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.0
            .read()
            .iter()
            .find(|(k, _)| same_value_zero(k, key))
            .map(|(_, v)| v.clone())
    }

    pub fn has(&self, key: &Value) -> bool {
        self.0.read().iter().any(|(k, _)| same_value_zero(k, key))
    }

    /// Inserts or replaces the entry for `key`.
    pub fn insert(&self, key: impl Into<Value>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let mut entries = self.0.write();
        match entries.iter_mut().find(|(k, _)| same_value_zero(k, &key)) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
    }

    pub fn delete(&self, key: &Value) -> bool {
        let mut entries = self.0.write();
        let before = entries.len();
        entries.retain(|(k, _)| !same_value_zero(k, key));
        entries.len() != before
    }

    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.0.read().clone()
    }

    pub fn ptr_eq(&self, other: &MapValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn identity(&self) -> usize {
        arc_identity(&self.0)
    }

    /// Appends without the duplicate check; decoders use this to mirror the
    /// entries they were given.
    pub(crate) fn push_entry(&self, key: Value, value: Value) {
        self.0.write().push((key, value));
    }
}

/// A shared, insertion-ordered set.
#[derive(Clone, Default)]
pub struct SetValue(Arc<RwLock<Vec<Value>>>);

impl SetValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn has(&self, value: &Value) -> bool {
        self.0.read().iter().any(|v| same_value_zero(v, value))
    }

    /// Adds `value` unless an equal one is present. Returns whether it was added.
    pub fn add(&self, value: impl Into<Value>) -> bool {
        let value = value.into();
        let mut values = self.0.write();
        if values.iter().any(|v| same_value_zero(v, &value)) {
            return false;
        }
        values.push(value);
        true
    }

    pub fn delete(&self, value: &Value) -> bool {
        let mut values = self.0.write();
        let before = values.len();
        values.retain(|v| !same_value_zero(v, value));
        values.len() != before
    }

    pub fn values(&self) -> Vec<Value> {
        self.0.read().clone()
    }

    pub fn ptr_eq(&self, other: &SetValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn identity(&self) -> usize {
        arc_identity(&self.0)
    }

    pub(crate) fn push_value(&self, value: Value) {
        self.0.write().push(value);
    }
}

impl FromIterator<Value> for SetValue {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        let set = SetValue::new();
        for value in iter {
            set.add(value);
        }
        set
    }
}

// ============================================================================
//  Conversions
// ============================================================================

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<RegExp> for Value {
    fn from(r: RegExp) -> Self {
        Value::RegExp(r)
    }
}

impl From<ErrorValue> for Value {
    fn from(e: ErrorValue) -> Self {
        Value::Error(e)
    }
}

impl From<TypedArray> for Value {
    fn from(t: TypedArray) -> Self {
        Value::Bytes(t)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Array::from_vec(items))
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<MapValue> for Value {
    fn from(m: MapValue) -> Self {
        Value::Map(m)
    }
}

impl From<SetValue> for Value {
    fn from(s: SetValue) -> Self {
        Value::Set(s)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<ValueIterator> for Value {
    fn from(i: ValueIterator) -> Self {
        Value::Iterator(i)
    }
}

impl From<Transferable> for Value {
    fn from(t: Transferable) -> Self {
        Value::Transferable(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Undefined)
    }
}

// ============================================================================
//  Debug
// ============================================================================

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Bounded(self, 0).fmt(f)
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Bounded(&Value::Array(self.clone()), 0).fmt(f)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Bounded(&Value::Object(self.clone()), 0).fmt(f)
    }
}

impl fmt::Debug for MapValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Bounded(&Value::Map(self.clone()), 0).fmt(f)
    }
}

impl fmt::Debug for SetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Bounded(&Value::Set(self.clone()), 0).fmt(f)
    }
}

/// Depth-limited formatter, so cyclic values print in finite space.
struct Bounded<'a>(&'a Value, usize);

impl fmt::Debug for Bounded<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Bounded(value, depth) = *self;
        if depth > MAX_DEBUG_DEPTH && value.identity().is_some() {
            return f.write_str("...");
        }

        match value {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::BigInt(n) => write!(f, "{}n", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Date(d) => write!(f, "Date({})", d.to_rfc3339()),
            Value::RegExp(r) => write!(f, "/{}/{}", r.source, r.flags),
            Value::Error(e) => write!(f, "[{}]", e),
            Value::Bytes(t) => write!(f, "{}({} bytes)", t.kind.name(), t.bytes.len()),
            Value::Array(a) => f
                .debug_list()
                .entries(a.to_vec().iter().map(|v| Bounded(v, depth + 1)))
                .finish(),
            Value::Object(o) => f
                .debug_map()
                .entries(o.entries().iter().map(|(k, v)| (k, Bounded(v, depth + 1))))
                .finish(),
            Value::Map(m) => {
                f.write_str("Map ")?;
                f.debug_map()
                    .entries(
                        m.entries()
                            .iter()
                            .map(|(k, v)| (Bounded(k, depth + 1), Bounded(v, depth + 1))),
                    )
                    .finish()
            }
            Value::Set(s) => {
                f.write_str("Set ")?;
                f.debug_set()
                    .entries(s.values().iter().map(|v| Bounded(v, depth + 1)))
                    .finish()
            }
            Value::Function(func) => write!(f, "{:?}", func),
            Value::Iterator(i) => write!(f, "{:?}", i),
            Value::Transferable(t) => write!(f, "{:?}", t),
            Value::Custom(_) => f.write_str("[Custom]"),
        }
    }
}
