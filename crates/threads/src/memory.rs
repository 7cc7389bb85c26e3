//! # Memory Model
//!
//! Reference counting for function proxies whose target lives on the other
//! side of a thread. Everything else is copied by value, so these proxies are
//! the only things whose lifetime has to be coordinated across the boundary:
//! the memory model answers "when may the origin forget this function?".
//!
//! - [`MemoryManageable`] is implemented by proxies that track a retain count.
//! - [`MemoryRetainer`] is anything that holds retains on behalf of a scope.
//! - [`StackFrame`] is the retainer used for a single inbound call.

use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use crate::function::Function;
use crate::value::Value;

static NEXT_RETAINER: AtomicU64 = AtomicU64::new(1);

/// Identifies a retainer in a manageable's [`RetainedBy`] set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetainerId(u64);

impl RetainerId {
    pub fn next() -> Self {
        Self(NEXT_RETAINER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The set of retainers currently holding a manageable value.
#[derive(Debug, Default)]
pub struct RetainedBy(Mutex<HashSet<RetainerId>>);

impl RetainedBy {
    pub fn insert(&self, retainer: RetainerId) -> bool {
        self.0.lock().insert(retainer)
    }

    pub fn remove(&self, retainer: RetainerId) -> bool {
        self.0.lock().remove(&retainer)
    }

    pub fn contains(&self, retainer: RetainerId) -> bool {
        self.0.lock().contains(&retainer)
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// A value with an explicit retain count.
///
/// Releasing more often than retaining is a caller bug; implementations log
/// it and ignore the extra release.
pub trait MemoryManageable: Send + Sync {
    fn retain(&self);
    fn release(&self);
    fn retain_count(&self) -> usize;
    fn retained_by(&self) -> &RetainedBy;
}

/// Something that holds retains on manageable functions.
pub trait MemoryRetainer {
    fn id(&self) -> RetainerId;

    /// Retains `function` on behalf of this retainer. Functions without
    /// memory hooks are ignored.
    fn add(&self, function: &Function);
}

/// Retains everything added to it until [`StackFrame::release`] (or drop).
pub struct StackFrame {
    id: RetainerId,
    memory: Mutex<Vec<Function>>,
}

impl StackFrame {
    pub fn new() -> Self {
        Self {
            id: RetainerId::next(),
            memory: Mutex::new(Vec::new()),
        }
    }

    /// Number of retains currently held.
    pub fn len(&self) -> usize {
        self.memory.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.lock().is_empty()
    }

    /// Releases every retain held by this frame. Safe to call twice.
    pub fn release(&self) {
        let held = std::mem::take(&mut *self.memory.lock());
        for function in held {
            if let Some(memory) = function.memory() {
                memory.retained_by().remove(self.id);
                memory.release();
            }
        }
    }
}

impl Default for StackFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRetainer for StackFrame {
    fn id(&self) -> RetainerId {
        self.id
    }

    fn add(&self, function: &Function) {
        let Some(memory) = function.memory() else {
            return;
        };
        memory.retained_by().insert(self.id);
        memory.retain();
        self.memory.lock().push(function.clone());
    }
}

impl Drop for StackFrame {
    fn drop(&mut self) {
        self.release();
    }
}

/// True if `value` is a function with retain/release hooks.
pub fn is_memory_manageable(value: &Value) -> bool {
    matches!(value, Value::Function(f) if f.memory().is_some())
}

/// Retains every manageable function reachable from `value`.
/// Returns whether anything was retained.
pub fn retain(value: &Value) -> bool {
    visit_manageable(value, &mut |function| {
        if let Some(memory) = function.memory() {
            memory.retain();
        }
    })
}

/// Releases every manageable function reachable from `value`.
/// Returns whether anything was released.
pub fn release(value: &Value) -> bool {
    visit_manageable(value, &mut |function| {
        if let Some(memory) = function.memory() {
            memory.release();
        }
    })
}

/// Adds every manageable function reachable from `value` to `retainer`.
pub fn retain_into(retainer: &dyn MemoryRetainer, value: &Value) -> bool {
    visit_manageable(value, &mut |function| retainer.add(function))
}

fn visit_manageable(value: &Value, visit: &mut dyn FnMut(&Function)) -> bool {
    let mut seen = HashSet::new();
    walk(value, &mut seen, visit)
}

fn walk(value: &Value, seen: &mut HashSet<usize>, visit: &mut dyn FnMut(&Function)) -> bool {
    if let Some(identity) = value.identity() {
        if !seen.insert(identity) {
            return false;
        }
    }

    let mut found = false;
    match value {
        Value::Function(function) => {
            if function.memory().is_some() {
                visit(function);
                found = true;
            }
        }
        Value::Array(items) => {
            for item in items.to_vec() {
                found |= walk(&item, seen, visit);
            }
        }
        Value::Object(object) => {
            for (_, item) in object.entries() {
                found |= walk(&item, seen, visit);
            }
        }
        Value::Map(map) => {
            for (key, item) in map.entries() {
                found |= walk(&key, seen, visit);
                found |= walk(&item, seen, visit);
            }
        }
        Value::Set(set) => {
            for item in set.values() {
                found |= walk(&item, seen, visit);
            }
        }
        Value::Iterator(iterator) => {
            let methods = [
                Some(iterator.next_fn()),
                iterator.return_fn(),
                iterator.throw_fn(),
            ];
            for function in methods.into_iter().flatten() {
                found |= walk(&Value::Function(function.clone()), seen, visit);
            }
        }
        _ => {}
    }
    found
}
