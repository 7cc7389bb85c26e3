//! Unit tests for values, memory, messages and the JSON codec.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::abort::AbortController;
use crate::error::CallError;
use crate::error::ErrorValue;
use crate::function::CallFuture;
use crate::function::Callable;
use crate::function::Function;
use crate::json;
use crate::memory;
use crate::memory::MemoryManageable;
use crate::memory::MemoryRetainer;
use crate::memory::RetainedBy;
use crate::memory::StackFrame;
use crate::message::Message;
use crate::message;
use crate::value::Array;
use crate::value::MapValue;
use crate::value::Object;
use crate::value::SetValue;
use crate::value::Value;
use crate::value::same_value_zero;

/// A callable with a retain count, standing in for a remote proxy.
#[derive(Default)]
struct Counted {
    count: AtomicUsize,
    retained_by: RetainedBy,
}

impl Callable for Counted {
    fn call(&self, _args: Vec<Value>) -> CallFuture {
        Box::pin(std::future::ready(Ok(Value::Undefined)))
    }

    fn memory(&self) -> Option<&dyn MemoryManageable> {
        Some(self)
    }
}

impl MemoryManageable for Counted {
    fn retain(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1));
    }

    fn retain_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn retained_by(&self) -> &RetainedBy {
        &self.retained_by
    }
}

fn counted() -> (Arc<Counted>, Function) {
    let counted = Arc::new(Counted::default());
    let function = Function::from_callable(counted.clone());
    (counted, function)
}

// --- Values ---

#[test]
fn test_deep_eq_nested() {
    let a = Value::object([
        ("list", Value::array([1, 2, 3])),
        ("name", Value::from("ada")),
    ]);
    let b = Value::object([
        ("name", Value::from("ada")),
        ("list", Value::array([1, 2, 3])),
    ]);
    let c = Value::object([
        ("name", Value::from("ada")),
        ("list", Value::array([1, 2])),
    ]);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_deep_eq_terminates_on_cycles() {
    let a = Object::new();
    a.insert("self", Value::Object(a.clone()));
    let b = Object::new();
    b.insert("self", Value::Object(b.clone()));
    assert_eq!(Value::Object(a), Value::Object(b));
}

#[test]
fn test_same_value_zero() {
    assert!(same_value_zero(&Value::Number(f64::NAN), &Value::Number(f64::NAN)));
    assert!(same_value_zero(&Value::Number(0.0), &Value::Number(-0.0)));
    assert!(!same_value_zero(&Value::from("1"), &Value::from(1)));

    let array = Array::new();
    assert!(same_value_zero(&Value::Array(array.clone()), &Value::Array(array)));
    assert!(!same_value_zero(&Value::Array(Array::new()), &Value::Array(Array::new())));
}

#[test]
fn test_map_and_set_keys() {
    let map = MapValue::new();
    map.insert(Value::Number(f64::NAN), "first");
    map.insert(Value::Number(f64::NAN), "second");
    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&Value::Number(f64::NAN)), Some(Value::from("second")));
    assert!(map.delete(&Value::Number(f64::NAN)));
    assert!(map.is_empty());

    let set: SetValue = [Value::from(1), Value::from(1), Value::from(2)].into_iter().collect();
    assert_eq!(set.len(), 2);
    assert!(set.has(&Value::from(2)));
}

#[test]
fn test_debug_is_bounded_on_cycles() {
    let array = Array::new();
    array.push(Value::Array(array.clone()));
    let rendered = format!("{:?}", Value::Array(array));
    assert!(!rendered.is_empty());
}

// --- Errors ---

#[test]
fn test_call_error_wire_names() {
    assert_eq!(
        CallError::from_error_value(CallError::ThreadClosed.to_error_value()),
        CallError::ThreadClosed
    );
    assert_eq!(
        CallError::from_error_value(CallError::Released.to_error_value()),
        CallError::Released
    );

    let thrown = ErrorValue::named("RangeError", "too big");
    assert_eq!(
        CallError::from_error_value(thrown.clone()),
        CallError::Thrown(thrown)
    );
}

// --- Memory ---

#[test]
fn test_retain_release_walks_containers() {
    let (counted, function) = counted();
    let value = Value::object([
        ("callback", Value::Function(function.clone())),
        ("again", Value::array([Value::Function(function)])),
    ]);

    assert!(memory::retain(&value));
    assert_eq!(counted.retain_count(), 2);
    assert!(memory::release(&value));
    assert_eq!(counted.retain_count(), 0);

    assert!(!memory::retain(&Value::from("plain")));
    assert!(!memory::retain(&Value::Function(Function::sync(|_| Ok(Value::Null)))));
}

#[test]
fn test_retain_terminates_on_cycles() {
    let (counted, function) = counted();
    let object = Object::new();
    object.insert("self", Value::Object(object.clone()));
    object.insert("f", Value::Function(function));

    assert!(memory::retain(&Value::Object(object)));
    assert_eq!(counted.retain_count(), 1);
}

#[test]
fn test_stack_frame_release() {
    let (counted, function) = counted();
    let frame = StackFrame::new();

    memory::retain_into(&frame, &Value::array([Value::Function(function)]));
    assert_eq!(counted.retain_count(), 1);
    assert!(counted.retained_by().contains(frame.id()));
    assert_eq!(frame.len(), 1);

    frame.release();
    assert_eq!(counted.retain_count(), 0);
    assert!(counted.retained_by().is_empty());
    assert!(frame.is_empty());

    frame.release();
    assert_eq!(counted.retain_count(), 0);
}

#[test]
fn test_stack_frame_releases_on_drop() {
    let (counted, function) = counted();
    {
        let frame = StackFrame::new();
        frame.add(&function);
        assert_eq!(counted.retain_count(), 1);
    }
    assert_eq!(counted.retain_count(), 0);
}

#[test]
fn test_is_memory_manageable() {
    let (_, function) = counted();
    assert!(memory::is_memory_manageable(&Value::Function(function)));
    assert!(!memory::is_memory_manageable(&Value::Function(Function::sync(|_| Ok(Value::Null)))));
    assert!(!memory::is_memory_manageable(&Value::Null));
}

// --- Messages ---

#[test]
fn test_message_shapes() {
    let call = Message::Call {
        id: "abc".into(),
        name: "hello".into(),
        args: Value::array(Vec::<Value>::new()),
    };
    let value = call.clone().into_value();
    assert_eq!(value.as_array().map(|a| a.len()), Some(4));
    assert_eq!(Message::parse(&value), Some(call));

    let result = Message::FunctionResult {
        id: "abc".into(),
        value: Value::from(1),
        error: None,
    };
    let value = result.clone().into_value();
    assert_eq!(value.as_array().map(|a| a.len()), Some(3));
    assert_eq!(Message::parse(&value), Some(result));

    let terminate = Message::Terminate.into_value();
    assert_eq!(Message::parse(&terminate), Some(Message::Terminate));
}

#[test]
fn test_message_parse_rejects_foreign_traffic() {
    assert_eq!(Message::parse(&Value::from("hello")), None);
    assert_eq!(Message::parse(&Value::array([99])), None);
    assert_eq!(Message::parse(&Value::array([0.5])), None);
    assert_eq!(Message::parse(&Value::array([Value::from(0), Value::from(7)])), None);
    assert_eq!(Message::parse(&Value::object([("type", "ping")])), None);
}

#[test]
fn test_message_error_slot() {
    let error = ErrorValue::named("TypeError", "bad").with_stack("at line 1");
    let slot = message::error_to_value(&error);
    assert_eq!(message::error_from_value(&slot), error);

    // A null error slot means "no error".
    let value = Value::array([Value::from(1), Value::from("id"), Value::from(5), Value::Null]);
    assert_eq!(
        Message::parse(&value),
        Some(Message::CallResult {
            id: "id".into(),
            value: Value::from(5),
            error: None,
        })
    );
}

#[test]
fn test_random_ids() {
    let a = message::random_id();
    let b = message::random_id();
    assert_eq!(a.len(), 16);
    assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_ne!(a, b);
}

// --- JSON ---

#[test]
fn test_json_text_round_trip() {
    let value = Value::object([
        ("n", Value::from(42)),
        ("f", Value::from(1.5)),
        ("s", Value::from("text")),
        ("list", Value::array([Value::Bool(true), Value::Null])),
    ]);
    let text = json::to_string(&value).unwrap();
    assert_eq!(text, r#"{"f":1.5,"list":[true,null],"n":42,"s":"text"}"#);
    assert_eq!(json::from_str(&text).unwrap(), value);
}

#[test]
fn test_json_rejects_rich_values() {
    let date = Value::Date(chrono::Utc::now());
    assert_eq!(json::to_json(&date), Err(json::Error::Unsupported("Date")));

    let array = Array::new();
    array.push(Value::Array(array.clone()));
    assert_eq!(
        json::to_json(&Value::Array(array)),
        Err(json::Error::RecursionLimitExceeded)
    );

    assert!(matches!(json::from_str("{"), Err(json::Error::Parse(_))));
}

#[test]
fn test_json_undefined_is_null() {
    assert_eq!(json::to_string(&Value::Undefined).unwrap(), "null");
}

// --- Abort ---

#[test]
fn test_abort_listeners_run_once() {
    let controller = AbortController::new();
    let signal = controller.signal();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    signal.on_abort(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = hits.clone();
    let removed = signal.on_abort(move || {
        counter.fetch_add(10, Ordering::SeqCst);
    });
    assert!(signal.remove_listener(removed.unwrap()));

    controller.abort();
    controller.abort();
    assert!(signal.is_aborted());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let counter = hits.clone();
    let id = signal.on_abort(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(id.is_none());
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_abort_wakes_waiters() {
    let controller = AbortController::new();
    let signal = controller.signal();
    let waiter = tokio::spawn(async move { signal.aborted().await });

    tokio::task::yield_now().await;
    controller.abort();
    waiter.await.unwrap();
}
