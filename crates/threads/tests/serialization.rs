//! Both serialization strategies, driven directly against a live thread.

use std::any::Any;
use std::sync::Arc;

use chrono::TimeZone;
use chrono::Utc;

use threads::AbortController;
use threads::ErrorValue;
use threads::Function;
use threads::JsonSerialization;
use threads::StructuredCloneSerialization;
use threads::Thread;
use threads::Value;
use threads::json;
use threads::mark_as_transferable;
use threads::mock_transport::ChannelTransport;
use threads::serialization::Serializable;
use threads::serialization::Serialization;
use threads::serialization::SerializationHooks;
use threads::serialization::tags;
use threads::value::Array;
use threads::value::MapValue;
use threads::value::Object;
use threads::value::RegExp;
use threads::value::SetValue;
use threads::value::TypedArray;
use threads::value::TypedArrayKind;

/// A thread plus the peer end of its transport, which must stay alive.
fn thread() -> (Thread, ChannelTransport) {
    let (a, b) = ChannelTransport::pair();
    (Thread::builder(a).build().expect("inside a runtime"), b)
}

/// A value touching every built-in kind, without functions or cycles.
fn rich_value() -> Value {
    let map = MapValue::new();
    map.insert("key", 1);
    map.insert(Value::array([1, 2]), Value::Null);

    let set = SetValue::new();
    set.add("a");
    set.add(Value::Number(f64::INFINITY));

    Value::object([
        ("undefined", Value::Undefined),
        ("null", Value::Null),
        ("bool", Value::Bool(false)),
        ("int", Value::from(42)),
        ("float", Value::from(-0.25)),
        ("nan", Value::Number(f64::NAN)),
        ("big", Value::BigInt(-123_456_789_012_345_678_901_234_567)),
        ("text", Value::from("héllo")),
        ("date", Value::Date(Utc.timestamp_millis_opt(1_700_000_000_123).unwrap())),
        ("regexp", Value::RegExp(RegExp::new("^a+$", "gi"))),
        ("error", Value::Error(ErrorValue::named("TypeError", "bad").with_stack("at x"))),
        ("bytes", Value::Bytes(TypedArray::new(TypedArrayKind::Uint8Array, vec![0, 1, 255]))),
        ("map", Value::Map(map)),
        ("set", Value::Set(set)),
        ("list", Value::array([Value::from("x"), Value::Undefined])),
    ])
}

#[tokio::test]
async fn test_structured_clone_round_trip() {
    let (thread, _peer) = thread();
    let strategy = StructuredCloneSerialization::new();
    let value = rich_value();

    let encoded = strategy.serialize(&value, &thread, None);
    // Rich values pass straight through.
    assert!(matches!(encoded.get("date"), Some(Value::Date(_))));
    assert!(matches!(encoded.get("map"), Some(Value::Map(_))));

    assert_eq!(strategy.deserialize(&encoded, &thread), value);
}

#[tokio::test]
async fn test_json_round_trip_through_text() {
    let (thread, _peer) = thread();
    let strategy = JsonSerialization::new();
    let value = rich_value();

    let encoded = strategy.serialize(&value, &thread, None);
    assert_eq!(
        encoded.get("date").and_then(|d| d.get(tags::DATE)),
        Some(Value::from("2023-11-14T22:13:20.123Z"))
    );
    assert_eq!(
        encoded.get("undefined").and_then(|u| u.get(tags::UNDEFINED)),
        Some(Value::Bool(true))
    );

    let text = json::to_string(&encoded).expect("json-safe");
    let decoded = strategy.deserialize(&json::from_str(&text).expect("valid json"), &thread);
    assert_eq!(decoded, value);
}

#[tokio::test]
async fn test_cycles_are_preserved() {
    let (thread, _peer) = thread();
    let object = Object::new();
    let list = Array::new();
    object.insert("list", Value::Array(list.clone()));
    list.push(Value::Object(object.clone()));
    let value = Value::Object(object);

    for strategy in [
        Box::new(StructuredCloneSerialization::new()) as Box<dyn Serialization>,
        Box::new(JsonSerialization::new()),
    ] {
        let encoded = strategy.serialize(&value, &thread, None);
        let decoded = strategy.deserialize(&encoded, &thread);

        let Value::Object(root) = &decoded else {
            panic!("expected an object");
        };
        let inner = root.get("list").and_then(|l| l.as_array()).expect("list");
        let back = inner.get(0).and_then(|o| o.as_object()).expect("object");
        assert!(back.ptr_eq(root));
        assert_eq!(decoded, value);
    }
}

#[tokio::test]
async fn test_json_map_cycle() {
    let (thread, _peer) = thread();
    let strategy = JsonSerialization::new();
    let map = MapValue::new();
    map.insert("self", Value::Map(map.clone()));

    let decoded = strategy.deserialize(&strategy.serialize(&Value::Map(map), &thread, None), &thread);
    let Value::Map(decoded) = decoded else {
        panic!("expected a map");
    };
    let inner = decoded.get(&Value::from("self"));
    assert!(matches!(inner, Some(Value::Map(m)) if m.ptr_eq(&decoded)));
}

#[tokio::test]
async fn test_functions_become_ids() {
    let (thread, _peer) = thread();
    let strategy = JsonSerialization::new();
    let function = Function::sync(|_| Ok(Value::Null));
    let value = Value::array([Value::Function(function.clone()), Value::Function(function)]);

    let encoded = strategy.serialize(&value, &thread, None);
    let items = encoded.as_array().expect("array").to_vec();
    let first = items[0].get(tags::FUNCTION).expect("wrapper");
    assert!(first.as_str().is_some());
    assert_eq!(items[1].get(tags::FUNCTION), Some(first.clone()));

    let id = first.as_str().unwrap_or_default().to_string();
    assert!(thread.functions().get(&id).is_some());
    assert!(thread.functions().release(&id));
    assert!(!thread.functions().release(&id));
}

#[tokio::test]
async fn test_transferables_are_collected() {
    let (thread, _peer) = thread();
    let strategy = StructuredCloneSerialization::new();
    let value = Value::object([
        ("buffer", mark_as_transferable(vec![1u8, 2, 3])),
        ("plain", Value::from(1)),
    ]);

    let mut transferables = Vec::new();
    let encoded = strategy.serialize(&value, &thread, Some(&mut transferables));
    assert_eq!(transferables.len(), 1);
    assert_eq!(transferables[0].downcast_ref::<Vec<u8>>(), Some(&vec![1u8, 2, 3]));
    assert_eq!(encoded, value);
}

#[tokio::test]
async fn test_unknown_tags_stay_plain() {
    let (thread, _peer) = thread();
    let strategy = JsonSerialization::new();
    let value = Value::object([("_@zzz", Value::from(1))]);
    assert_eq!(strategy.deserialize(&value, &thread), value);

    let malformed = Value::object([(tags::DATE, Value::from("not a date"))]);
    assert_eq!(strategy.deserialize(&malformed, &thread), malformed);
}

/// Encodes regular expressions as `{"pattern": "/source/flags"}`.
struct PatternHooks;

impl SerializationHooks for PatternHooks {
    fn serialize(&self, value: &Value, _encode: &mut dyn FnMut(&Value) -> Value) -> Option<Value> {
        let Value::RegExp(regexp) = value else {
            return None;
        };
        let pattern = format!("/{}/{}", regexp.source, regexp.flags);
        Some(Value::object([("pattern", pattern)]))
    }

    fn deserialize(&self, value: &Value, _decode: &mut dyn FnMut(&Value) -> Value) -> Option<Value> {
        let pattern = value.get("pattern")?;
        let (source, flags) = pattern.as_str()?.strip_prefix('/')?.rsplit_once('/')?;
        Some(Value::RegExp(RegExp::new(source, flags)))
    }
}

#[tokio::test]
async fn test_hooks_take_precedence() {
    let (thread, _peer) = thread();
    let strategy = JsonSerialization::with_hooks(PatternHooks);
    let value = Value::array([Value::RegExp(RegExp::new("a/b", "u"))]);

    let encoded = strategy.serialize(&value, &thread, None);
    let first = encoded.as_array().and_then(|a| a.get(0)).expect("item");
    assert_eq!(first.get("pattern"), Some(Value::from("/a/b/u")));
    assert_eq!(strategy.deserialize(&encoded, &thread), value);
}

struct Point {
    x: f64,
    y: f64,
}

impl Serializable for Point {
    fn serialize(&self, encode: &mut dyn FnMut(&Value) -> Value) -> Value {
        encode(&Value::object([("x", self.x), ("y", self.y)]))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[tokio::test]
async fn test_custom_serializable() {
    let (thread, _peer) = thread();
    let strategy = StructuredCloneSerialization::new();
    let value = Value::Custom(Arc::new(Point { x: 1.0, y: -2.0 }));

    let encoded = strategy.serialize(&value, &thread, None);
    assert_eq!(encoded, Value::object([("x", 1.0), ("y", -2.0)]));
}

#[tokio::test]
async fn test_distinct_custom_values_encode_separately() {
    let (thread, _peer) = thread();
    let strategy = StructuredCloneSerialization::new();
    let points = Value::array((0..8).map(|i| {
        Value::Custom(Arc::new(Point { x: f64::from(i), y: 0.0 }))
    }));

    let encoded = strategy.serialize(&points, &thread, None);
    let expected = Value::array((0..8).map(|i| Value::object([("x", f64::from(i)), ("y", 0.0)])));
    assert_eq!(encoded, expected);
}

#[tokio::test]
async fn test_two_signals_keep_their_own_start() {
    let (thread, _peer) = thread();
    let strategy = JsonSerialization::new();
    let first = AbortController::new();
    let second = AbortController::new();

    let signals = Value::array([Value::from(first.signal()), Value::from(second.signal())]);
    let encoded = strategy.serialize(&signals, &thread, None);
    let start = |index: usize| {
        encoded
            .as_array()
            .and_then(|items| items.get(index))
            .and_then(|signal| signal.get("start"))
            .and_then(|start| start.get(tags::FUNCTION))
            .expect("a start function id")
    };
    assert_ne!(start(0), start(1));
}

#[tokio::test]
async fn test_abort_signal_serializes_itself() {
    let (thread, _peer) = thread();
    let strategy = JsonSerialization::new();
    let controller = AbortController::new();

    let live = strategy.serialize(&Value::from(controller.signal()), &thread, None);
    assert_eq!(live.get("aborted"), Some(Value::Bool(false)));
    assert!(live.get("start").and_then(|s| s.get(tags::FUNCTION)).is_some());

    controller.abort();
    let aborted = strategy.serialize(&Value::from(controller.signal()), &thread, None);
    assert_eq!(aborted, Value::object([("aborted", true)]));
}
