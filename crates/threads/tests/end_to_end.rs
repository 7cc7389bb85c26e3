//! End-to-end calls between two threads joined back to back.

use std::sync::Arc;

use futures::TryStreamExt;
use tokio::sync::Notify;

use threads::CallError;
use threads::Function;
use threads::JsonSerialization;
use threads::ManualFunctions;
use threads::Thread;
use threads::Value;
use threads::ValueIterator;
use threads::mock_transport::ChannelTransport;
use threads::mock_transport::JsonChannelTransport;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn greet() -> Function {
    Function::new(|args: Vec<Value>| async move {
        let get_name = args
            .first()
            .and_then(Value::as_function)
            .ok_or_else(|| CallError::type_error("greet expects a function"))?;
        let name = get_name.call(Vec::new()).await?;
        Ok::<_, CallError>(Value::from(format!("Hello, {}", name.as_str().unwrap_or_default())))
    })
}

// --- Scenario 1: hello / world ---

#[tokio::test]
async fn test_hello_world() -> anyhow::Result<()> {
    init_tracing();
    let (a, b) = ChannelTransport::pair();
    let _side_a = Thread::builder(a)
        .name("a")
        .export("hello", Function::sync(|_| Ok(Value::from("world"))))
        .build()?;
    let side_b = Thread::builder(b).name("b").build()?;

    let result = side_b.imports().call("hello", Vec::new()).await?;
    assert_eq!(result, Value::from("world"));
    assert_eq!(side_b.pending_calls(), 0);
    Ok(())
}

// --- Scenario 2: function arguments become callable proxies ---

#[tokio::test]
async fn test_greet_with_callback() -> anyhow::Result<()> {
    init_tracing();
    let (a, b) = ChannelTransport::pair();
    let _side_a = Thread::builder(a).export("greet", greet()).build()?;

    let functions = Arc::new(ManualFunctions::new());
    let side_b = Thread::builder(b).functions(functions.clone()).build()?;

    let get_name = Function::sync(|_| Ok(Value::from("Ada")));
    let result = side_b
        .imports()
        .call("greet", vec![Value::Function(get_name)])
        .await?;
    assert_eq!(result, Value::from("Hello, Ada"));

    // The callee did not retain the callback, so it was released when the
    // call settled, before the result was sent.
    assert_eq!(functions.registered(), 0);
    Ok(())
}

#[tokio::test]
async fn test_imports_get() -> anyhow::Result<()> {
    let (a, b) = ChannelTransport::pair();
    let _side_a = Thread::builder(a)
        .export("add", Function::sync(|args| {
            let sum: f64 = args.iter().filter_map(Value::as_f64).sum();
            Ok(Value::from(sum))
        }))
        .build()?;
    let side_b = Thread::builder(b).build()?;

    let add = side_b.imports().get("add").expect("no allow-list");
    let result = add.call(vec![Value::from(2), Value::from(3)]).await?;
    assert_eq!(result, Value::from(5));
    Ok(())
}

// --- Scenario 3: async generators ---

#[tokio::test]
async fn test_async_generator() -> anyhow::Result<()> {
    init_tracing();
    let (a, b) = ChannelTransport::pair();
    let _side_a = Thread::builder(a)
        .export("numbers", Function::sync(|_| {
            let items = futures::stream::iter([1, 2, 3].map(Value::from));
            Ok(Value::Iterator(ValueIterator::from_stream(items)))
        }))
        .build()?;
    let side_b = Thread::builder(b).build()?;

    let items: Vec<Value> = side_b
        .imports()
        .call("numbers", Vec::new())
        .iterate()
        .try_collect()
        .await?;
    assert_eq!(items, vec![Value::from(1), Value::from(2), Value::from(3)]);
    Ok(())
}

#[tokio::test]
async fn test_iterator_finish_early() -> anyhow::Result<()> {
    let (a, b) = ChannelTransport::pair();
    let _side_a = Thread::builder(a)
        .export("letters", Function::sync(|_| {
            Ok(Value::Iterator(ValueIterator::from_iter(
                ["a", "b", "c"].map(Value::from),
            )))
        }))
        .build()?;
    let side_b = Thread::builder(b).build()?;

    let letters = side_b.imports().call("letters", Vec::new()).await?;
    let iterator = letters.as_iterator().expect("an iterator");
    let first = iterator.next().await?;
    assert_eq!(first.value, Value::from("a"));
    assert!(!first.done);

    let finished = iterator.finish(Value::Undefined).await?;
    assert!(finished.done);
    assert!(iterator.next().await?.done);
    Ok(())
}

#[tokio::test]
async fn test_iterate_non_iterable() -> anyhow::Result<()> {
    let (a, b) = ChannelTransport::pair();
    let _side_a = Thread::builder(a)
        .export("one", Function::sync(|_| Ok(Value::from(1))))
        .build()?;
    let side_b = Thread::builder(b).build()?;

    let result: Result<Vec<Value>, CallError> = side_b
        .imports()
        .call("one", Vec::new())
        .iterate()
        .try_collect()
        .await;
    assert!(matches!(result, Err(CallError::Thrown(e)) if e.name == "TypeError"));
    Ok(())
}

// --- Scenario 4: closing while a call is outstanding ---

#[tokio::test]
async fn test_abort_rejects_outstanding_call() -> anyhow::Result<()> {
    init_tracing();
    let (a, b) = ChannelTransport::pair();
    let entered = Arc::new(Notify::new());

    let controller = threads::AbortController::new();
    let notify = entered.clone();
    let _side_a = Thread::builder(a)
        .signal(controller.signal())
        .export("slow", Function::new(move |_| {
            let notify = notify.clone();
            async move {
                notify.notify_one();
                futures::future::pending::<()>().await;
                Ok::<_, CallError>(Value::Undefined)
            }
        }))
        .build()?;
    let side_b = Thread::builder(b).build()?;

    let call = side_b.imports().call("slow", Vec::new());
    let call = tokio::spawn(call);
    entered.notified().await;

    controller.abort();
    assert_eq!(call.await?, Err(CallError::ThreadClosed));

    side_b.closed().await;
    assert!(side_b.is_closed());
    assert_eq!(
        side_b.imports().call("slow", Vec::new()).await,
        Err(CallError::ThreadClosed)
    );
    Ok(())
}

// --- Errors cross the boundary ---

#[tokio::test]
async fn test_thrown_errors_are_carried_back() -> anyhow::Result<()> {
    let (a, b) = ChannelTransport::pair();
    let _side_a = Thread::builder(a)
        .export("fail", Function::sync(|_| {
            Err(CallError::Thrown(
                threads::ErrorValue::named("RangeError", "out of range").with_stack("at fail"),
            ))
        }))
        .export("panic", Function::sync(|_| panic!("boom")))
        .build()?;
    let side_b = Thread::builder(b).build()?;

    match side_b.imports().call("fail", Vec::new()).await {
        Err(CallError::Thrown(e)) => {
            assert_eq!(e.name, "RangeError");
            assert_eq!(e.message, "out of range");
            assert_eq!(e.stack.as_deref(), Some("at fail"));
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let missing = side_b.imports().call("missing", Vec::new()).await;
    assert_eq!(
        missing,
        Err(CallError::thrown("No 'missing' method is exported from this thread."))
    );

    assert!(matches!(
        side_b.imports().call("panic", Vec::new()).await,
        Err(CallError::Thrown(_))
    ));

    // The channel survives all of the above.
    assert!(!side_b.is_closed());
    Ok(())
}

// --- JSON text transport ---

#[tokio::test]
async fn test_json_transport() -> anyhow::Result<()> {
    init_tracing();
    let (a, b) = JsonChannelTransport::pair();
    let _side_a = Thread::builder(a)
        .serialization(Arc::new(JsonSerialization::new()))
        .export("greet", greet())
        .export("echo", Function::sync(|mut args| Ok(args.pop().unwrap_or(Value::Undefined))))
        .build()?;
    let side_b = Thread::builder(b)
        .serialization(Arc::new(JsonSerialization::new()))
        .build()?;

    let get_name = Function::sync(|_| Ok(Value::from("Grace")));
    let result = side_b
        .imports()
        .call("greet", vec![Value::Function(get_name)])
        .await?;
    assert_eq!(result, Value::from("Hello, Grace"));

    let map = threads::value::MapValue::new();
    map.insert(1, "one");
    map.insert(Value::Undefined, Value::BigInt(1 << 80));
    let set: threads::value::SetValue = [Value::from(1), Value::Number(f64::NAN)].into_iter().collect();
    let value = Value::array([Value::Map(map), Value::Set(set), Value::Undefined]);

    let echoed = side_b.imports().call("echo", vec![value.clone()]).await?;
    assert_eq!(echoed, value);
    Ok(())
}
