//! # Iterators
//!
//! Iterators cross the boundary as their three protocol methods (`next`,
//! `return`, `throw`), each of which is an ordinary [`Function`]. The remote
//! side rebuilds a [`ValueIterator`] from the proxies and can drain it as a
//! `Stream`.
//!
//! A step is the object `{done, value}`.

use std::fmt;
use std::sync::Arc;

use futures::Stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::Mutex;

use crate::error::CallError;
use crate::error::ErrorValue;
use crate::function::Function;
use crate::memory;
use crate::value::Value;

/// Whether the iterator was produced by a sync or an async generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorKind {
    Sync,
    Async,
}

/// A single `{done, value}` step.
#[derive(Debug, Clone, PartialEq)]
pub struct IteratorStep {
    pub done: bool,
    pub value: Value,
}

impl IteratorStep {
    fn from_value(value: &Value) -> Self {
        Self {
            done: value.get("done").and_then(|d| d.as_bool()).unwrap_or(false),
            value: value.get("value").unwrap_or(Value::Undefined),
        }
    }

    fn into_value(self) -> Value {
        Value::object([("done", Value::Bool(self.done)), ("value", self.value)])
    }
}

type Source = Arc<Mutex<Option<BoxStream<'static, Result<Value, CallError>>>>>;

#[derive(Clone)]
pub struct ValueIterator {
    kind: IteratorKind,
    next: Function,
    return_fn: Option<Function>,
    throw_fn: Option<Function>,
}

impl ValueIterator {
    pub fn from_parts(
        kind: IteratorKind,
        next: Function,
        return_fn: Option<Function>,
        throw_fn: Option<Function>,
    ) -> Self {
        Self {
            kind,
            next,
            return_fn,
            throw_fn,
        }
    }

    /// An async iterator over the items of `stream`.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        Self::from_source(IteratorKind::Async, stream.map(Ok).boxed())
    }

    /// An async iterator over a stream that may fail part way.
    pub fn from_try_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Value, CallError>> + Send + 'static,
    {
        Self::from_source(IteratorKind::Async, stream.boxed())
    }

    /// A sync iterator over `items`.
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        let stream = futures::stream::iter(items.into_iter().map(Ok));
        Self::from_source(IteratorKind::Sync, stream.boxed())
    }

    fn from_source(kind: IteratorKind, stream: BoxStream<'static, Result<Value, CallError>>) -> Self {
        let source: Source = Arc::new(Mutex::new(Some(stream)));

        let next = {
            let source = source.clone();
            Function::new(move |_args| {
                let source = source.clone();
                async move {
                    let mut guard = source.lock().await;
                    let Some(stream) = guard.as_mut() else {
                        return Ok(finished(Value::Undefined));
                    };
                    match stream.next().await {
                        Some(Ok(value)) => Ok(IteratorStep { done: false, value }.into_value()),
                        Some(Err(e)) => {
                            *guard = None;
                            Err(e)
                        }
                        None => {
                            *guard = None;
                            Ok(finished(Value::Undefined))
                        }
                    }
                }
            })
        };

        let return_fn = {
            let source = source.clone();
            Function::new(move |args| {
                let source = source.clone();
                async move {
                    source.lock().await.take();
                    Ok(finished(args.into_iter().next().unwrap_or(Value::Undefined)))
                }
            })
        };

        let throw_fn = Function::new(move |args| {
            let source = source.clone();
            async move {
                source.lock().await.take();
                Err(thrown(args.into_iter().next().unwrap_or(Value::Undefined)))
            }
        });

        Self::from_parts(kind, next, Some(return_fn), Some(throw_fn))
    }

    pub fn kind(&self) -> IteratorKind {
        self.kind
    }

    pub fn next_fn(&self) -> &Function {
        &self.next
    }

    pub fn return_fn(&self) -> Option<&Function> {
        self.return_fn.as_ref()
    }

    pub fn throw_fn(&self) -> Option<&Function> {
        self.throw_fn.as_ref()
    }

    /// Advances the iterator by one step.
    pub async fn next(&self) -> Result<IteratorStep, CallError> {
        let step = self.next.call(Vec::new()).await?;
        Ok(IteratorStep::from_value(&step))
    }

    /// Finishes the iterator early, as `break` in a `for` loop would.
    pub async fn finish(&self, value: Value) -> Result<IteratorStep, CallError> {
        match &self.return_fn {
            Some(f) => Ok(IteratorStep::from_value(&f.call(vec![value]).await?)),
            None => Ok(IteratorStep { done: true, value }),
        }
    }

    /// Drains the iterator. The stream ends after the first error.
    ///
    /// Remote methods are retained while the stream runs and released once
    /// it finishes, fails or is dropped, so the origin can forget them.
    pub fn into_stream(self) -> BoxStream<'static, Result<Value, CallError>> {
        let lease = Lease::new(self);
        futures::stream::unfold(Some(lease), |state| async move {
            let lease = state?;
            match lease.iterator().next().await {
                Ok(step) if step.done => None,
                Ok(step) => Some((Ok(step.value), Some(lease))),
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }

    pub fn ptr_eq(&self, other: &ValueIterator) -> bool {
        self.next.ptr_eq(&other.next)
    }
}

impl fmt::Debug for ValueIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            IteratorKind::Sync => f.write_str("[Iterator]"),
            IteratorKind::Async => f.write_str("[AsyncIterator]"),
        }
    }
}

/// Holds one retain on an iterator's manageable methods until dropped.
struct Lease(ValueIterator);

impl Lease {
    fn new(iterator: ValueIterator) -> Self {
        memory::retain(&Value::Iterator(iterator.clone()));
        Self(iterator)
    }

    fn iterator(&self) -> &ValueIterator {
        &self.0
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        memory::release(&Value::Iterator(self.0.clone()));
    }
}

fn finished(value: Value) -> Value {
    IteratorStep { done: true, value }.into_value()
}

fn thrown(value: Value) -> CallError {
    match value {
        Value::Error(e) => CallError::Thrown(e),
        Value::String(message) => CallError::Thrown(ErrorValue::new(message)),
        other => CallError::Thrown(ErrorValue::new(format!("{:?}", other))),
    }
}
