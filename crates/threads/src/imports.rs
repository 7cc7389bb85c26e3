//! # Imports
//!
//! The caller's view of the other side. [`Imports::call`] reaches any export
//! by name. A thread built with an import list only allows the listed names:
//! anything else is `None` from [`Imports::get`] and a `TypeError` from
//! [`Imports::call`], and nothing is sent.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use futures::StreamExt;
use futures::stream;
use futures::stream::BoxStream;
use tokio::sync::oneshot;

use crate::error::CallError;
use crate::function::Function;
use crate::thread::Thread;
use crate::value::Value;

#[derive(Clone)]
pub struct Imports {
    thread: Thread,
    names: Option<HashSet<String>>,
}

impl Imports {
    pub(crate) fn new(thread: Thread, names: Option<HashSet<String>>) -> Self {
        Self { thread, names }
    }

    fn allows(&self, name: &str) -> bool {
        self.names.as_ref().is_none_or(|names| names.contains(name))
    }

    pub fn call(&self, name: &str, args: Vec<Value>) -> ThreadCall {
        if !self.allows(name) {
            return ThreadCall::ready(Err(CallError::type_error(format!(
                "'{}' is not an imported method of this thread.",
                name
            ))));
        }
        self.thread.call(name, args)
    }

    /// A function that calls the named export.
    pub fn get(&self, name: &str) -> Option<Function> {
        if !self.allows(name) {
            return None;
        }
        let thread = self.thread.downgrade();
        let name = name.to_string();
        Some(Function::new(move |args| match thread.upgrade() {
            Some(thread) => thread.call(&name, args),
            None => ThreadCall::ready(Err(CallError::ThreadClosed)),
        }))
    }

    /// The allow-list, if this thread has one.
    pub fn names(&self) -> Option<Vec<String>> {
        self.names.as_ref().map(|names| {
            let mut names: Vec<String> = names.iter().cloned().collect();
            names.sort();
            names
        })
    }
}

enum CallState {
    Pending(oneshot::Receiver<Result<Value, CallError>>),
    Ready(Option<Result<Value, CallError>>),
}

/// The eventual result of a call made through a thread.
///
/// Dropping a `ThreadCall` does not cancel the remote work; the result is
/// discarded when it arrives.
pub struct ThreadCall {
    state: CallState,
}

impl ThreadCall {
    pub(crate) fn pending(rx: oneshot::Receiver<Result<Value, CallError>>) -> Self {
        Self {
            state: CallState::Pending(rx),
        }
    }

    pub(crate) fn ready(result: Result<Value, CallError>) -> Self {
        Self {
            state: CallState::Ready(Some(result)),
        }
    }

    /// Streams the items of the iterator (or array) the call resolves to.
    pub fn iterate(self) -> BoxStream<'static, Result<Value, CallError>> {
        stream::once(self)
            .flat_map(|result| match result {
                Ok(Value::Iterator(iterator)) => iterator.into_stream(),
                Ok(Value::Array(items)) => stream::iter(items.to_vec().into_iter().map(Ok)).boxed(),
                Ok(other) => {
                    let error = CallError::type_error(format!("{} is not iterable", other.type_name()));
                    stream::once(std::future::ready(Err(error))).boxed()
                }
                Err(e) => stream::once(std::future::ready(Err(e))).boxed(),
            })
            .boxed()
    }
}

impl Future for ThreadCall {
    type Output = Result<Value, CallError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            CallState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or_else(|_| Err(CallError::ThreadClosed))),
            CallState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(CallError::ThreadClosed)))
            }
        }
    }
}
