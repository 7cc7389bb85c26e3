//! # Functions
//!
//! A [`Function`] is a cheap, clonable handle to something that can be called
//! with a list of values and eventually produces a value. Local closures and
//! remote proxies share this one type, so a caller never needs to know which
//! side of the boundary a function lives on.
//!
//! Identity is the handle's allocation: two clones of one `Function` are the
//! same function, two `Function::new` calls with equal closures are not.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::CallError;
use crate::memory::MemoryManageable;
use crate::value::Value;

/// The future returned by every call.
pub type CallFuture = BoxFuture<'static, Result<Value, CallError>>;

/// Anything that can stand behind a [`Function`] handle.
pub trait Callable: Send + Sync + 'static {
    fn call(&self, args: Vec<Value>) -> CallFuture;

    /// Retain/release hooks, for callables whose lifetime is tracked.
    fn memory(&self) -> Option<&dyn MemoryManageable> {
        None
    }
}

struct Closure<F>(F);

impl<F, Fut> Callable for Closure<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CallError>> + Send + 'static,
{
    fn call(&self, args: Vec<Value>) -> CallFuture {
        Box::pin((self.0)(args))
    }
}

#[derive(Clone)]
pub struct Function {
    callable: Arc<dyn Callable>,
}

impl Function {
    /// Wraps an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CallError>> + Send + 'static,
    {
        Self {
            callable: Arc::new(Closure(f)),
        }
    }

    /// Wraps a closure that returns immediately.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        Self::new(move |args| std::future::ready(f(args)))
    }

    pub fn from_callable(callable: Arc<dyn Callable>) -> Self {
        Self { callable }
    }

    pub fn call(&self, args: Vec<Value>) -> CallFuture {
        self.callable.call(args)
    }

    pub fn memory(&self) -> Option<&dyn MemoryManageable> {
        self.callable.memory()
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        self.identity() == other.identity()
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.callable) as *const () as usize
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.memory() {
            Some(memory) => write!(f, "[Function retained={}]", memory.retain_count()),
            None => f.write_str("[Function]"),
        }
    }
}
