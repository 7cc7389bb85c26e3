//! Release on drop.
//!
//! Each proxy is tracked through a weak reference. When the last handle to a
//! proxy goes away its `Drop` posts a release message, so the origin forgets
//! the function without anyone calling `release()`. Release timing follows
//! the receiver's ownership, which is deterministic in Rust but invisible to
//! the origin.

use std::sync::Arc;
use std::sync::Weak;

use dashmap::DashMap;

use crate::error::CallError;
use crate::function::CallFuture;
use crate::function::Callable;
use crate::function::Function;
use crate::functions::FunctionId;
use crate::functions::FunctionStrategy;
use crate::functions::registry::FunctionRegistry;
use crate::thread::Thread;
use crate::thread::WeakThread;

type Proxies = DashMap<FunctionId, Weak<AutomaticProxy>>;

#[derive(Default)]
pub struct AutomaticFunctions {
    registry: FunctionRegistry,
    proxies: Arc<Proxies>,
}

impl AutomaticFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of functions registered on this side.
    pub fn registered(&self) -> usize {
        self.registry.len()
    }

    /// Number of proxies still alive on this side.
    pub fn live_proxies(&self) -> usize {
        self.proxies.iter().filter(|e| e.value().strong_count() > 0).count()
    }
}

impl FunctionStrategy for AutomaticFunctions {
    fn serialize(&self, function: &Function, _thread: &Thread) -> FunctionId {
        self.registry.register(function)
    }

    fn deserialize(&self, id: &str, thread: &Thread) -> Function {
        if let Some(existing) = self.proxies.get(id).and_then(|proxy| proxy.upgrade()) {
            return Function::from_callable(existing);
        }

        let proxy = Arc::new(AutomaticProxy {
            id: id.to_string(),
            thread: thread.downgrade(),
            proxies: Arc::downgrade(&self.proxies),
        });
        self.proxies.insert(id.to_string(), Arc::downgrade(&proxy));
        Function::from_callable(proxy)
    }

    fn get(&self, id: &str) -> Option<Function> {
        self.registry.get(id)
    }

    fn release(&self, id: &str) -> bool {
        self.registry.release(id)
    }

    fn clear(&self) {
        self.registry.clear();
        self.proxies.clear();
    }
}

struct AutomaticProxy {
    id: FunctionId,
    thread: WeakThread,
    proxies: Weak<Proxies>,
}

impl Callable for AutomaticProxy {
    fn call(&self, args: Vec<crate::value::Value>) -> CallFuture {
        match self.thread.upgrade() {
            Some(thread) => Box::pin(thread.call_function(&self.id, args)),
            None => Box::pin(std::future::ready(Err(CallError::ThreadClosed))),
        }
    }
}

impl Drop for AutomaticProxy {
    fn drop(&mut self) {
        let Some(proxies) = self.proxies.upgrade() else {
            return;
        };
        // A newer proxy for the same id may already have replaced this entry;
        // the origin must keep the function for that one.
        if proxies
            .remove_if(&self.id, |_, proxy| proxy.strong_count() == 0)
            .is_none()
        {
            return;
        }
        if let Some(thread) = self.thread.upgrade() {
            thread.post_release(&self.id);
        }
    }
}
