//! Explicit reference counting.
//!
//! Proxies start with a count of zero and are callable until released. Each
//! inbound call gets a [`StackFrame`] that retains the call's function
//! arguments and releases them when the call settles. A callee that wants to
//! keep a function beyond that must [`retain`](crate::memory::retain) it.
//!
//! ```text
//! Unregistered -> Registered(count) -> ... -> Released(count = 0)
//! ```
//!
//! Once released, the proxy is forgotten locally, the origin is told to
//! forget the function, and further calls fail with [`CallError::Released`].

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;

use crate::error::CallError;
use crate::function::CallFuture;
use crate::function::Callable;
use crate::function::Function;
use crate::functions::FunctionId;
use crate::functions::FunctionStrategy;
use crate::functions::registry::FunctionRegistry;
use crate::memory;
use crate::memory::MemoryManageable;
use crate::memory::RetainedBy;
use crate::memory::StackFrame;
use crate::thread::Thread;
use crate::thread::WeakThread;
use crate::value::Value;

type Proxies = DashMap<FunctionId, Arc<ManualProxy>>;

#[derive(Default)]
pub struct ManualFunctions {
    registry: FunctionRegistry,
    proxies: Arc<Proxies>,
}

impl ManualFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of functions registered on this side.
    pub fn registered(&self) -> usize {
        self.registry.len()
    }

    /// Number of proxies not yet released on this side.
    pub fn live_proxies(&self) -> usize {
        self.proxies.len()
    }
}

impl FunctionStrategy for ManualFunctions {
    fn serialize(&self, function: &Function, _thread: &Thread) -> FunctionId {
        self.registry.register(function)
    }

    fn deserialize(&self, id: &str, thread: &Thread) -> Function {
        let proxy = self
            .proxies
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(ManualProxy {
                    id: id.to_string(),
                    thread: thread.downgrade(),
                    count: AtomicUsize::new(0),
                    released: AtomicBool::new(false),
                    retained_by: RetainedBy::default(),
                    proxies: Arc::downgrade(&self.proxies),
                })
            })
            .clone();
        Function::from_callable(proxy)
    }

    fn get(&self, id: &str) -> Option<Function> {
        self.registry.get(id)
    }

    fn release(&self, id: &str) -> bool {
        self.registry.release(id)
    }

    fn call(&self, function: &Function, args: Vec<Value>, _thread: &Thread) -> CallFuture {
        let frame = StackFrame::new();
        for arg in &args {
            memory::retain_into(&frame, arg);
        }

        let call = function.call(args);
        Box::pin(async move {
            let result = call.await;
            frame.release();
            result
        })
    }

    fn clear(&self) {
        self.registry.clear();
        let ids: Vec<FunctionId> = self.proxies.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.proxies.remove(&id);
        }
    }
}

struct ManualProxy {
    id: FunctionId,
    thread: WeakThread,
    count: AtomicUsize,
    released: AtomicBool,
    retained_by: RetainedBy,
    proxies: Weak<Proxies>,
}

impl ManualProxy {
    fn finalize(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(proxies) = self.proxies.upgrade() {
            proxies.remove(&self.id);
        }
        if let Some(thread) = self.thread.upgrade() {
            thread.post_release(&self.id);
        }
    }
}

impl Callable for ManualProxy {
    fn call(&self, args: Vec<Value>) -> CallFuture {
        if self.released.load(Ordering::SeqCst) {
            return Box::pin(std::future::ready(Err(CallError::Released)));
        }
        match self.thread.upgrade() {
            Some(thread) => Box::pin(thread.call_function(&self.id, args)),
            None => Box::pin(std::future::ready(Err(CallError::ThreadClosed))),
        }
    }

    fn memory(&self) -> Option<&dyn MemoryManageable> {
        Some(self)
    }
}

impl MemoryManageable for ManualProxy {
    fn retain(&self) {
        if self.released.load(Ordering::SeqCst) {
            tracing::warn!(function = %self.id, "retained a function that was already released");
            return;
        }
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        let previous = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1));
        match previous {
            Ok(1) => self.finalize(),
            Ok(_) => {}
            Err(_) => {
                tracing::warn!(function = %self.id, "released a function more times than it was retained");
            }
        }
    }

    fn retain_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn retained_by(&self) -> &RetainedBy {
        &self.retained_by
    }
}
