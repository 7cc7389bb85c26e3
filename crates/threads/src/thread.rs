//! # Thread Engine
//!
//! A [`Thread`] is one end of a call channel. It owns the exports the other
//! side may call, correlates outgoing calls with their results, and runs two
//! background tasks on the current Tokio runtime:
//!
//! - the **listener** reads the transport and dispatches every message;
//! - the **writer** drains the outbox into the transport, one message at a
//!   time, so messages keep the order they were posted in.
//!
//! Posting never waits, which lets `Drop` impls post releases.
//!
//! ## Invariants
//!
//! - A pending call is settled exactly once: by its matching result, or by
//!   the bulk rejection when the thread closes.
//! - Once closed, nothing new is posted and every new call rejects with
//!   [`CallError::ThreadClosed`] without touching the transport.
//! - Decoding happens on the listener, in message order. Only the invoked
//!   functions run in their own tasks, so results may arrive out of order.
//! - A thread stays alive until it is closed, even with no handles left.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::abort::AbortController;
use crate::abort::AbortSignal;
use crate::builder::ThreadBuilder;
use crate::error::CallError;
use crate::function::CallFuture;
use crate::function::Function;
use crate::functions::FunctionStrategy;
use crate::imports::Imports;
use crate::imports::ThreadCall;
use crate::message;
use crate::message::CallId;
use crate::message::Message;
use crate::serialization::Serialization;
use crate::transfer::Transferable;
use crate::transport::Transport;
use crate::value::Value;

type Resolver = oneshot::Sender<Result<Value, CallError>>;

struct Outgoing {
    message: Value,
    transferables: Vec<Transferable>,
}

/// Which result message answers an invocation.
#[derive(Debug, Clone, Copy)]
enum Reply {
    Call,
    Function,
}

pub(crate) struct ThreadInner {
    pub(crate) name: String,
    pub(crate) exports: RwLock<HashMap<String, Function>>,
    pub(crate) import_names: Option<HashSet<String>>,
    pub(crate) serialization: Arc<dyn Serialization>,
    pub(crate) functions: Arc<dyn FunctionStrategy>,
    pending: DashMap<CallId, Resolver>,
    outbox: Mutex<Option<mpsc::UnboundedSender<Outgoing>>>,
    controller: AbortController,
    closed: AtomicBool,
    closed_remotely: AtomicBool,
}

impl ThreadInner {
    pub(crate) fn new(
        name: String,
        exports: HashMap<String, Function>,
        import_names: Option<HashSet<String>>,
        serialization: Arc<dyn Serialization>,
        functions: Arc<dyn FunctionStrategy>,
    ) -> Self {
        Self {
            name,
            exports: RwLock::new(exports),
            import_names,
            serialization,
            functions,
            pending: DashMap::new(),
            outbox: Mutex::new(None),
            controller: AbortController::new(),
            closed: AtomicBool::new(false),
            closed_remotely: AtomicBool::new(false),
        }
    }
}

#[derive(Clone)]
pub struct Thread {
    inner: Arc<ThreadInner>,
}

/// A handle that does not keep the thread's state alive.
#[derive(Clone)]
pub struct WeakThread {
    inner: Weak<ThreadInner>,
}

impl WeakThread {
    pub fn upgrade(&self) -> Option<Thread> {
        self.inner.upgrade().map(|inner| Thread { inner })
    }
}

impl Thread {
    /// Starts configuring a thread over `transport`.
    pub fn builder<T: Transport>(transport: T) -> ThreadBuilder {
        ThreadBuilder::new(transport)
    }

    /// Starts the listener and writer tasks. Must run inside a Tokio runtime.
    pub(crate) fn spawn(
        inner: ThreadInner,
        transport: Arc<dyn Transport>,
        signal: Option<AbortSignal>,
    ) -> Thread {
        let (tx, rx) = mpsc::unbounded_channel();
        *inner.outbox.lock() = Some(tx);
        let thread = Thread {
            inner: Arc::new(inner),
        };

        let weak = thread.downgrade();
        thread.inner.controller.signal().on_abort(move || {
            if let Some(thread) = weak.upgrade() {
                thread.shutdown();
            }
        });

        tokio::spawn(write_loop(
            thread.name().to_string(),
            thread.downgrade(),
            transport.clone(),
            rx,
        ));
        tokio::spawn(listen(thread.clone(), transport));

        if let Some(signal) = signal {
            let controller = thread.inner.controller.clone();
            signal.on_abort(move || controller.abort());
        }

        debug!(thread = %thread.name(), "thread started");
        thread
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The facade for calling the other side's exports.
    pub fn imports(&self) -> Imports {
        Imports::new(self.clone(), self.inner.import_names.clone())
    }

    /// Adds or replaces an export.
    pub fn export(&self, name: impl Into<String>, function: Function) {
        if self.is_closed() {
            return;
        }
        self.inner.exports.write().insert(name.into(), function);
    }

    pub fn export_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.exports.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Calls an export on the other side by name.
    pub fn call(&self, name: &str, args: Vec<Value>) -> ThreadCall {
        self.dispatch(args, |id, args| Message::Call {
            id,
            name: name.to_string(),
            args,
        })
    }

    /// Calls a function registered on the other side.
    pub(crate) fn call_function(&self, function: &str, args: Vec<Value>) -> ThreadCall {
        self.dispatch(args, |id, args| Message::FunctionCall {
            id,
            function: function.to_string(),
            args,
        })
    }

    fn dispatch(&self, args: Vec<Value>, build: impl FnOnce(CallId, Value) -> Message) -> ThreadCall {
        if self.is_closed() {
            return ThreadCall::ready(Err(CallError::ThreadClosed));
        }

        let mut transferables = Vec::new();
        let args = self
            .inner
            .serialization
            .serialize(&Value::array(args), self, Some(&mut transferables));

        let (tx, rx) = oneshot::channel();
        let id = loop {
            let candidate = message::random_id();
            if let Entry::Vacant(entry) = self.inner.pending.entry(candidate.clone()) {
                entry.insert(tx);
                break candidate;
            }
        };

        self.post(build(id.clone(), args), transferables);

        // Closing may have raced the insert above.
        if self.is_closed() {
            self.reject(&id);
        }
        ThreadCall::pending(rx)
    }

    fn reject(&self, id: &str) {
        if let Some((_, resolver)) = self.inner.pending.remove(id) {
            let _ = resolver.send(Err(CallError::ThreadClosed));
        }
    }

    fn post(&self, message: Message, transferables: Vec<Transferable>) {
        let kind = message.kind();
        let outbox = self.inner.outbox.lock();
        let Some(outbox) = outbox.as_ref() else {
            trace!(thread = %self.name(), kind, "dropping message for closed thread");
            return;
        };
        let outgoing = Outgoing {
            message: message.into_value(),
            transferables,
        };
        if outbox.send(outgoing).is_err() {
            trace!(thread = %self.name(), kind, "writer is gone");
        }
    }

    /// Tells the other side it may forget `function`.
    pub(crate) fn post_release(&self, function: &str) {
        if self.is_closed() {
            return;
        }
        trace!(thread = %self.name(), function, "posting release");
        self.post(
            Message::FunctionRelease {
                function: function.to_string(),
            },
            Vec::new(),
        );
    }

    fn receive(&self, value: Value) {
        let Some(message) = Message::parse(&value) else {
            trace!(thread = %self.name(), "ignoring unrecognized message");
            return;
        };
        trace!(thread = %self.name(), kind = message.kind(), "received");

        match message {
            Message::Call { id, name, args } => {
                let export = self.inner.exports.read().get(&name).cloned();
                match export {
                    Some(function) => self.invoke(Reply::Call, id, function, args),
                    None => {
                        let error = CallError::thrown(format!(
                            "No '{}' method is exported from this thread.",
                            name
                        ));
                        self.reply(Reply::Call, id, Err(error));
                    }
                }
            }
            Message::FunctionCall { id, function, args } => {
                match self.inner.functions.get(&function) {
                    Some(target) => self.invoke(Reply::Function, id, target, args),
                    None => self.reply(Reply::Function, id, Err(CallError::Released)),
                }
            }
            Message::CallResult { id, value, error } | Message::FunctionResult { id, value, error } => {
                self.settle(&id, value, error);
            }
            Message::FunctionRelease { function } => {
                if !self.inner.functions.release(&function) {
                    trace!(thread = %self.name(), function = %function, "release for unknown function");
                }
            }
            Message::Terminate => self.close_remotely(),
        }
    }

    fn invoke(&self, reply: Reply, id: CallId, function: Function, args: Value) {
        let args = match self.inner.serialization.deserialize(&args, self) {
            Value::Array(items) => items.to_vec(),
            Value::Undefined | Value::Null => Vec::new(),
            other => vec![other],
        };

        let call: CallFuture = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.inner.functions.call(&function, args, self)
        })) {
            Ok(call) => call,
            Err(_) => Box::pin(std::future::ready(Err(panicked()))),
        };

        let thread = self.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(call)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(panicked()));
            thread.reply(reply, id, result);
        });
    }

    fn reply(&self, reply: Reply, id: CallId, result: Result<Value, CallError>) {
        if self.is_closed() {
            return;
        }

        let mut transferables = Vec::new();
        let (value, error) = match result {
            Ok(value) => {
                let value = self
                    .inner
                    .serialization
                    .serialize(&value, self, Some(&mut transferables));
                (value, None)
            }
            Err(e) => {
                debug!(thread = %self.name(), id = %id, error = %e, "call failed");
                (Value::Undefined, Some(message::error_to_value(&e.to_error_value())))
            }
        };

        let message = match reply {
            Reply::Call => Message::CallResult { id, value, error },
            Reply::Function => Message::FunctionResult { id, value, error },
        };
        self.post(message, transferables);
    }

    fn settle(&self, id: &str, value: Value, error: Option<Value>) {
        let Some((_, resolver)) = self.inner.pending.remove(id) else {
            trace!(thread = %self.name(), id, "result for unknown call");
            return;
        };

        let result = match error {
            Some(error) => Err(CallError::from_error_value(message::error_from_value(&error))),
            None => Ok(self.inner.serialization.deserialize(&value, self)),
        };
        let _ = resolver.send(result);
    }

    /// Closes the thread and tells the other side.
    pub fn close(&self) {
        self.inner.controller.abort();
    }

    fn close_remotely(&self) {
        self.inner.closed_remotely.store(true, Ordering::SeqCst);
        self.inner.controller.abort();
    }

    /// Runs inside the abort handler, so pending calls are rejected before
    /// `close()` returns.
    fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let remote = self.inner.closed_remotely.load(Ordering::SeqCst);
        debug!(thread = %self.name(), remote, "closing thread");

        let ids: Vec<CallId> = self.inner.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.reject(&id);
        }

        self.inner.functions.clear();
        let exports = std::mem::take(&mut *self.inner.exports.write());
        drop(exports);

        let outbox = self.inner.outbox.lock().take();
        if let (Some(outbox), false) = (outbox, remote) {
            let terminate = Outgoing {
                message: Message::Terminate.into_value(),
                transferables: Vec::new(),
            };
            let _ = outbox.send(terminate);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.inner.controller.signal().is_aborted()
    }

    /// Resolves once the thread has closed, from either side.
    pub async fn closed(&self) {
        self.inner.controller.signal().aborted().await;
    }

    /// The signal that aborts when this thread closes.
    pub fn signal(&self) -> AbortSignal {
        self.inner.controller.signal()
    }

    /// Number of outgoing calls still waiting for a result.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn functions(&self) -> &dyn FunctionStrategy {
        self.inner.functions.as_ref()
    }

    pub fn serialization(&self) -> &dyn Serialization {
        self.inner.serialization.as_ref()
    }

    pub fn downgrade(&self) -> WeakThread {
        WeakThread {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &Thread) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

fn panicked() -> CallError {
    CallError::thrown("The called function panicked.")
}

async fn write_loop(
    name: String,
    thread: WeakThread,
    transport: Arc<dyn Transport>,
    mut outbox: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(Outgoing {
        message,
        transferables,
    }) = outbox.recv().await
    {
        if let Err(e) = transport.send(message, transferables).await {
            warn!(thread = %name, error = %e, "send failed, closing thread");
            if let Some(thread) = thread.upgrade() {
                thread.close_remotely();
            }
            break;
        }
    }
    trace!(thread = %name, "writer stopped");
}

async fn listen(thread: Thread, transport: Arc<dyn Transport>) {
    let signal = thread.signal();
    loop {
        let received = tokio::select! {
            biased;
            _ = signal.aborted() => break,
            received = transport.recv() => received,
        };

        match received {
            Ok(Some(message)) => thread.receive(message),
            Ok(None) => {
                debug!(thread = %thread.name(), "transport ended");
                thread.close_remotely();
                break;
            }
            Err(e) => {
                warn!(thread = %thread.name(), error = %e, "receive failed, closing thread");
                thread.close_remotely();
                break;
            }
        }
    }
    trace!(thread = %thread.name(), "listener stopped");
}
