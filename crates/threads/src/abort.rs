//! # Abort Signals
//!
//! A native cancellation pair ([`AbortController`] / [`AbortSignal`]) and a
//! bridge that projects a signal across a thread boundary.
//!
//! On the wire a signal is either `{aborted: true}` or
//! `{aborted: false, start}`. `start(listener)` returns `true` when the
//! signal has already aborted; otherwise it keeps `listener` retained and
//! calls it once, with `true`, when the signal aborts.
//!
//! ## Invariants
//!
//! - A signal aborts at most once.
//! - Every listener runs exactly once: on abort, or immediately when
//!   registered on an already aborted signal.
//! - Listeners run synchronously inside [`AbortController::abort`], after the
//!   abort flag is visible.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;

use crate::error::CallError;
use crate::function::Function;
use crate::memory;
use crate::serialization::Serializable;
use crate::value::Value;

/// Handle to a registered abort listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnOnce() + Send>;

struct SignalState {
    aborted: AtomicBool,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    notify: Notify,
    next_listener: AtomicU64,
}

#[derive(Clone)]
pub struct AbortSignal {
    state: Arc<SignalState>,
}

impl AbortSignal {
    fn new() -> Self {
        Self {
            state: Arc::new(SignalState {
                aborted: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
                notify: Notify::new(),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// A signal that has already aborted.
    pub fn aborted_signal() -> Self {
        let controller = AbortController::new();
        controller.abort();
        controller.signal()
    }

    /// A signal that aborts as soon as any of `signals` does.
    pub fn any(signals: impl IntoIterator<Item = AbortSignal>) -> Self {
        let controller = AbortController::new();
        for signal in signals {
            let controller = controller.clone();
            signal.on_abort(move || controller.abort());
        }
        controller.signal()
    }

    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::SeqCst)
    }

    /// Registers `listener`. If the signal has already aborted the listener
    /// runs right away and no id is returned.
    pub fn on_abort<F>(&self, listener: F) -> Option<ListenerId>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut listeners = self.state.listeners.lock();
        if self.is_aborted() {
            drop(listeners);
            listener();
            return None;
        }
        let id = ListenerId(self.state.next_listener.fetch_add(1, Ordering::Relaxed));
        listeners.push((id, Box::new(listener)));
        Some(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.state.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        listeners.len() != before
    }

    /// Resolves once the signal has aborted.
    pub async fn aborted(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }

    pub fn ptr_eq(&self, other: &AbortSignal) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

#[derive(Clone)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self {
            signal: AbortSignal::new(),
        }
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Aborts the signal and runs its listeners. Later calls do nothing.
    pub fn abort(&self) {
        let state = &self.signal.state;
        let listeners = {
            let mut listeners = state.listeners.lock();
            if state.aborted.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *listeners)
        };

        state.notify.notify_waiters();
        for (_, listener) in listeners {
            listener();
        }
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AbortController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortController")
            .field("signal", &self.signal)
            .finish()
    }
}

/// Projects `signal` into its wire shape.
pub fn create_thread_abort_signal(signal: &AbortSignal) -> Value {
    if signal.is_aborted() {
        return Value::object([("aborted", Value::Bool(true))]);
    }

    let signal = signal.clone();
    let start = Function::sync(move |args| {
        let Some(listener) = args.first().and_then(Value::as_function) else {
            return Err(CallError::type_error("start() expects a listener function"));
        };
        if signal.is_aborted() {
            return Ok(Value::Bool(true));
        }

        let listener = Value::Function(listener);
        memory::retain(&listener);
        let handle = Handle::try_current().ok();
        signal.on_abort(move || notify_listener(handle, listener));
        Ok(Value::Bool(false))
    });

    Value::object([("aborted", Value::Bool(false)), ("start", Value::Function(start))])
}

fn notify_listener(handle: Option<Handle>, listener: Value) {
    let (Some(handle), Some(function)) = (handle, listener.as_function()) else {
        tracing::warn!("abort listener registered outside a runtime was not notified");
        memory::release(&listener);
        return;
    };

    handle.spawn(async move {
        if let Err(e) = function.call(vec![Value::Bool(true)]).await {
            tracing::debug!(error = %e, "abort listener failed");
        }
        memory::release(&listener);
    });
}

/// Turns a received signal back into a native one.
///
/// A native signal passes through unchanged. A wire shape yields a fresh
/// signal that is either already aborted or linked through `start`.
pub fn accept_thread_abort_signal(value: &Value) -> AbortSignal {
    if let Value::Custom(custom) = value {
        if let Some(signal) = custom.as_any().downcast_ref::<AbortSignal>() {
            return signal.clone();
        }
    }

    let controller = AbortController::new();
    let signal = controller.signal();

    if value.get("aborted").and_then(|v| v.as_bool()) == Some(true) {
        controller.abort();
        return signal;
    }

    let Some(start) = value.get("start").and_then(|v| v.as_function()) else {
        tracing::debug!(kind = value.type_name(), "accepted a value that is not an abort signal");
        return signal;
    };

    let Ok(handle) = Handle::try_current() else {
        tracing::warn!("abort signal accepted outside a runtime is never linked");
        return signal;
    };

    let start_value = Value::Function(start.clone());
    memory::retain(&start_value);

    let abort = controller.clone();
    let listener = Function::sync(move |_args| {
        abort.abort();
        Ok(Value::Undefined)
    });

    let call = start.call(vec![Value::Function(listener)]);
    handle.spawn(async move {
        match call.await {
            Ok(Value::Bool(true)) => controller.abort(),
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "linking abort signal failed"),
        }
        memory::release(&start_value);
    });

    signal
}

impl Serializable for AbortSignal {
    fn serialize(&self, encode: &mut dyn FnMut(&Value) -> Value) -> Value {
        encode(&create_thread_abort_signal(self))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<AbortSignal> for Value {
    fn from(signal: AbortSignal) -> Self {
        Value::Custom(Arc::new(signal))
    }
}
