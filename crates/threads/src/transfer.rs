//! Values whose memory the transport should move rather than copy.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// An opaque payload opted into zero-copy transfer.
///
/// Serialization never looks inside; it passes the handle through and lists
/// it in the out-of-band transferable buffer handed to the transport.
#[derive(Clone)]
pub struct Transferable {
    payload: Arc<dyn Any + Send + Sync>,
}

impl Transferable {
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self {
            payload: Arc::new(payload),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Transferable) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.payload), Arc::as_ptr(&other.payload))
    }
}

impl fmt::Debug for Transferable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[Transferable]")
    }
}

/// Marks `payload` as transferable and wraps it as a value.
pub fn mark_as_transferable<T: Any + Send + Sync>(payload: T) -> Value {
    Value::Transferable(Transferable::new(payload))
}
