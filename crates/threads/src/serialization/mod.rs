//! # Serialization Strategies
//!
//! A serialization strategy turns call arguments and results into values the
//! transport can carry, and back. Two strategies ship with the crate:
//!
//! - [`StructuredCloneSerialization`] for transports that deep-copy rich values
//!   themselves (in-process channels). Only functions, iterators and custom
//!   values are rewritten.
//! - [`JsonSerialization`] for transports that only carry JSON. Every
//!   non-JSON value becomes a tagged wrapper object such as `{"_@d": iso}`.
//!
//! Both share one walker, so they agree on cycles, functions, iterators,
//! transferables and hooks.

mod codec;
pub mod json;
pub mod structured_clone;

use std::any::Any;

pub use json::JsonSerialization;
pub use structured_clone::StructuredCloneSerialization;

use crate::thread::Thread;
use crate::transfer::Transferable;
use crate::value::Value;

/// Wrapper tags. Each tagged value is an object with exactly one of these keys.
pub mod tags {
    pub const FUNCTION: &str = "_@f";
    pub const ITERATOR: &str = "_@i";
    pub const ASYNC_ITERATOR: &str = "_@ai";
    pub const DATE: &str = "_@d";
    pub const REGEXP: &str = "_@r";
    pub const MAP: &str = "_@m";
    pub const SET: &str = "_@s";
    pub const ERROR: &str = "_@e";
    pub const TYPED_ARRAY: &str = "_@t";
    pub const UNDEFINED: &str = "_@u";
    pub const NUMBER: &str = "_@n";
    pub const BIGINT: &str = "_@b";
}

/// Converts values to and from their wire form for one thread.
pub trait Serialization: Send + Sync + 'static {
    /// Encodes `value`. Transferables met on the way are appended to
    /// `transferable` when the caller supplies a buffer.
    fn serialize(
        &self,
        value: &Value,
        thread: &Thread,
        transferable: Option<&mut Vec<Transferable>>,
    ) -> Value;

    fn deserialize(&self, value: &Value, thread: &Thread) -> Value;
}

/// A value that knows how to encode itself.
///
/// The result of `serialize` is used verbatim; `encode` encodes nested values
/// with the active strategy.
pub trait Serializable: Send + Sync + 'static {
    fn serialize(&self, encode: &mut dyn FnMut(&Value) -> Value) -> Value;

    fn as_any(&self) -> &dyn Any;
}

/// Domain extensions consulted before the built-in rules for every
/// non-primitive value. Returning `None` falls through to the defaults.
pub trait SerializationHooks: Send + Sync + 'static {
    fn serialize(&self, _value: &Value, _encode: &mut dyn FnMut(&Value) -> Value) -> Option<Value> {
        None
    }

    fn deserialize(&self, _value: &Value, _decode: &mut dyn FnMut(&Value) -> Value) -> Option<Value> {
        None
    }
}
