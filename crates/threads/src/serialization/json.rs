//! Serialization for transports that only carry JSON.

use std::sync::Arc;

use crate::serialization::Serialization;
use crate::serialization::SerializationHooks;
use crate::serialization::codec::Decoder;
use crate::serialization::codec::Encoder;
use crate::serialization::codec::Flavor;
use crate::thread::Thread;
use crate::transfer::Transferable;
use crate::value::Value;

/// Flattens every non-JSON value into a tagged wrapper object.
///
/// | value       | wire form                         |
/// |-------------|-----------------------------------|
/// | `Date`      | `{"_@d": "2024-01-01T00:00:00.000Z"}` |
/// | `RegExp`    | `{"_@r": [source, flags]}`        |
/// | `Map`       | `{"_@m": [[key, value], ...]}`    |
/// | `Set`       | `{"_@s": [value, ...]}`           |
/// | `Error`     | `{"_@e": {name, message, stack}}` |
/// | byte arrays | `{"_@t": [kind, base64]}`         |
/// | `undefined` | `{"_@u": true}`                   |
/// | `NaN`, `±Infinity` | `{"_@n": "NaN"}`           |
/// | `BigInt`    | `{"_@b": "123"}`                  |
#[derive(Default)]
pub struct JsonSerialization {
    hooks: Option<Arc<dyn SerializationHooks>>,
}

impl JsonSerialization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hooks(hooks: impl SerializationHooks) -> Self {
        Self {
            hooks: Some(Arc::new(hooks)),
        }
    }
}

impl Serialization for JsonSerialization {
    fn serialize(
        &self,
        value: &Value,
        thread: &Thread,
        transferable: Option<&mut Vec<Transferable>>,
    ) -> Value {
        Encoder::new(Flavor::Json, thread, self.hooks.as_deref(), transferable).encode(value)
    }

    fn deserialize(&self, value: &Value, thread: &Thread) -> Value {
        Decoder::new(Flavor::Json, thread, self.hooks.as_deref()).decode(value)
    }
}
