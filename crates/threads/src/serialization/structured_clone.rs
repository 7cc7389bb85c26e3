//! Serialization for transports that deep-copy rich values themselves.

use std::sync::Arc;

use crate::serialization::Serialization;
use crate::serialization::SerializationHooks;
use crate::serialization::codec::Decoder;
use crate::serialization::codec::Encoder;
use crate::serialization::codec::Flavor;
use crate::thread::Thread;
use crate::transfer::Transferable;
use crate::value::Value;

/// Passes dates, maps, sets, byte arrays and errors straight through,
/// rebuilding containers only so nested functions can be replaced.
#[derive(Default)]
pub struct StructuredCloneSerialization {
    hooks: Option<Arc<dyn SerializationHooks>>,
}

impl StructuredCloneSerialization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hooks(hooks: impl SerializationHooks) -> Self {
        Self {
            hooks: Some(Arc::new(hooks)),
        }
    }
}

impl Serialization for StructuredCloneSerialization {
    fn serialize(
        &self,
        value: &Value,
        thread: &Thread,
        transferable: Option<&mut Vec<Transferable>>,
    ) -> Value {
        Encoder::new(Flavor::StructuredClone, thread, self.hooks.as_deref(), transferable).encode(value)
    }

    fn deserialize(&self, value: &Value, thread: &Thread) -> Value {
        Decoder::new(Flavor::StructuredClone, thread, self.hooks.as_deref()).decode(value)
    }
}
