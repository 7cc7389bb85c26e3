//! Call functions across isolated execution contexts as if they were local.
//!
//! Two [`Thread`]s joined by a [`Transport`] expose named exports to each
//! other. Arguments and results may carry functions, iterators and abort
//! signals; those cross the boundary as proxies whose lifetime is managed by
//! a [`FunctionStrategy`].

pub mod abort;
pub mod builder;
pub mod error;
pub mod function;
pub mod functions;
pub mod imports;
pub mod iterator;
pub mod json;
pub mod memory;
pub mod message;
pub mod mock_transport;
pub mod serialization;
pub mod thread;
pub mod transfer;
pub mod transport;
pub mod value;

pub use abort::AbortController;
pub use abort::AbortSignal;
pub use builder::ThreadBuilder;
pub use error::CallError;
pub use error::ErrorValue;
pub use function::Function;
pub use functions::AutomaticFunctions;
pub use functions::FunctionStrategy;
pub use functions::ManualFunctions;
pub use imports::Imports;
pub use imports::ThreadCall;
pub use iterator::ValueIterator;
pub use serialization::JsonSerialization;
pub use serialization::StructuredCloneSerialization;
pub use thread::Thread;
pub use transfer::Transferable;
pub use transfer::mark_as_transferable;
pub use transport::Transport;
pub use value::Value;

#[cfg(test)]
mod tests;
