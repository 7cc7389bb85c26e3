//! # Function Remoting Strategies
//!
//! A function strategy decides how a function crossing the boundary is
//! represented, how calls to it are dispatched, and when the origin may forget
//! it.
//!
//! - [`ManualFunctions`] (the default): proxies carry an explicit retain count.
//!   Inbound calls retain their function arguments for the call's duration.
//! - [`AutomaticFunctions`]: proxies are released when their last handle is
//!   dropped.
//!
//! On the origin side both keep a [`FunctionRegistry`](registry::FunctionRegistry)
//! mapping each function to a random id and back.

pub mod automatic;
pub mod manual;
mod registry;

pub use automatic::AutomaticFunctions;
pub use manual::ManualFunctions;

use crate::function::CallFuture;
use crate::function::Function;
use crate::thread::Thread;
use crate::value::Value;

/// Opaque id of a function registered on its origin side.
pub type FunctionId = String;

pub trait FunctionStrategy: Send + Sync + 'static {
    /// Registers `function` and returns its id. Serializing the same function
    /// twice returns the same id while it stays registered.
    fn serialize(&self, function: &Function, thread: &Thread) -> FunctionId;

    /// Materializes a proxy for a remote function id. Repeated calls for a
    /// still-live id return the same proxy.
    fn deserialize(&self, id: &str, thread: &Thread) -> Function;

    /// Looks up a locally registered function.
    fn get(&self, id: &str) -> Option<Function>;

    /// Forgets a locally registered function. Returns whether it was known.
    fn release(&self, id: &str) -> bool;

    /// Invokes a local function on behalf of the remote side.
    fn call(&self, function: &Function, args: Vec<Value>, _thread: &Thread) -> CallFuture {
        function.call(args)
    }

    /// Drops every registration and proxy; called when the thread closes.
    fn clear(&self);
}
