//! # Error Definitions
//!
//! Two layers of failure cross a thread boundary:
//!
//! - [`ErrorValue`] is the plain `{name, message, stack}` payload that travels
//!   over the wire. It is what an export "throws".
//! - [`CallError`] is what a caller observes: the channel closed, the target
//!   function was released, or the callee threw.

use std::fmt;

/// Wire name used for [`CallError::ThreadClosed`].
pub const THREAD_CLOSED_ERROR: &str = "ThreadClosedError";

/// Wire name used for [`CallError::Released`].
pub const RELEASED_FUNCTION_ERROR: &str = "ReleasedFunctionError";

/// A plain error payload, safe to send across a thread boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl ErrorValue {
    /// An error named `Error` with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("Error", message)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl std::error::Error for ErrorValue {}

/// Failure of a call made through a thread, or of a local function.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// The thread was closed before the call settled, or before it was made.
    ThreadClosed,
    /// The target function was released on its origin side.
    Released,
    /// The callee threw (locally, or remotely and carried back).
    Thrown(ErrorValue),
}

impl CallError {
    /// Shorthand for throwing a plain `Error`.
    pub fn thrown(message: impl Into<String>) -> Self {
        Self::Thrown(ErrorValue::new(message))
    }

    /// Shorthand for throwing a `TypeError`.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Thrown(ErrorValue::named("TypeError", message))
    }

    /// The payload sent over the wire for this error.
    pub fn to_error_value(&self) -> ErrorValue {
        match self {
            Self::ThreadClosed => ErrorValue::named(
                THREAD_CLOSED_ERROR,
                "You attempted to call a function on a thread that was already closed.",
            ),
            Self::Released => ErrorValue::named(
                RELEASED_FUNCTION_ERROR,
                "You attempted to call a function that was already released.",
            ),
            Self::Thrown(error) => error.clone(),
        }
    }

    /// Maps a received payload back to the typed variant it was sent as.
    pub fn from_error_value(error: ErrorValue) -> Self {
        match error.name.as_str() {
            THREAD_CLOSED_ERROR => Self::ThreadClosed,
            RELEASED_FUNCTION_ERROR => Self::Released,
            _ => Self::Thrown(error),
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreadClosed => write!(f, "Thread closed"),
            Self::Released => write!(f, "Function already released"),
            Self::Thrown(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Thrown(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ErrorValue> for CallError {
    fn from(e: ErrorValue) -> Self {
        Self::Thrown(e)
    }
}
