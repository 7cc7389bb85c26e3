//! # Wire Messages
//!
//! Every message is an array whose first element is its kind:
//!
//! ```text
//! [0, callId, exportName, args]        CALL
//! [1, callId, value, error?]           CALL_RESULT
//! [2, callId, functionId, args]        FUNCTION_CALL
//! [3, callId, value, error?]           FUNCTION_RESULT
//! [4, functionId]                      FUNCTION_RELEASE
//! [5]                                  TERMINATE
//! ```
//!
//! `args`, `value` are already encoded by the thread's serialization strategy.
//! `error` is a plain `{name, message, stack}` object.

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::error::ErrorValue;
use crate::functions::FunctionId;
use crate::value::Value;

pub type CallId = String;

pub const CALL: u8 = 0;
pub const CALL_RESULT: u8 = 1;
pub const FUNCTION_CALL: u8 = 2;
pub const FUNCTION_RESULT: u8 = 3;
pub const FUNCTION_RELEASE: u8 = 4;
pub const TERMINATE: u8 = 5;

const ID_LENGTH: usize = 16;

/// A random alphanumeric id for calls and functions.
pub(crate) fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call {
        id: CallId,
        name: String,
        args: Value,
    },
    CallResult {
        id: CallId,
        value: Value,
        error: Option<Value>,
    },
    FunctionCall {
        id: CallId,
        function: FunctionId,
        args: Value,
    },
    FunctionResult {
        id: CallId,
        value: Value,
        error: Option<Value>,
    },
    FunctionRelease {
        function: FunctionId,
    },
    Terminate,
}

impl Message {
    pub fn kind(&self) -> u8 {
        match self {
            Self::Call { .. } => CALL,
            Self::CallResult { .. } => CALL_RESULT,
            Self::FunctionCall { .. } => FUNCTION_CALL,
            Self::FunctionResult { .. } => FUNCTION_RESULT,
            Self::FunctionRelease { .. } => FUNCTION_RELEASE,
            Self::Terminate => TERMINATE,
        }
    }

    pub fn into_value(self) -> Value {
        let kind = Value::Number(self.kind() as f64);
        let items = match self {
            Self::Call { id, name, args } => vec![kind, id.into(), name.into(), args],
            Self::FunctionCall { id, function, args } => vec![kind, id.into(), function.into(), args],
            Self::CallResult { id, value, error } | Self::FunctionResult { id, value, error } => {
                let mut items = vec![kind, id.into(), value];
                items.extend(error);
                items
            }
            Self::FunctionRelease { function } => vec![kind, function.into()],
            Self::Terminate => vec![kind],
        };
        Value::array(items)
    }

    /// Parses a received message. Anything that does not have the expected
    /// shape yields `None`.
    pub fn parse(value: &Value) -> Option<Message> {
        let items = value.as_array()?.to_vec();
        let kind = items.first()?.as_f64()?;
        if kind.fract() != 0.0 || !(0.0..=255.0).contains(&kind) {
            return None;
        }

        let string = |index: usize| items.get(index).and_then(|v| v.as_str().map(str::to_string));
        let slot = |index: usize| items.get(index).cloned().unwrap_or(Value::Undefined);
        let error = |index: usize| items.get(index).filter(|v| !v.is_nullish()).cloned();

        let message = match kind as u8 {
            CALL => Self::Call {
                id: string(1)?,
                name: string(2)?,
                args: slot(3),
            },
            CALL_RESULT => Self::CallResult {
                id: string(1)?,
                value: slot(2),
                error: error(3),
            },
            FUNCTION_CALL => Self::FunctionCall {
                id: string(1)?,
                function: string(2)?,
                args: slot(3),
            },
            FUNCTION_RESULT => Self::FunctionResult {
                id: string(1)?,
                value: slot(2),
                error: error(3),
            },
            FUNCTION_RELEASE => Self::FunctionRelease { function: string(1)? },
            TERMINATE => Self::Terminate,
            _ => return None,
        };
        Some(message)
    }
}

/// The `{name, message, stack}` object carried in a result's error slot.
pub fn error_to_value(error: &ErrorValue) -> Value {
    Value::object([
        ("name", Value::from(error.name.as_str())),
        ("message", Value::from(error.message.as_str())),
        ("stack", Value::from(error.stack.clone())),
    ])
}

/// Reads an error slot back. Errors sent as native error values are
/// accepted too; anything else becomes a generic `Error`.
pub fn error_from_value(value: &Value) -> ErrorValue {
    if let Some(error) = value.as_error() {
        return error.clone();
    }
    if let Some(message) = value.as_str() {
        return ErrorValue::new(message);
    }

    let text = |key: &str| value.get(key).and_then(|v| v.as_str().map(str::to_string));
    let mut error = ErrorValue::named(
        text("name").unwrap_or_else(|| "Error".to_string()),
        text("message").unwrap_or_default(),
    );
    error.stack = text("stack");
    error
}
