//! # Transport Abstraction
//!
//! A minimal, async interface for moving messages between two execution
//! contexts.
//!
//! ## Philosophy
//!
//! - **Message-Oriented**: the transport moves whole [`Value`] messages. It
//!   knows nothing about calls, results or functions.
//! - **Duplex**: either side may send at any time. Replies are correlated by
//!   the thread, not by the transport.
//! - **Ordered**: messages from one side arrive in the order they were sent.

use std::fmt;

use crate::transfer::Transferable;
use crate::value::Value;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The other side is gone or the channel was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
    /// The message could not be put into the transport's wire form.
    Encoding(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::Encoding(msg) => write!(f, "Encoding error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<crate::json::Error> for Error {
    fn from(e: crate::json::Error) -> Self {
        Self::Encoding(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// One end of a bidirectional message channel.
///
/// This trait is object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Posts a message. `transferables` lists payloads whose ownership should
    /// move with the message; transports that cannot move memory ignore it.
    async fn send(&self, message: Value, transferables: Vec<Transferable>) -> Result<()>;

    /// Waits for the next message. `Ok(None)` means the channel has ended.
    async fn recv(&self) -> Result<Option<Value>>;
}
