//! In-memory transports.
//!
//! Used by the test suites, and handy for wiring two threads together inside
//! one process.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::json;
use crate::transfer::Transferable;
use crate::transport;
use crate::transport::Transport;
use crate::value::Value;

/// A duplex channel carrying values as-is, like a structured-clone channel
/// between two tasks of one process.
///
/// Messages sent via `send()` appear on the peer's `recv()` and vice versa.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Value>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Value>>>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<Value>, rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Creates a pair of transports connected to each other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: Value, _transferables: Vec<Transferable>) -> transport::Result<()> {
        self.tx
            .send(message)
            .map_err(|_| transport::Error::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Value>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}

/// A duplex channel that carries JSON text, like a socket or a worker port
/// that only accepts strings. Pair it with
/// [`JsonSerialization`](crate::serialization::JsonSerialization).
pub struct JsonChannelTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl JsonChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<String>, rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }
}

#[async_trait::async_trait]
impl Transport for JsonChannelTransport {
    async fn send(&self, message: Value, _transferables: Vec<Transferable>) -> transport::Result<()> {
        let text = json::to_string(&message)?;
        self.tx
            .send(text)
            .map_err(|_| transport::Error::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Value>> {
        let mut rx = self.rx.lock().await;
        loop {
            let Some(text) = rx.recv().await else {
                return Ok(None);
            };
            match json::from_str(&text) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => tracing::trace!(error = %e, "dropping unparsable message"),
            }
        }
    }
}
