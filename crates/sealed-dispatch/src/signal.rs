//! Named signals toward the UI bridge.
//!
//! A lightweight publish/subscribe channel built on
//! [`tokio::sync::broadcast`]. The UI side subscribes once and receives
//! every named signal (`loading`, `session`, ...) with a JSON payload;
//! sending with no active subscribers is not an error, which is common
//! during startup and in tests.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A named, JSON-carrying signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub payload: serde_json::Value,
}

/// Publish/subscribe signal bus. Cheaply cloneable and `Send + Sync`.
#[derive(Clone)]
pub struct SignalBus {
    inner: Arc<SignalBusInner>,
}

struct SignalBusInner {
    sender: broadcast::Sender<Signal>,
}

impl SignalBus {
    /// Create a bus with the given channel capacity. Subscribers lagging by
    /// more than `capacity` signals observe a `Lagged` error.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(SignalBusInner { sender }),
        }
    }

    /// Send a named signal to all current subscribers. Returns the number
    /// of receivers that will observe it.
    pub fn send(&self, name: &str, payload: serde_json::Value) -> usize {
        let signal = Signal {
            name: name.to_string(),
            payload,
        };
        match self.inner.sender.send(signal) {
            Ok(n) => {
                tracing::trace!(signal = name, receivers = n, "signal sent");
                n
            }
            Err(_) => {
                tracing::trace!(signal = name, "signal sent with no receivers");
                0
            }
        }
    }

    /// Subscribe to all future signals. Earlier signals are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.inner.sender.subscribe()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
