//! Outbound event ports
//!
//! Each component that raises side-channel events (admin notifications,
//! delivery ticket updates) holds its own `EventPort` instead of writing to
//! global state. Tests create a port with [`EventPort::channel`] and assert on
//! the receiver.
//!
//! Sends never block the pipeline: when the queue is full the event is
//! dropped and the drop is logged.

use tokio::sync::mpsc;
use tracing::warn;

/// Default queue depth for event ports.
pub const DEFAULT_PORT_CAPACITY: usize = 1024;

/// Non-blocking sender half of a typed event queue.
#[derive(Debug)]
pub struct EventPort<T> {
    name: &'static str,
    tx: Option<mpsc::Sender<T>>,
}

impl<T> Clone for EventPort<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> EventPort<T> {
    /// Create a connected port and its receiver.
    pub fn channel(name: &'static str, capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { name, tx: Some(tx) }, rx)
    }

    /// A port that discards every event.
    pub fn disconnected(name: &'static str) -> Self {
        Self { name, tx: None }
    }

    /// Emit an event. Returns `false` if it was dropped.
    pub fn emit(&self, event: T) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(port = self.name, "Event port full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}
