//! Ledger Event Bus
//!
//! Fan-out of append events to subscribers (e.g. a WebSocket layer) over a
//! tokio broadcast channel. Emission is best-effort: a lagged or absent
//! subscriber never affects the write path.

use tokio::sync::broadcast;

use crate::types::LedgerEvent;

/// Broadcast bus for ledger events
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Get a sender clone for publishing events
    pub fn sender(&self) -> broadcast::Sender<LedgerEvent> {
        self.sender.clone()
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: LedgerEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
