//! Ledger Coordinator
//!
//! Binds entries to positions with cryptographic chaining, mediates appends
//! through the storage backend, caches in-memory tree state, and emits
//! events.

mod events;
mod service;

pub use events::EventBus;
pub use service::{AppendOptions, LedgerError, LedgerService, LedgerServiceConfig};
