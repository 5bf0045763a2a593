//! Event Wire Types
//!
//! Payloads emitted on every append, consumed by the WebSocket fan-out
//! subsystem. Emission is best-effort and never affects the write path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event on a ledger's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A new entry was appended.
    #[serde(rename_all = "camelCase")]
    EntryAppend {
        ledger_id: String,
        #[serde(with = "super::u64_string")]
        position: u64,
        hash: String,
        new_root: String,
        #[serde(with = "super::iso_millis")]
        ts: DateTime<Utc>,
    },
    /// The ledger's root moved.
    #[serde(rename_all = "camelCase")]
    RootChange {
        ledger_id: String,
        previous_root: String,
        new_root: String,
        #[serde(with = "super::u64_string")]
        entry_count: u64,
        #[serde(with = "super::iso_millis")]
        ts: DateTime<Utc>,
    },
    /// An append failed after side effects may have started.
    #[serde(rename_all = "camelCase")]
    Error {
        ledger_id: String,
        message: String,
        #[serde(with = "super::iso_millis")]
        ts: DateTime<Utc>,
    },
}

impl LedgerEvent {
    pub fn ledger_id(&self) -> &str {
        match self {
            Self::EntryAppend { ledger_id, .. }
            | Self::RootChange { ledger_id, .. }
            | Self::Error { ledger_id, .. } => ledger_id,
        }
    }
}
