//! Ledger Entries
//!
//! A single appended record: position, opaque payload, leaf hash, and the
//! parent-hash link to the previous entry. Immutable after persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::merkle::InclusionProof;

/// Marker value identifying a blob reference stored in an entry's data slot.
pub const BLOB_REF_TYPE: &str = "__VEILCHAIN_BLOB__";

/// One entry in a ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Identifier derived from the leaf hash (`ent_` + first 32 hex chars).
    pub id: String,
    /// Zero-based position; contiguous within a ledger.
    #[serde(with = "super::u64_string")]
    pub position: u64,
    /// Opaque payload. May hold a blob reference when persisted through the
    /// tiered store; always rehydrated before reaching callers.
    pub data: Value,
    /// Leaf hash over the canonical payload and position, hex.
    pub hash: String,
    /// Leaf hash of the previous entry, or the genesis hash at position 0.
    pub parent_hash: String,
    #[serde(with = "super::iso_millis")]
    pub created_at: DateTime<Utc>,
    /// Proof computed at append time. Tagged with the tree size and root it
    /// was generated against; it does not verify against later roots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<AppendProofRecord>,
}

/// Inclusion proof captured at append time, tagged with its tree state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendProofRecord {
    #[serde(with = "super::u64_string")]
    pub tree_size: u64,
    pub root: String,
    pub proof: InclusionProof,
}

/// Result of an append. Cached verbatim by the idempotency layer so replays
/// return the identical response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendResult {
    pub entry: LedgerEntry,
    pub proof: InclusionProof,
    pub previous_root: String,
    pub new_root: String,
}

/// Inline placeholder pointing at an offloaded payload, with a content hash
/// for the integrity check on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRef {
    #[serde(rename = "__type")]
    pub marker: String,
    pub content_hash: String,
    pub size: u64,
    pub ledger_id: String,
    pub entry_id: String,
}

impl BlobRef {
    pub fn new(content_hash: String, size: u64, ledger_id: String, entry_id: String) -> Self {
        Self {
            marker: BLOB_REF_TYPE.to_string(),
            content_hash,
            size,
            ledger_id,
            entry_id,
        }
    }

    /// Parse a data value as a blob reference, if it is one.
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.get("__type")?.as_str()? != BLOB_REF_TYPE {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "__type": self.marker,
            "contentHash": self.content_hash,
            "size": self.size,
            "ledgerId": self.ledger_id,
            "entryId": self.entry_id,
        })
    }

    /// True iff the data value carries the blob marker.
    pub fn is_blob_ref(value: &Value) -> bool {
        value.get("__type").and_then(Value::as_str) == Some(BLOB_REF_TYPE)
    }
}
