//! Ledger Metadata
//!
//! One record per ledger: identity, hash algorithm, current root commitment,
//! and the strictly monotonic entry count. Mutated only by the ledger
//! service on append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::{HashAlgorithm, GENESIS_HASH};

/// Generate a fresh ledger identifier.
pub fn new_ledger_id() -> String {
    format!("ledger_{}", uuid::Uuid::new_v4().simple())
}

/// Metadata for one ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerMetadata {
    /// Opaque identifier, `ledger_` prefixed.
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Digest algorithm, fixed at creation.
    #[serde(default)]
    pub algorithm: HashAlgorithm,
    /// Current Merkle root over all entries, hex.
    pub root_hash: String,
    /// Number of entries; equals the Merkle tree size.
    #[serde(with = "super::u64_string")]
    pub entry_count: u64,
    #[serde(with = "super::iso_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "super::iso_millis_opt", skip_serializing_if = "Option::is_none")]
    pub last_entry_at: Option<DateTime<Utc>>,
}

impl LedgerMetadata {
    /// Create metadata for a new, empty ledger.
    pub fn new(name: impl Into<String>, description: Option<String>, algorithm: HashAlgorithm) -> Self {
        Self {
            id: new_ledger_id(),
            name: name.into(),
            description,
            algorithm,
            root_hash: GENESIS_HASH.to_string(),
            entry_count: 0,
            created_at: Utc::now(),
            last_entry_at: None,
        }
    }
}

/// Partial update applied by the ledger service after an append.
#[derive(Debug, Clone, Default)]
pub struct LedgerMetadataPatch {
    pub root_hash: Option<String>,
    pub entry_count: Option<u64>,
    pub last_entry_at: Option<DateTime<Utc>>,
}

impl LedgerMetadataPatch {
    /// Apply this patch to a metadata record in place.
    pub fn apply(&self, meta: &mut LedgerMetadata) {
        if let Some(root_hash) = &self.root_hash {
            meta.root_hash = root_hash.clone();
        }
        if let Some(entry_count) = self.entry_count {
            meta.entry_count = entry_count;
        }
        if let Some(last_entry_at) = self.last_entry_at {
            meta.last_entry_at = Some(last_entry_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ledger_starts_at_genesis() {
        let meta = LedgerMetadata::new("audit", None, HashAlgorithm::Sha256);
        assert!(meta.id.starts_with("ledger_"));
        assert_eq!(meta.root_hash, GENESIS_HASH);
        assert_eq!(meta.entry_count, 0);
        assert!(meta.last_entry_at.is_none());
    }

    #[test]
    fn test_ledger_ids_unique() {
        assert_ne!(new_ledger_id(), new_ledger_id());
    }

    #[test]
    fn test_entry_count_serializes_as_string() {
        let meta = LedgerMetadata::new("audit", None, HashAlgorithm::Sha256);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["entry_count"], "0");
        assert_eq!(json["algorithm"], "sha256");
    }

    #[test]
    fn test_patch_applies_selected_fields() {
        let mut meta = LedgerMetadata::new("audit", None, HashAlgorithm::Sha256);
        let now = Utc::now();
        LedgerMetadataPatch {
            root_hash: Some("ab".repeat(32)),
            entry_count: Some(5),
            last_entry_at: Some(now),
        }
        .apply(&mut meta);
        assert_eq!(meta.entry_count, 5);
        assert_eq!(meta.root_hash, "ab".repeat(32));
        assert_eq!(meta.last_entry_at, Some(now));

        LedgerMetadataPatch::default().apply(&mut meta);
        assert_eq!(meta.entry_count, 5);
    }
}
