//! Hash Primitives
//!
//! SHA-256 (default) and BLAKE3 digests with hex rendering at module
//! boundaries, the pair hash used to build internal Merkle nodes, and the
//! entry leaf hash that binds payload data to its ledger position.
//!
//! The hash algorithm is a ledger-creation-time choice and immutable
//! thereafter. Proofs carry no algorithm tag; the algorithm is implied by
//! ledger metadata.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::canonical::{canonical_json_bytes, CanonicalError};

/// Root of the empty tree and parent hash of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash-related errors
#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("canonical serialization failed: {0}")]
    Canonical(#[from] CanonicalError),
}

/// Digest algorithm for a ledger. Chosen at creation time, immutable after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Blake3,
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            _ => Err(HashError::InvalidHash(format!("unknown algorithm: {}", s))),
        }
    }
}

/// SHA-256 over raw bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 rendered as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Digest raw bytes with the given algorithm.
pub fn digest(algorithm: HashAlgorithm, data: &[u8]) -> [u8; 32] {
    match algorithm {
        HashAlgorithm::Sha256 => sha256(data),
        HashAlgorithm::Blake3 => *blake3::hash(data).as_bytes(),
    }
}

/// Digest raw bytes, rendered as lowercase hex.
pub fn digest_hex(algorithm: HashAlgorithm, data: &[u8]) -> String {
    hex::encode(digest(algorithm, data))
}

/// Hash an internal node from its two children (left first).
pub(crate) fn digest_pair(algorithm: HashAlgorithm, left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    digest(algorithm, &buf)
}

/// Hash a pair of hex-encoded 32-byte hashes: decode, concatenate left
/// first, digest.
pub fn hash_pair(
    algorithm: HashAlgorithm,
    left_hex: &str,
    right_hex: &str,
) -> Result<String, HashError> {
    let left = decode_hash32(left_hex)?;
    let right = decode_hash32(right_hex)?;
    Ok(hex::encode(digest_pair(algorithm, &left, &right)))
}

/// Compute the leaf hash of entry data at a position.
///
/// The digest input is the canonical-JSON byte image of `data` followed by
/// the position as an 8-byte big-endian unsigned integer, fixed so that
/// independent implementations produce identical leaves.
pub fn hash_entry(
    algorithm: HashAlgorithm,
    data: &serde_json::Value,
    position: u64,
) -> Result<String, HashError> {
    let mut bytes = canonical_json_bytes(data)?;
    bytes.extend_from_slice(&position.to_be_bytes());
    Ok(digest_hex(algorithm, &bytes))
}

/// Derive an entry identifier from its leaf hash.
pub fn entry_id_from_hash(leaf_hash: &str) -> String {
    format!("ent_{}", &leaf_hash[..leaf_hash.len().min(32)])
}

/// True iff `s` matches `^[0-9a-f]{64}$`.
pub fn is_valid_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Decode a hex-encoded 32-byte hash.
pub(crate) fn decode_hash32(s: &str) -> Result<[u8; 32], HashError> {
    if !is_valid_hash(s) {
        return Err(HashError::InvalidHash(s.to_string()));
    }
    let bytes = hex::decode(s).map_err(|e| HashError::InvalidHash(e.to_string()))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
