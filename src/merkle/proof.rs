//! Inclusion Proofs
//!
//! The sibling path that lets a verifier recompute the root from one leaf,
//! plus the compact `VP1:` transport (deterministic CBOR inside base64) for
//! QR/URL delivery.

use base64::Engine;
use ciborium::Value as CborValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::canonical;
use crate::hash::{decode_hash32, digest_pair, HashAlgorithm};

const COMPACT_PREFIX: &str = "VP1:";
const COMPACT_VERSION: u64 = 1;

/// Which side a sibling hash sits on, relative to the node on the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
}

/// Inclusion proof for a single leaf.
///
/// Serializes to the canonical wire form
/// `{"leaf", "index", "proof", "directions", "root"}` with sibling hashes
/// ordered bottom to top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub leaf: String,
    pub index: u64,
    pub proof: Vec<String>,
    pub directions: Vec<Direction>,
    pub root: String,
}

/// Proof transport errors
#[derive(Debug, Error)]
pub enum ProofCodecError {
    #[error("missing VP1 prefix")]
    MissingPrefix,

    #[error("unsupported proof version: {0}")]
    UnsupportedVersion(u64),

    #[error("base64 decoding failed: {0}")]
    Base64(String),

    #[error("CBOR payload malformed: {0}")]
    Cbor(String),
}

/// Verify an inclusion proof by folding the sibling path onto the leaf and
/// comparing the result to the claimed root.
///
/// Returns `false` on any malformed input: length disagreement between the
/// path and its directions, or a hash that is not 64 lowercase hex chars.
pub fn verify_inclusion(algorithm: HashAlgorithm, proof: &InclusionProof) -> bool {
    if proof.proof.len() != proof.directions.len() {
        return false;
    }
    let Ok(mut current) = decode_hash32(&proof.leaf) else {
        return false;
    };
    let Ok(root) = decode_hash32(&proof.root) else {
        return false;
    };

    for (sibling_hex, direction) in proof.proof.iter().zip(&proof.directions) {
        let Ok(sibling) = decode_hash32(sibling_hex) else {
            return false;
        };
        current = match direction {
            Direction::Left => digest_pair(algorithm, &sibling, &current),
            Direction::Right => digest_pair(algorithm, &current, &sibling),
        };
    }

    current == root
}

impl InclusionProof {
    /// Encode as `VP1:<base64(deterministic CBOR)>`.
    ///
    /// The CBOR map carries `v` (version), `l` (leaf bytes), `i` (index),
    /// `p` (sibling hashes concatenated, 32 bytes each), `d` (direction bit
    /// string, `'0'` = left, `'1'` = right) and `r` (root bytes), with keys
    /// emitted in sorted order.
    pub fn to_compact(&self) -> Result<String, ProofCodecError> {
        let leaf = decode_hash32(&self.leaf)
            .map_err(|e| ProofCodecError::Cbor(e.to_string()))?;
        let root = decode_hash32(&self.root)
            .map_err(|e| ProofCodecError::Cbor(e.to_string()))?;

        let mut siblings = Vec::with_capacity(self.proof.len() * 32);
        for hex_hash in &self.proof {
            let bytes = decode_hash32(hex_hash)
                .map_err(|e| ProofCodecError::Cbor(e.to_string()))?;
            siblings.extend_from_slice(&bytes);
        }
        let bits: String = self
            .directions
            .iter()
            .map(|d| match d {
                Direction::Left => '0',
                Direction::Right => '1',
            })
            .collect();

        // Keys in sorted byte order for deterministic output.
        let map = CborValue::Map(vec![
            (CborValue::Text("d".into()), CborValue::Text(bits)),
            (CborValue::Text("i".into()), CborValue::Integer(self.index.into())),
            (CborValue::Text("l".into()), CborValue::Bytes(leaf.to_vec())),
            (CborValue::Text("p".into()), CborValue::Bytes(siblings)),
            (CborValue::Text("r".into()), CborValue::Bytes(root.to_vec())),
            (
                CborValue::Text("v".into()),
                CborValue::Integer(COMPACT_VERSION.into()),
            ),
        ]);

        let bytes =
            canonical::canonical_cbor_encode(&map).map_err(|e| ProofCodecError::Cbor(e.to_string()))?;
        Ok(format!(
            "{}{}",
            COMPACT_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(bytes)
        ))
    }

    /// Decode a compact `VP1:` proof back into its canonical form.
    pub fn from_compact(encoded: &str) -> Result<Self, ProofCodecError> {
        let payload = encoded
            .strip_prefix(COMPACT_PREFIX)
            .ok_or(ProofCodecError::MissingPrefix)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| ProofCodecError::Base64(e.to_string()))?;
        let value: CborValue = ciborium::from_reader(bytes.as_slice())
            .map_err(|e| ProofCodecError::Cbor(e.to_string()))?;

        let CborValue::Map(entries) = value else {
            return Err(ProofCodecError::Cbor("expected map".into()));
        };

        let mut version = None;
        let mut leaf = None;
        let mut index = None;
        let mut siblings = None;
        let mut bits = None;
        let mut root = None;
        for (key, val) in entries {
            let CborValue::Text(key) = key else {
                return Err(ProofCodecError::Cbor("non-text key".into()));
            };
            match (key.as_str(), val) {
                ("v", CborValue::Integer(i)) => version = Some(i128::from(i)),
                ("i", CborValue::Integer(i)) => index = Some(i128::from(i)),
                ("l", CborValue::Bytes(b)) => leaf = Some(b),
                ("p", CborValue::Bytes(b)) => siblings = Some(b),
                ("d", CborValue::Text(t)) => bits = Some(t),
                ("r", CborValue::Bytes(b)) => root = Some(b),
                (other, _) => {
                    return Err(ProofCodecError::Cbor(format!("unexpected field: {}", other)));
                }
            }
        }

        let version = version.ok_or_else(|| ProofCodecError::Cbor("missing v".into()))?;
        if version != COMPACT_VERSION as i128 {
            return Err(ProofCodecError::UnsupportedVersion(version as u64));
        }
        let leaf = leaf.ok_or_else(|| ProofCodecError::Cbor("missing l".into()))?;
        let index = index.ok_or_else(|| ProofCodecError::Cbor("missing i".into()))?;
        let siblings = siblings.ok_or_else(|| ProofCodecError::Cbor("missing p".into()))?;
        let bits = bits.ok_or_else(|| ProofCodecError::Cbor("missing d".into()))?;
        let root = root.ok_or_else(|| ProofCodecError::Cbor("missing r".into()))?;

        if leaf.len() != 32 || root.len() != 32 || siblings.len() % 32 != 0 {
            return Err(ProofCodecError::Cbor("bad hash length".into()));
        }
        if !(0..=u64::MAX as i128).contains(&index) {
            return Err(ProofCodecError::Cbor("index out of range".into()));
        }
        if bits.len() != siblings.len() / 32 {
            return Err(ProofCodecError::Cbor(
                "direction count disagrees with path".into(),
            ));
        }

        let directions = bits
            .chars()
            .map(|c| match c {
                '0' => Ok(Direction::Left),
                '1' => Ok(Direction::Right),
                _ => Err(ProofCodecError::Cbor("bad direction bit".into())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            leaf: hex::encode(leaf),
            index: index as u64,
            proof: siblings.chunks(32).map(hex::encode).collect(),
            directions,
            root: hex::encode(root),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256_hex;
    use crate::merkle::MerkleTree;

    fn sample_tree() -> MerkleTree {
        let mut tree = MerkleTree::new(HashAlgorithm::Sha256);
        for i in 0..5u8 {
            tree.append(&sha256_hex(&[i])).unwrap();
        }
        tree
    }

    #[test]
    fn test_verify_rejects_tampered_leaf() {
        let tree = sample_tree();
        let mut proof = tree.proof(2).unwrap();
        proof.leaf = sha256_hex(b"tampered");
        assert!(!verify_inclusion(HashAlgorithm::Sha256, &proof));
    }

    #[test]
    fn test_verify_rejects_tampered_root() {
        let tree = sample_tree();
        let mut proof = tree.proof(1).unwrap();
        proof.root = sha256_hex(b"other-root");
        assert!(!verify_inclusion(HashAlgorithm::Sha256, &proof));
    }

    #[test]
    fn test_verify_rejects_length_mismatch() {
        let tree = sample_tree();
        let mut proof = tree.proof(0).unwrap();
        proof.directions.pop();
        assert!(!verify_inclusion(HashAlgorithm::Sha256, &proof));
    }

    #[test]
    fn test_verify_rejects_bad_hex() {
        let tree = sample_tree();
        let mut proof = tree.proof(0).unwrap();
        proof.proof[0] = "zz".repeat(32);
        assert!(!verify_inclusion(HashAlgorithm::Sha256, &proof));
    }

    #[test]
    fn test_compact_round_trip_bit_exact() {
        let tree = sample_tree();
        for i in 0..5 {
            let proof = tree.proof(i).unwrap();
            let compact = proof.to_compact().unwrap();
            assert!(compact.starts_with("VP1:"));
            let parsed = InclusionProof::from_compact(&compact).unwrap();
            assert_eq!(parsed, proof);
            // Re-encoding is byte-identical.
            assert_eq!(parsed.to_compact().unwrap(), compact);
        }
    }

    #[test]
    fn test_compact_rejects_missing_prefix() {
        assert!(matches!(
            InclusionProof::from_compact("AAAA"),
            Err(ProofCodecError::MissingPrefix)
        ));
    }

    #[test]
    fn test_compact_rejects_wrong_version() {
        let tree = sample_tree();
        let proof = tree.proof(0).unwrap();
        let compact = proof.to_compact().unwrap();
        // Decode, bump the version, re-encode.
        let payload = base64::engine::general_purpose::STANDARD
            .decode(compact.strip_prefix("VP1:").unwrap())
            .unwrap();
        let CborValue::Map(mut entries) =
            ciborium::from_reader::<CborValue, _>(payload.as_slice()).unwrap()
        else {
            panic!("expected map");
        };
        for (key, val) in entries.iter_mut() {
            if matches!(key, CborValue::Text(t) if t == "v") {
                *val = CborValue::Integer(2.into());
            }
        }
        let mut buf = Vec::new();
        ciborium::into_writer(&CborValue::Map(entries), &mut buf).unwrap();
        let bad = format!(
            "VP1:{}",
            base64::engine::general_purpose::STANDARD.encode(buf)
        );
        assert!(matches!(
            InclusionProof::from_compact(&bad),
            Err(ProofCodecError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_wire_json_shape() {
        let tree = sample_tree();
        let proof = tree.proof(0).unwrap();
        let json = serde_json::to_value(&proof).unwrap();
        assert!(json.get("leaf").is_some());
        assert!(json.get("index").is_some());
        assert!(json.get("proof").is_some());
        assert_eq!(json["directions"][0], "right");
        assert!(json.get("root").is_some());
    }
}
