//! Consistency Proofs
//!
//! Evidence that a newer root extends, rather than rewrites, an older root:
//! the RFC6962 SUBPROOF node sequence shows the first `m` leaves of the
//! size-`n` tree hash to the old root while all `n` leaves hash to the new
//! root. Verification recomputes both roots from the nodes alone.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::split_point;
use super::tree::{MerkleError, MerkleTree};
use crate::canonical::canonical_timestamp;
use crate::hash::{decode_hash32, digest_pair, HashAlgorithm, GENESIS_HASH};

fn default_version() -> u64 {
    1
}

/// Consistency proof between two historical sizes of one ledger.
///
/// Serializes to the wire form `{v, or, os, nr, ns, p, ts}` with sizes as
/// decimal strings and a millisecond ISO-8601 timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyProof {
    #[serde(rename = "v", default = "default_version")]
    pub version: u64,
    #[serde(rename = "or")]
    pub old_root: String,
    #[serde(rename = "os", with = "crate::types::u64_string")]
    pub old_size: u64,
    #[serde(rename = "nr")]
    pub new_root: String,
    #[serde(rename = "ns", with = "crate::types::u64_string")]
    pub new_size: u64,
    #[serde(rename = "p")]
    pub nodes: Vec<String>,
    #[serde(rename = "ts")]
    pub generated_at: String,
}

/// Generate a consistency proof from the current leaves. Requires
/// `old_size <= new_size <= tree.size()`.
pub(super) fn generate(
    tree: &MerkleTree,
    old_size: u64,
    new_size: u64,
) -> Result<ConsistencyProof, MerkleError> {
    let size = tree.size();
    if old_size > new_size || new_size > size {
        return Err(MerkleError::InvalidRange {
            old_size,
            new_size,
            size,
        });
    }

    let root_at = |s: u64| -> String {
        if s == 0 {
            GENESIS_HASH.to_string()
        } else {
            hex::encode(tree.range_root(0, s))
        }
    };

    let mut nodes = Vec::new();
    if old_size > 0 && old_size < new_size {
        subproof(tree, old_size, 0, new_size, true, &mut nodes);
    }

    Ok(ConsistencyProof {
        version: 1,
        old_root: root_at(old_size),
        old_size,
        new_root: root_at(new_size),
        new_size,
        nodes,
        generated_at: canonical_timestamp(Utc::now()),
    })
}

/// RFC6962 SUBPROOF over the leaf range `[lo, hi)`: prove the first `m`
/// leaves of the range. `complete` marks that the prefix is the whole old
/// tree, whose root the verifier already holds.
fn subproof(tree: &MerkleTree, m: u64, lo: u64, hi: u64, complete: bool, out: &mut Vec<String>) {
    let n = hi - lo;
    if m == n {
        if !complete {
            out.push(hex::encode(tree.range_root(lo, hi)));
        }
        return;
    }
    let k = split_point(n);
    if m <= k {
        subproof(tree, m, lo, lo + k, complete, out);
        out.push(hex::encode(tree.range_root(lo + k, hi)));
    } else {
        subproof(tree, m - k, lo + k, hi, false, out);
        out.push(hex::encode(tree.range_root(lo, lo + k)));
    }
}

/// Verify a consistency proof: recompute the old and new roots from the node
/// sequence and compare both against the claimed roots. Any divergence,
/// leftover node, or malformed hash fails.
pub fn verify_consistency_proof(algorithm: HashAlgorithm, proof: &ConsistencyProof) -> bool {
    let (m, n) = (proof.old_size, proof.new_size);
    if m > n {
        return false;
    }
    let Ok(old_root) = decode_hash32(&proof.old_root) else {
        return false;
    };
    if decode_hash32(&proof.new_root).is_err() {
        return false;
    }
    let nodes: Vec<[u8; 32]> = match proof.nodes.iter().map(|h| decode_hash32(h)).collect() {
        Ok(v) => v,
        Err(_) => return false,
    };

    if m == n {
        return nodes.is_empty() && proof.old_root == proof.new_root;
    }
    // The empty tree is a prefix of every tree.
    if m == 0 {
        return nodes.is_empty() && proof.old_root == GENESIS_HASH;
    }

    let mut cursor = 0usize;
    let Some((computed_old, computed_new)) =
        walk(algorithm, m, n, true, &nodes, &mut cursor, &old_root)
    else {
        return false;
    };
    cursor == nodes.len()
        && computed_old == old_root
        && hex::encode(computed_new) == proof.new_root
}

/// Mirror of the SUBPROOF recursion, consuming nodes in generation order and
/// returning (old-root component, new-root component) for the range.
fn walk(
    algorithm: HashAlgorithm,
    m: u64,
    n: u64,
    complete: bool,
    nodes: &[[u8; 32]],
    cursor: &mut usize,
    seed_old: &[u8; 32],
) -> Option<([u8; 32], [u8; 32])> {
    if m == n {
        let hash = if complete {
            *seed_old
        } else {
            let node = *nodes.get(*cursor)?;
            *cursor += 1;
            node
        };
        return Some((hash, hash));
    }
    let k = split_point(n);
    if m <= k {
        let (old, new_left) = walk(algorithm, m, k, complete, nodes, cursor, seed_old)?;
        let right = *nodes.get(*cursor)?;
        *cursor += 1;
        Some((old, digest_pair(algorithm, &new_left, &right)))
    } else {
        let (old_right, new_right) = walk(algorithm, m - k, n - k, false, nodes, cursor, seed_old)?;
        let left = *nodes.get(*cursor)?;
        *cursor += 1;
        Some((
            digest_pair(algorithm, &left, &old_right),
            digest_pair(algorithm, &left, &new_right),
        ))
    }
}
