//! Merkle Tree State
//!
//! Ordered sequence of leaf digests. The tree is a pure function of its
//! leaves and is never mutated in place beyond append (rollback replaces it
//! with a re-import of a leaf prefix). Internal nodes are computed on demand
//! by the RFC6962 recursion:
//!
//! ```text
//! root(empty) = GENESIS_HASH
//! root([x])   = x                      (single leaf, no wrapping hash)
//! root(L)     = pair(root(L[0:k]), root(L[k:])), k = largest pow2 < |L|
//! ```

use thiserror::Error;

use super::batch::BatchProof;
use super::consistency::ConsistencyProof;
use super::proof::{Direction, InclusionProof};
use super::split_point;
use crate::hash::{decode_hash32, digest_pair, HashAlgorithm, GENESIS_HASH};

/// Merkle tree errors
#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("index {index} out of range for tree of size {size}")]
    IndexOutOfRange { index: u64, size: u64 },

    #[error("invalid leaf hash: {0}")]
    InvalidLeaf(String),

    #[error("invalid size range: old {old_size} new {new_size} tree {size}")]
    InvalidRange {
        old_size: u64,
        new_size: u64,
        size: u64,
    },
}

/// In-memory Merkle tree over 32-byte leaf digests.
///
/// Leaves enter and leave as lowercase hex; internally they are raw bytes so
/// node hashing never re-decodes.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    algorithm: HashAlgorithm,
    leaves: Vec<[u8; 32]>,
}

impl MerkleTree {
    /// Create an empty tree.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            leaves: Vec::new(),
        }
    }

    /// Deterministically rebuild a tree from an ordered leaf list.
    ///
    /// Used for reconstruction on service restart and for rollback.
    pub fn import<I, S>(algorithm: HashAlgorithm, leaves: I) -> Result<Self, MerkleError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tree = Self::new(algorithm);
        for leaf in leaves {
            tree.append(leaf.as_ref())?;
        }
        Ok(tree)
    }

    /// Append a leaf hash; returns the new leaf's zero-based index.
    pub fn append(&mut self, leaf_hex: &str) -> Result<u64, MerkleError> {
        let leaf = decode_hash32(leaf_hex)
            .map_err(|_| MerkleError::InvalidLeaf(leaf_hex.to_string()))?;
        self.leaves.push(leaf);
        Ok(self.leaves.len() as u64 - 1)
    }

    /// Drop all leaves at index `len` and beyond. Rollback support: after a
    /// failed persist the tree is restored to the pre-append prefix.
    pub fn truncate(&mut self, len: u64) {
        self.leaves.truncate(len as usize);
    }

    pub fn size(&self) -> u64 {
        self.leaves.len() as u64
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// The ordered leaf sequence, hex-encoded.
    pub fn leaves(&self) -> Vec<String> {
        self.leaves.iter().map(hex::encode).collect()
    }

    /// Current root hash. The empty tree roots at the genesis constant.
    pub fn root(&self) -> String {
        if self.leaves.is_empty() {
            GENESIS_HASH.to_string()
        } else {
            hex::encode(self.range_root(0, self.size()))
        }
    }

    /// Root of the subtree over leaves `[lo, hi)`. Callers guarantee
    /// `lo < hi <= size`.
    pub(crate) fn range_root(&self, lo: u64, hi: u64) -> [u8; 32] {
        if hi - lo == 1 {
            return self.leaves[lo as usize];
        }
        let k = split_point(hi - lo);
        let left = self.range_root(lo, lo + k);
        let right = self.range_root(lo + k, hi);
        digest_pair(self.algorithm, &left, &right)
    }

    /// Inclusion proof for the leaf at `index`: the sibling path from leaf to
    /// root, bottom to top, with `Left` meaning the sibling sits to the left
    /// of the node on the path.
    pub fn proof(&self, index: u64) -> Result<InclusionProof, MerkleError> {
        let size = self.size();
        if index >= size {
            return Err(MerkleError::IndexOutOfRange { index, size });
        }

        let mut path: Vec<(String, Direction)> = Vec::new();
        self.collect_path(index, 0, size, &mut path);

        let (proof, directions): (Vec<String>, Vec<Direction>) = path.into_iter().unzip();
        Ok(InclusionProof {
            leaf: hex::encode(self.leaves[index as usize]),
            index,
            proof,
            directions,
            root: self.root(),
        })
    }

    fn collect_path(&self, index: u64, lo: u64, hi: u64, out: &mut Vec<(String, Direction)>) {
        if hi - lo <= 1 {
            return;
        }
        let k = split_point(hi - lo);
        if index < lo + k {
            self.collect_path(index, lo, lo + k, out);
            out.push((hex::encode(self.range_root(lo + k, hi)), Direction::Right));
        } else {
            self.collect_path(index, lo + k, hi, out);
            out.push((hex::encode(self.range_root(lo, lo + k)), Direction::Left));
        }
    }

    /// Verify an inclusion proof against this tree's algorithm.
    pub fn verify(&self, proof: &InclusionProof) -> bool {
        super::proof::verify_inclusion(self.algorithm, proof)
    }

    /// Batch inclusion proof for a set of leaf indices (deduplicated and
    /// sorted). The shared node set is the minimum needed to recompute the
    /// root without revealing any other leaf.
    pub fn batch_proof(&self, indices: &[u64]) -> Result<BatchProof, MerkleError> {
        super::batch::generate(self, indices)
    }

    /// Consistency proof showing the first `old_size` leaves hash to the old
    /// root while all `new_size` leaves hash to the new root. Requires
    /// `old_size <= new_size <= size`.
    pub fn consistency_proof(
        &self,
        old_size: u64,
        new_size: u64,
    ) -> Result<ConsistencyProof, MerkleError> {
        super::consistency::generate(self, old_size, new_size)
    }
}
