//! Batch Inclusion Proofs
//!
//! Proves a set of leaves at once with the minimum set of shared sibling
//! nodes: any maximal subtree containing no proven leaf contributes exactly
//! one node. Verification reconstructs the root jointly from the supplied
//! leaves and the shared nodes, so no other leaf is revealed.
//!
//! The proof carries the tree size: the RFC6962 subtree boundaries are not
//! recoverable from the leaf indices alone.

use serde::{Deserialize, Serialize};

use super::proof::Direction;
use super::split_point;
use super::tree::{MerkleError, MerkleTree};
use crate::hash::{decode_hash32, digest_pair, HashAlgorithm, GENESIS_HASH};

/// Batch proof for a set of leaf indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProof {
    /// Size of the tree the proof was generated against.
    pub tree_size: u64,
    /// Leaf hashes at `indices`, in the same order.
    pub leaves: Vec<String>,
    /// Proven indices, strictly ascending.
    pub indices: Vec<u64>,
    /// Shared sibling subtree roots, in generation (pre-order) sequence.
    pub nodes: Vec<String>,
    /// For each leaf, the indices into `nodes` its root path consumes,
    /// bottom to top.
    pub node_map: Vec<Vec<usize>>,
    /// For each leaf, the sibling direction at every level, bottom to top.
    pub directions: Vec<Vec<Direction>>,
    pub root: String,
}

/// Minified wire form: `{v, n, l, i, p, m, d, r}` with directions as 0/1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProofWire {
    pub v: u64,
    pub n: u64,
    pub l: Vec<String>,
    pub i: Vec<u64>,
    pub p: Vec<String>,
    pub m: Vec<Vec<usize>>,
    pub d: Vec<Vec<u8>>,
    pub r: String,
}

impl From<&BatchProof> for BatchProofWire {
    fn from(proof: &BatchProof) -> Self {
        Self {
            v: 1,
            n: proof.tree_size,
            l: proof.leaves.clone(),
            i: proof.indices.clone(),
            p: proof.nodes.clone(),
            m: proof.node_map.clone(),
            d: proof
                .directions
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|d| match d {
                            Direction::Left => 0,
                            Direction::Right => 1,
                        })
                        .collect()
                })
                .collect(),
            r: proof.root.clone(),
        }
    }
}

impl TryFrom<BatchProofWire> for BatchProof {
    type Error = MerkleError;

    fn try_from(wire: BatchProofWire) -> Result<Self, Self::Error> {
        if wire.v != 1 {
            return Err(MerkleError::InvalidLeaf(format!(
                "unsupported batch proof version: {}",
                wire.v
            )));
        }
        let directions = wire
            .d
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|bit| match bit {
                        0 => Ok(Direction::Left),
                        1 => Ok(Direction::Right),
                        other => Err(MerkleError::InvalidLeaf(format!(
                            "bad direction bit: {}",
                            other
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            tree_size: wire.n,
            leaves: wire.l,
            indices: wire.i,
            nodes: wire.p,
            node_map: wire.m,
            directions,
            root: wire.r,
        })
    }
}

/// Generate a batch proof over `indices` (deduplicated, sorted ascending).
pub(super) fn generate(tree: &MerkleTree, indices: &[u64]) -> Result<BatchProof, MerkleError> {
    let size = tree.size();
    let mut targets: Vec<u64> = indices.to_vec();
    targets.sort_unstable();
    targets.dedup();
    if let Some(&bad) = targets.iter().find(|&&i| i >= size) {
        return Err(MerkleError::IndexOutOfRange { index: bad, size });
    }

    let mut ranges = Vec::new();
    if size > 0 {
        collect_shared_ranges(&targets, 0, size, &mut ranges);
    }
    let nodes: Vec<String> = ranges
        .iter()
        .map(|&(lo, hi)| hex::encode(tree.range_root(lo, hi)))
        .collect();

    let mut node_map = Vec::with_capacity(targets.len());
    let mut directions = Vec::with_capacity(targets.len());
    for &index in &targets {
        let (map_row, dir_row) = leaf_path(&targets, &ranges, index, size);
        node_map.push(map_row);
        directions.push(dir_row);
    }

    let all_leaves = tree.leaves();
    Ok(BatchProof {
        tree_size: size,
        leaves: targets
            .iter()
            .map(|&i| all_leaves[i as usize].clone())
            .collect(),
        indices: targets,
        nodes,
        node_map,
        directions,
        root: tree.root(),
    })
}

/// Verify a batch proof: structural checks, the per-leaf map, and a joint
/// root reconstruction that must consume every shared node exactly once.
pub fn verify_batch_proof(algorithm: HashAlgorithm, proof: &BatchProof) -> bool {
    let n = proof.tree_size;
    let targets = &proof.indices;

    if proof.leaves.len() != targets.len()
        || proof.node_map.len() != targets.len()
        || proof.directions.len() != targets.len()
    {
        return false;
    }
    if !targets.windows(2).all(|w| w[0] < w[1]) {
        return false;
    }
    if targets.iter().any(|&i| i >= n) {
        return false;
    }

    let Ok(root) = decode_hash32(&proof.root) else {
        return false;
    };
    let leaves: Vec<[u8; 32]> = match proof.leaves.iter().map(|h| decode_hash32(h)).collect() {
        Ok(v) => v,
        Err(_) => return false,
    };
    let nodes: Vec<[u8; 32]> = match proof.nodes.iter().map(|h| decode_hash32(h)).collect() {
        Ok(v) => v,
        Err(_) => return false,
    };

    if n == 0 {
        return targets.is_empty() && nodes.is_empty() && proof.root == GENESIS_HASH;
    }

    // The shared ranges and per-leaf rows are a pure function of (size,
    // indices); a proof whose map disagrees is malformed.
    let mut ranges = Vec::new();
    collect_shared_ranges(targets, 0, n, &mut ranges);
    if ranges.len() != nodes.len() {
        return false;
    }
    for (j, &index) in targets.iter().enumerate() {
        let (map_row, dir_row) = leaf_path(targets, &ranges, index, n);
        if proof.node_map[j] != map_row || proof.directions[j] != dir_row {
            return false;
        }
    }

    let mut cursor = 0usize;
    let Some(computed) = recompute(algorithm, targets, &leaves, &nodes, &mut cursor, 0, n) else {
        return false;
    };
    cursor == nodes.len() && computed == root
}

/// True iff any target index falls in `[lo, hi)`.
fn contains_target(targets: &[u64], lo: u64, hi: u64) -> bool {
    let at = targets.partition_point(|&t| t < lo);
    at < targets.len() && targets[at] < hi
}

/// Pre-order walk recording every maximal target-free subtree range.
fn collect_shared_ranges(targets: &[u64], lo: u64, hi: u64, out: &mut Vec<(u64, u64)>) {
    if !contains_target(targets, lo, hi) {
        out.push((lo, hi));
        return;
    }
    if hi - lo == 1 {
        return;
    }
    let k = split_point(hi - lo);
    collect_shared_ranges(targets, lo, lo + k, out);
    collect_shared_ranges(targets, lo + k, hi, out);
}

/// Bottom-to-top sibling levels for one leaf: the node-list indices it
/// consumes (skipping siblings reconstructed from other proven leaves) and
/// the direction at every level.
fn leaf_path(
    targets: &[u64],
    ranges: &[(u64, u64)],
    index: u64,
    size: u64,
) -> (Vec<usize>, Vec<Direction>) {
    let mut levels = Vec::new();
    let (mut lo, mut hi) = (0, size);
    while hi - lo > 1 {
        let k = split_point(hi - lo);
        if index < lo + k {
            levels.push(((lo + k, hi), Direction::Right));
            hi = lo + k;
        } else {
            levels.push(((lo, lo + k), Direction::Left));
            lo += k;
        }
    }
    levels.reverse();

    let mut map_row = Vec::new();
    let mut dir_row = Vec::with_capacity(levels.len());
    for (range, direction) in levels {
        if !contains_target(targets, range.0, range.1) {
            if let Some(at) = ranges.iter().position(|&r| r == range) {
                map_row.push(at);
            }
        }
        dir_row.push(direction);
    }
    (map_row, dir_row)
}

/// Joint reconstruction over `[lo, hi)`: target-free subtrees consume the
/// next shared node, proven leaves come from the supplied set.
fn recompute(
    algorithm: HashAlgorithm,
    targets: &[u64],
    leaves: &[[u8; 32]],
    nodes: &[[u8; 32]],
    cursor: &mut usize,
    lo: u64,
    hi: u64,
) -> Option<[u8; 32]> {
    if !contains_target(targets, lo, hi) {
        let node = *nodes.get(*cursor)?;
        *cursor += 1;
        return Some(node);
    }
    if hi - lo == 1 {
        let at = targets.binary_search(&lo).ok()?;
        return leaves.get(at).copied();
    }
    let k = split_point(hi - lo);
    let left = recompute(algorithm, targets, leaves, nodes, cursor, lo, lo + k)?;
    let right = recompute(algorithm, targets, leaves, nodes, cursor, lo + k, hi)?;
    Some(digest_pair(algorithm, &left, &right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256_hex;

    fn tree_of(n: usize) -> MerkleTree {
        let mut tree = MerkleTree::new(HashAlgorithm::Sha256);
        for i in 0..n {
            tree.append(&sha256_hex(format!("leaf-{}", i).as_bytes())).unwrap();
        }
        tree
    }

    #[test]
    fn test_batch_proofs_verify_across_subsets() {
        let tree = tree_of(7);
        let cases: Vec<Vec<u64>> = vec![
            vec![0],
            vec![6],
            vec![0, 6],
            vec![1, 2, 3],
            vec![0, 2, 4, 6],
            vec![0, 1, 2, 3, 4, 5, 6],
        ];
        for indices in cases {
            let proof = tree.batch_proof(&indices).unwrap();
            assert!(
                verify_batch_proof(HashAlgorithm::Sha256, &proof),
                "indices {:?}",
                indices
            );
            assert_eq!(proof.root, tree.root());
        }
    }

    #[test]
    fn test_batch_dedup_and_sort() {
        let tree = tree_of(5);
        let proof = tree.batch_proof(&[3, 1, 3, 1]).unwrap();
        assert_eq!(proof.indices, vec![1, 3]);
        assert!(verify_batch_proof(HashAlgorithm::Sha256, &proof));
    }

    #[test]
    fn test_batch_out_of_range() {
        let tree = tree_of(3);
        assert!(matches!(
            tree.batch_proof(&[0, 3]),
            Err(MerkleError::IndexOutOfRange { index: 3, .. })
        ));
    }

    #[test]
    fn test_tampered_leaf_fails() {
        let tree = tree_of(6);
        let mut proof = tree.batch_proof(&[1, 4]).unwrap();
        proof.leaves[0] = sha256_hex(b"tampered");
        assert!(!verify_batch_proof(HashAlgorithm::Sha256, &proof));
    }

    #[test]
    fn test_tampered_node_fails() {
        let tree = tree_of(6);
        let mut proof = tree.batch_proof(&[1, 4]).unwrap();
        proof.nodes[0] = sha256_hex(b"tampered");
        assert!(!verify_batch_proof(HashAlgorithm::Sha256, &proof));
    }

    #[test]
    fn test_tampered_root_fails() {
        let tree = tree_of(6);
        let mut proof = tree.batch_proof(&[2]).unwrap();
        proof.root = sha256_hex(b"other");
        assert!(!verify_batch_proof(HashAlgorithm::Sha256, &proof));
    }

    #[test]
    fn test_malformed_map_fails() {
        let tree = tree_of(6);
        let mut proof = tree.batch_proof(&[1, 4]).unwrap();
        if let Some(first) = proof.node_map[0].first_mut() {
            *first += 1;
        }
        assert!(!verify_batch_proof(HashAlgorithm::Sha256, &proof));
    }

    #[test]
    fn test_length_disagreement_fails() {
        let tree = tree_of(6);
        let mut proof = tree.batch_proof(&[1, 4]).unwrap();
        proof.leaves.pop();
        assert!(!verify_batch_proof(HashAlgorithm::Sha256, &proof));
    }

    #[test]
    fn test_single_leaf_tree_batch() {
        let tree = tree_of(1);
        let proof = tree.batch_proof(&[0]).unwrap();
        assert!(proof.nodes.is_empty());
        assert!(verify_batch_proof(HashAlgorithm::Sha256, &proof));
    }

    #[test]
    fn test_wire_round_trip() {
        let tree = tree_of(7);
        let proof = tree.batch_proof(&[0, 3, 5]).unwrap();
        let wire = BatchProofWire::from(&proof);
        assert_eq!(wire.v, 1);
        assert_eq!(wire.n, 7);
        let back = BatchProof::try_from(wire).unwrap();
        assert_eq!(back, proof);
        assert!(verify_batch_proof(HashAlgorithm::Sha256, &back));
    }
}
