//! Merkle Tree Engine
//!
//! RFC6962-style binary tree over leaf digests with inclusion proofs, batch
//! proofs, and consistency proofs between historical sizes. All proof
//! verification is offline: verifiers need only the proof and the claimed
//! root, never the tree.

mod batch;
mod consistency;
mod proof;
mod tree;

pub use batch::{verify_batch_proof, BatchProof, BatchProofWire};
pub use consistency::{verify_consistency_proof, ConsistencyProof};
pub use proof::{verify_inclusion, Direction, InclusionProof, ProofCodecError};
pub use tree::{MerkleTree, MerkleError};

/// Largest power of two strictly smaller than `n`. Callers guarantee `n >= 2`.
pub(crate) fn split_point(n: u64) -> u64 {
    debug_assert!(n >= 2);
    1u64 << (63 - (n - 1).leading_zeros())
}
