//! Canonical Serialization
//!
//! Produces byte sequences from structured data that are identical across
//! runs and implementations. Used in exactly two places: computing the leaf
//! hash of entry data, and transporting proofs.

mod cbor;
mod json;

pub use cbor::{canonical_cbor_bytes, to_cbor_value};
pub(crate) use cbor::encode as canonical_cbor_encode;
pub use json::{canonical_json_bytes, canonical_timestamp};

use thiserror::Error;

/// Canonical serialization errors
#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("JSON serialization failed: {0}")]
    Json(String),

    #[error("CBOR serialization failed: {0}")]
    Cbor(String),
}
