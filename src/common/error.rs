//! Common Error Types
//!
//! Unified error handling across all modules.

use thiserror::Error;

/// Root error type for VeilChain
#[derive(Debug, Error)]
pub enum VeilChainError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    /// Ledger service errors
    #[error("ledger error: {0}")]
    Ledger(#[from] crate::ledger::LedgerError),

    /// Merkle tree errors
    #[error("merkle error: {0}")]
    Merkle(#[from] crate::merkle::MerkleError),

    /// Hash errors
    #[error("hash error: {0}")]
    Hash(#[from] crate::hash::HashError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// Root publication errors
    #[error("publish error: {0}")]
    Publish(#[from] crate::publisher::PublishError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VeilChainError {
    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            VeilChainError::Config(_) => "CONFIG_ERROR",
            VeilChainError::Logging(_) => "LOGGING_ERROR",
            VeilChainError::Ledger(e) => match e {
                crate::ledger::LedgerError::LedgerNotFound(_) => "LEDGER_NOT_FOUND",
                crate::ledger::LedgerError::ChainIntegrity(_) => "CHAIN_INTEGRITY_ERROR",
                crate::ledger::LedgerError::Merkle(m) => merkle_code(m),
                crate::ledger::LedgerError::Hash(_) => "INVALID_HASH",
                crate::ledger::LedgerError::Storage(s) => storage_code(s),
            },
            VeilChainError::Merkle(m) => merkle_code(m),
            VeilChainError::Hash(_) => "INVALID_HASH",
            VeilChainError::Storage(s) => storage_code(s),
            VeilChainError::Publish(_) => "PUBLISH_ERROR",
            VeilChainError::Io(_) => "IO_ERROR",
        }
    }
}

fn merkle_code(e: &crate::merkle::MerkleError) -> &'static str {
    match e {
        crate::merkle::MerkleError::IndexOutOfRange { .. } => "INDEX_OUT_OF_RANGE",
        crate::merkle::MerkleError::InvalidLeaf(_) => "INVALID_PROOF",
        crate::merkle::MerkleError::InvalidRange { .. } => "INDEX_OUT_OF_RANGE",
    }
}

fn storage_code(e: &crate::storage::StorageError) -> &'static str {
    match e {
        crate::storage::StorageError::Conflict(_) => "STORAGE_CONFLICT",
        crate::storage::StorageError::Integrity(_) => "INTEGRITY_ERROR",
        crate::storage::StorageError::NotFound(_) => "NOT_FOUND",
        _ => "STORAGE_ERROR",
    }
}

/// Result type alias using VeilChainError
pub type Result<T> = std::result::Result<T, VeilChainError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerError;
    use crate::storage::StorageError;

    #[test]
    fn test_error_codes() {
        let err: VeilChainError = LedgerError::LedgerNotFound("ledger_x".into()).into();
        assert_eq!(err.error_code(), "LEDGER_NOT_FOUND");
        assert!(err.to_string().contains("ledger_x"));

        let err: VeilChainError = StorageError::Conflict("pos 3".into()).into();
        assert_eq!(err.error_code(), "STORAGE_CONFLICT");

        let err: VeilChainError = StorageError::Integrity("blob".into()).into();
        assert_eq!(err.error_code(), "INTEGRITY_ERROR");
    }

    #[test]
    fn test_merkle_codes() {
        let err: VeilChainError =
            crate::merkle::MerkleError::IndexOutOfRange { index: 5, size: 2 }.into();
        assert_eq!(err.error_code(), "INDEX_OUT_OF_RANGE");
    }
}
