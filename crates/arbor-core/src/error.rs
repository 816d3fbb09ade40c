//! Error types for the arbor-core crate

use arbor_crypto::Blake3Hash;
use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in tree, version and proof operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Empty or malformed key on write
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Remove of a key that is not in the tree
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// No saved version with this number
    #[error("version not found: {0}")]
    VersionNotFound(u64),

    /// Saving would overwrite or fork existing history
    #[error("version conflict at {version}: {reason}")]
    VersionConflict { version: u64, reason: String },

    /// Version is still needed by the working tree
    #[error("version {0} is in use and cannot be deleted")]
    VersionInUse(u64),

    /// Proof bytes could not be decoded or are structurally inconsistent
    #[error("malformed proof: {0}")]
    MalformedProof(String),

    /// Recomputed root does not match the trusted root
    #[error("hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch {
        expected: Blake3Hash,
        actual: Blake3Hash,
    },

    /// Absence proof neighbours do not bracket the key or are not adjacent
    #[error("ordering violation: {0}")]
    OrderingViolation(String),

    /// Existence proof presented where absence was expected, or vice versa
    #[error("wrong proof kind: expected {expected}, found {found}")]
    WrongProofKind {
        expected: &'static str,
        found: &'static str,
    },

    /// Stored node graph is inconsistent
    #[error("tree corruption: {0}")]
    TreeCorruption(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Backing store error
    #[error("store error: {0}")]
    Store(#[from] arbor_store::StoreError),
}

impl CoreError {
    /// Whether this error came out of proof verification
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            CoreError::MalformedProof(_)
                | CoreError::HashMismatch { .. }
                | CoreError::OrderingViolation(_)
                | CoreError::WrongProofKind { .. }
        )
    }
}
