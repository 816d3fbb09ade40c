//! Error types for the arbor-store crate

use thiserror::Error;

/// Result type alias using `StoreError`
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by a backing store
///
/// The tree surfaces these unchanged; retry policy belongs to the store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A record exists but could not be read back
    #[error("corrupted record {key}: {reason}")]
    Corrupted { key: String, reason: String },

    /// Write rejected by the backend
    #[error("write rejected: {0}")]
    WriteRejected(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
