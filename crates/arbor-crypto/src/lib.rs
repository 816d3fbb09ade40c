//! # Arbor Crypto
//!
//! Hashing primitives for the Arbor authenticated tree.
//!
//! This crate provides:
//! - **BLAKE3**: Fast cryptographic hashing for node content addressing
//! - **Incremental hashing**: Field-by-field digests for canonical node encodings
//!
//! ## Example
//!
//! ```rust
//! use arbor_crypto::hashing::{hash, IncrementalHasher};
//!
//! let mut hasher = IncrementalHasher::new();
//! hasher.update(b"Hello, ");
//! hasher.update(b"World!");
//! assert_eq!(hasher.finalize(), hash(b"Hello, World!"));
//! ```

pub mod error;
pub mod hashing;

pub use error::{CryptoError, Result};
pub use hashing::{Blake3Hash, HashOutput, HASH_BYTE_SIZE};
