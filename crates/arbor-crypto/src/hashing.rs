//! Hashing utilities using BLAKE3
//!
//! Every tree node, root commitment and proof in Arbor is a BLAKE3 digest.
//! Node encodings are fed to [`IncrementalHasher`] field by field so no
//! intermediate buffer is allocated.

use crate::{CryptoError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of a BLAKE3 hash output in bytes (256 bits)
pub const HASH_BYTE_SIZE: usize = 32;

/// Type alias for hash output bytes
pub type HashOutput = [u8; HASH_BYTE_SIZE];

/// A BLAKE3 hash wrapper with convenience methods
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Blake3Hash(HashOutput);

impl Blake3Hash {
    /// Create a new hash from bytes
    pub fn new(bytes: HashOutput) -> Self {
        Self(bytes)
    }

    /// Create a hash from a slice, checking its length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: HashOutput = bytes.try_into().map_err(|_| CryptoError::InvalidLength {
            expected: HASH_BYTE_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Create a hash from a hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }

    /// Get the hash as bytes
    pub fn as_bytes(&self) -> &HashOutput {
        &self.0
    }

    /// Convert to a hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex prefix for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    /// Check if this hash is all zeros
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl Default for Blake3Hash {
    fn default() -> Self {
        Self([0u8; HASH_BYTE_SIZE])
    }
}

impl fmt::Debug for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blake3Hash({})", self.to_hex())
    }
}

impl fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Blake3Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<HashOutput> for Blake3Hash {
    fn from(bytes: HashOutput) -> Self {
        Self(bytes)
    }
}

impl From<Blake3Hash> for HashOutput {
    fn from(hash: Blake3Hash) -> Self {
        hash.0
    }
}

impl From<blake3::Hash> for Blake3Hash {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

/// An incremental hasher for canonical field encodings
///
/// Integers are written big-endian with a fixed width, byte strings with a
/// `u32` big-endian length prefix.
pub struct IncrementalHasher {
    hasher: blake3::Hasher,
    bytes_processed: u64,
}

impl IncrementalHasher {
    /// Create a new incremental hasher
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
            bytes_processed: 0,
        }
    }

    /// Update the hasher with raw data
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes_processed += data.len() as u64;
    }

    /// Write a single byte
    pub fn update_u8(&mut self, value: u8) {
        self.update(&[value]);
    }

    /// Write a big-endian `u64`
    pub fn update_u64(&mut self, value: u64) {
        self.update(&value.to_be_bytes());
    }

    /// Write a length-prefixed byte string
    pub fn update_bytes(&mut self, data: &[u8]) {
        self.update(&(data.len() as u32).to_be_bytes());
        self.update(data);
    }

    /// Finalize and return the hash
    pub fn finalize(self) -> Blake3Hash {
        self.hasher.finalize().into()
    }

    /// Get the number of bytes processed
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash the given data using BLAKE3
pub fn hash(data: &[u8]) -> Blake3Hash {
    blake3::hash(data).into()
}
