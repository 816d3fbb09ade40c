//! Canonical node digests
//!
//! Both the tree and the proof verifier hash nodes through these functions,
//! so a verifier holding only sibling hashes recomputes exactly the digest
//! the tree produced.

use arbor_crypto::hashing::{self, Blake3Hash, IncrementalHasher};

/// Digest of a value as committed inside a leaf
pub fn value_hash(value: &[u8]) -> Blake3Hash {
    hashing::hash(value)
}

/// Digest of a leaf: `0 ‖ 1 ‖ version ‖ key ‖ H(value)`
pub fn leaf_hash(key: &[u8], value_hash: &Blake3Hash, version: u64) -> Blake3Hash {
    let mut hasher = IncrementalHasher::new();
    hasher.update_u8(0);
    hasher.update_u64(1);
    hasher.update_u64(version);
    hasher.update_bytes(key);
    hasher.update(value_hash.as_bytes());
    hasher.finalize()
}

/// Digest of an inner node: `height ‖ size ‖ version ‖ left ‖ right`
pub fn inner_hash(
    height: u8,
    size: u64,
    version: u64,
    left: &Blake3Hash,
    right: &Blake3Hash,
) -> Blake3Hash {
    let mut hasher = IncrementalHasher::new();
    hasher.update_u8(height);
    hasher.update_u64(size);
    hasher.update_u64(version);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hasher.finalize()
}

/// Root hash of a tree with no leaves
pub fn empty_root_hash() -> Blake3Hash {
    hashing::hash(&[])
}
