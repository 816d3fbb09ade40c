//! # Arbor Store
//!
//! Backing key-value store contract for the Arbor authenticated tree.
//!
//! The tree persists nodes, root pointers and orphan markers through the
//! [`KvStore`] trait and never assumes anything about the backend beyond
//! get/set/delete and ordered prefix iteration.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Versioned Tree / NodeDb         │
//! ├─────────────────────────────────────────┤
//! │              KvStore Trait              │
//! ├─────────────────────┬───────────────────┤
//! │    MemoryKvStore    │  external backend │
//! └─────────────────────┴───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use arbor_store::{KvStore, MemoryKvStore};
//!
//! let store = MemoryKvStore::new();
//! store.set(b"r\x00", b"root").await?;
//! let value = store.get(b"r\x00").await?;
//! ```

pub mod error;
pub mod memory;

pub use error::{Result, StoreError};
pub use memory::MemoryKvStore;

use async_trait::async_trait;
use bytes::Bytes;

/// Trait for key-value storage backends
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Retrieve a value, `None` if the key is absent
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Store a value, replacing any previous one
    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key; deleting an absent key is not an error
    async fn delete(&self, key: &[u8]) -> Result<()>;

    /// Check if a key exists
    async fn has(&self, key: &[u8]) -> Result<bool>;

    /// All entries whose key starts with `prefix`, in ascending key order
    async fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>>;
}
