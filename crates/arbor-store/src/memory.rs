//! In-memory key-value store for testing and embedding

use crate::{KvStore, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

/// An in-memory key-value store
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<DashMap<Bytes, Bytes>>,
}

impl MemoryKvStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Get the number of entries stored
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Get total size of all values
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|entry| entry.value().len() as u64).sum()
    }

    /// Count the entries under a prefix
    pub fn count_prefix(&self, prefix: &[u8]) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        trace!(key_len = key.len(), value_len = value.len(), "set");
        self.entries
            .insert(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    async fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        let mut result: Vec<(Bytes, Bytes)> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(result)
    }
}
