//! Tree configuration

use serde::{Deserialize, Serialize};

/// Default number of decoded nodes kept by the node cache
pub const DEFAULT_CACHE_SIZE: usize = 10_000;

/// Configuration for a versioned tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Number assigned to the first saved version
    pub initial_version: u64,
    /// Capacity of the decoded node cache in `NodeDb`
    ///
    /// Loaded versions hold their whole tree in memory regardless; the cache
    /// only keeps shared nodes around for the next version to be loaded.
    pub cache_size: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            initial_version: 1,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl TreeConfig {
    /// Set the first version number
    pub fn with_initial_version(mut self, version: u64) -> Self {
        self.initial_version = version.max(1);
        self
    }

    /// Set the node cache capacity
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }
}
