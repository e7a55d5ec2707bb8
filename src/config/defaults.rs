//! Built-in cache defaults
//!
//! Hardcoded fallbacks used when the host configuration does not set a
//! cache key.

use serde::{Deserialize, Serialize};

/// Built-in default values for the function response cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Cache directory (default: `/tmp/`)
    pub cache_dir: String,

    /// Entry name prefix (default: `rc`)
    pub cache_prefix: String,

    /// High-water mark in megabytes (default: 20; 0 disables the cache)
    pub cache_size_mb: u64,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            cache_dir: "/tmp/".to_string(),
            cache_prefix: "rc".to_string(),
            cache_size_mb: 20,
        }
    }
}
