//! Cache configuration
//!
//! The cache reads three keys from the host's key/value configuration,
//! each with a built-in default:
//! - `DAP.FunctionResponseCache.path`: cache directory (`/tmp/`)
//! - `DAP.FunctionResponseCache.prefix`: entry name prefix (`rc`),
//!   lowercased
//! - `DAP.FunctionResponseCache.size`: high-water mark in megabytes
//!   (20); 0 turns the cache off

mod defaults;
mod keys;

use std::path::PathBuf;

pub use defaults::BuiltinDefaults;
pub use keys::{ConfigError, ConfigResult, KeyStore};

/// Key for the cache directory.
pub const PATH_KEY: &str = "DAP.FunctionResponseCache.path";

/// Key for the entry name prefix.
pub const PREFIX_KEY: &str = "DAP.FunctionResponseCache.prefix";

/// Key for the cache size in megabytes.
pub const SIZE_KEY: &str = "DAP.FunctionResponseCache.size";

/// Resolved cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Directory holding entries and the accounting record
    pub path: PathBuf,
    /// Byte string prepended to every entry name
    pub prefix: String,
    /// High-water mark in megabytes; 0 disables the cache
    pub size_mb: u64,
}

impl CacheSettings {
    /// Resolve settings from the host configuration, falling back to the
    /// built-in defaults key by key. The prefix is lowercased.
    pub fn from_keys(keys: &KeyStore) -> Self {
        let defaults = BuiltinDefaults::default();
        let path = keys.get_str(PATH_KEY).unwrap_or(defaults.cache_dir);
        let prefix = keys
            .get_str(PREFIX_KEY)
            .map(|p| p.to_lowercase())
            .unwrap_or(defaults.cache_prefix);
        let size_mb = keys.get_u64(SIZE_KEY).unwrap_or(defaults.cache_size_mb);

        Self {
            path: PathBuf::from(path),
            prefix,
            size_mb,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from_keys(&KeyStore::default())
    }
}
