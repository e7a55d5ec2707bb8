//! Resource identification and entry naming
//!
//! A cached response is keyed by its resource identifier: the dataset's
//! on-disk path and the function constraint, glued with `#`. The
//! identifier hashes to a base filename; hash collisions are resolved by
//! a numeric suffix, and every probe verifies the identifier stored in
//! the entry's header line before trusting a hit.
//!
//! The hash is the first 8 bytes of the identifier's SHA-256 digest,
//! read big-endian and rendered in decimal. Truncated SHA-256 is stable
//! across hosts, endianness, and compiler versions, so a cache directory
//! can be shared by heterogeneous machines.

use sha2::{Digest, Sha256};

use crate::dataset::Dataset;

/// Identifiers longer than this are not cached; the caller bypasses.
pub const MAX_CACHEABLE_ID_LEN: usize = 4096;

/// More probed suffixes than this indicates a catastrophic hash failure.
pub const MAX_COLLISIONS: u64 = 50;

/// Build the resource identifier for `(dataset, constraint)`.
///
/// Whitespace and quoting in the constraint are preserved verbatim;
/// equality on identifiers is exact.
pub fn resource_id(dataset: &Dataset, constraint: &str) -> String {
    format!("{}#{}", dataset.filename(), constraint)
}

/// Whether an identifier is short enough to cache.
pub fn is_cacheable(resource_id: &str) -> bool {
    resource_id.len() <= MAX_CACHEABLE_ID_LEN
}

/// Stable 64-bit hash of a resource identifier.
pub fn hash_resource_id(resource_id: &str) -> u64 {
    let digest = Sha256::digest(resource_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Base entry filename for an identifier: `<prefix><decimal hash>`.
pub fn base_name(prefix: &str, resource_id: &str) -> String {
    format!("{prefix}{}", hash_resource_id(resource_id))
}

/// Probe candidate `<base>_<suffix>` for collision resolution.
pub fn candidate_name(base: &str, suffix: u64) -> String {
    format!("{base}_{suffix}")
}
