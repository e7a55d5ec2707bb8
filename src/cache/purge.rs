//! Least-recently-used cache purge
//!
//! When the accounting total crosses the configured high-water mark, the
//! cache deletes entries oldest-access-first until the total falls to the
//! low-water target (80% of the high-water mark). Two kinds of entries are
//! never deleted:
//! - the exempt entry (the file the triggering writer just produced; this
//!   process cannot observe its own lock on it), and
//! - any entry whose exclusive lock cannot be taken without blocking,
//!   which means some process is reading or writing it right now.
//!
//! Transient errors while scanning or deleting are logged and the victim
//! skipped; the purge keeps going.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use super::lock::{EntryLock, LockError};

/// Fraction of the high-water mark the purge shrinks the cache down to.
pub const PURGE_RETAIN_FRACTION: f64 = 0.8;

/// One cache entry as seen by the purge scan.
#[derive(Debug, Clone)]
pub(crate) struct EntryInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub last_accessed: SystemTime,
}

/// Outcome counters for one purge run.
#[derive(Debug, Clone, Default)]
pub struct PurgeResult {
    /// Entries considered
    pub scanned: usize,
    /// Entries deleted
    pub deleted: usize,
    /// Entries skipped (exempt, locked, or vanished mid-purge)
    pub skipped: usize,
    /// Bytes reclaimed by deletions
    pub bytes_reclaimed: u64,
    /// Non-fatal errors encountered along the way
    pub errors: Vec<String>,
}

/// Enumerate the cache entries in `dir`.
///
/// An entry is a regular file whose name starts with `prefix`, excluding
/// the accounting record itself. Files that cannot be stat'ed (racing
/// deletion by another process) are silently dropped from the listing.
pub(crate) fn collect_entries(
    dir: &Path,
    prefix: &str,
    info_name: &str,
) -> io::Result<Vec<EntryInfo>> {
    let mut entries = Vec::new();

    for dirent in fs::read_dir(dir)? {
        let dirent = match dirent {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry during cache scan");
                continue;
            }
        };

        let name = dirent.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(prefix) || name == info_name {
            continue;
        }

        let meta = match dirent.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        if !meta.is_file() {
            continue;
        }

        // Prefer atime so recently-read entries survive; mtime is the
        // fallback on filesystems that do not track access times.
        let last_accessed = meta
            .accessed()
            .or_else(|_| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        entries.push(EntryInfo {
            path: dirent.path(),
            size_bytes: meta.len(),
            last_accessed,
        });
    }

    Ok(entries)
}

/// Recompute the cumulative entry size by scanning the directory.
pub(crate) fn scan_total(dir: &Path, prefix: &str, info_name: &str) -> io::Result<u64> {
    Ok(collect_entries(dir, prefix, info_name)?
        .iter()
        .map(|e| e.size_bytes)
        .sum())
}

/// Delete least-recently-accessed entries until the total is at or below
/// `target_bytes`.
///
/// Returns the counters and the remaining total. The caller holds the
/// exclusive lock on the accounting record and rewrites it afterwards.
pub(crate) fn purge_lru(
    dir: &Path,
    prefix: &str,
    info_name: &str,
    exempt: Option<&Path>,
    target_bytes: u64,
) -> io::Result<(PurgeResult, u64)> {
    let mut entries = collect_entries(dir, prefix, info_name)?;
    entries.sort_by_key(|e| e.last_accessed);

    let mut result = PurgeResult {
        scanned: entries.len(),
        ..PurgeResult::default()
    };
    let mut total: u64 = entries.iter().map(|e| e.size_bytes).sum();

    for entry in &entries {
        if total <= target_bytes {
            break;
        }

        if exempt.is_some_and(|p| p == entry.path) {
            result.skipped += 1;
            continue;
        }

        // Probe the entry's lock without blocking. Failure to take the
        // exclusive lock means some process is using the entry.
        let file = match fs::File::open(&entry.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Another process purged it first; its size is already
                // out of our total because we rescanned above.
                result.skipped += 1;
                continue;
            }
            Err(e) => {
                warn!(path = %entry.path.display(), error = %e, "cannot open purge candidate");
                result.errors.push(format!("open {}: {e}", entry.path.display()));
                result.skipped += 1;
                continue;
            }
        };

        let _lock = match EntryLock::try_exclusive(file) {
            Ok(lock) => lock,
            Err(LockError::WouldBlock) => {
                debug!(path = %entry.path.display(), "purge skipping locked entry");
                result.skipped += 1;
                continue;
            }
            Err(e) => {
                result.errors.push(format!("lock {}: {e}", entry.path.display()));
                result.skipped += 1;
                continue;
            }
        };

        if let Err(e) = fs::remove_file(&entry.path) {
            warn!(path = %entry.path.display(), error = %e, "failed to delete purge victim");
            result.errors.push(format!("unlink {}: {e}", entry.path.display()));
            result.skipped += 1;
            continue;
        }

        debug!(path = %entry.path.display(), bytes = entry.size_bytes, "purged cache entry");
        total = total.saturating_sub(entry.size_bytes);
        result.deleted += 1;
        result.bytes_reclaimed += entry.size_bytes;
    }

    Ok((result, total))
}
