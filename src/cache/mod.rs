//! File-locking cache substrate
//!
//! A flat directory of entry files shared by any number of processes,
//! bounded by a configured size in megabytes. Coordination is entirely
//! per-file advisory locking plus one exclusively-locked accounting record
//! (`<prefix>.cache_info`) that carries the cumulative entry size.
//!
//! - Entries are created with [`FileLockingCache::create_and_lock`]
//!   (atomic create-new + exclusive lock), written once, then downgraded
//!   to shared for readers.
//! - Readers take shared locks with [`FileLockingCache::get_read_lock`];
//!   a missing file is a miss, not an error.
//! - When the accounting total crosses the high-water mark, the cache is
//!   purged oldest-access-first down to the low-water target, skipping any
//!   entry some process still holds a lock on.

mod info;
mod lock;
mod purge;

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, warn};

pub use info::CacheInfo;
pub use lock::{EntryLock, LockError, LockMode, LockResult};
pub use purge::{PurgeResult, PURGE_RETAIN_FRACTION};

/// Cache result type
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors from cache substrate operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    #[error("no lock held on cache entry: {0}")]
    NotLocked(String),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A process-safe, size-bounded, directory-backed cache of entry files.
///
/// The handle may be shared between threads. Locks taken through a handle
/// are tracked per entry name; each `get_read_lock`/`create_and_lock` is
/// balanced by one `unlock_and_close`, and a surplus `unlock_and_close`
/// is a no-op.
#[derive(Debug)]
pub struct FileLockingCache {
    dir: PathBuf,
    prefix: String,
    max_bytes: u64,
    locks: Mutex<HashMap<String, Vec<EntryLock>>>,
}

impl FileLockingCache {
    /// Open a cache over an existing directory.
    ///
    /// Fails when `dir` is not a directory. Creates the accounting record
    /// when it is missing (an empty record reads as size 0). A `size_mb`
    /// of 0 yields a handle whose size bound is disabled; callers treat
    /// such a cache as unavailable.
    pub fn open(dir: impl Into<PathBuf>, prefix: &str, size_mb: u64) -> CacheResult<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(CacheError::MissingDirectory(dir));
        }

        let cache = Self {
            dir,
            prefix: prefix.to_string(),
            max_bytes: size_mb.saturating_mul(1 << 20),
            locks: Mutex::new(HashMap::new()),
        };

        let info_path = cache.entry_path(&cache.info_name());
        if !info_path.exists() {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&info_path)?;
        }

        Ok(cache)
    }

    /// Whether the size bound is configured (a 0-megabyte cache is off).
    pub fn enabled(&self) -> bool {
        self.max_bytes > 0
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The entry name prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// High-water mark in bytes.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Name of the accounting record file.
    pub fn info_name(&self) -> String {
        format!("{}.cache_info", self.prefix)
    }

    /// Full path of the entry file called `name`.
    pub fn entry_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Take a shared lock on the entry `name`.
    ///
    /// Returns `Ok(None)` when the file does not exist. Otherwise blocks
    /// until the shared lock is granted (a writer may be mid-publish) and
    /// returns a readable descriptor positioned at the start of the file.
    /// The lock is held until [`FileLockingCache::unlock_and_close`].
    pub fn get_read_lock(&self, name: &str) -> CacheResult<Option<File>> {
        let path = self.entry_path(name);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let lock = EntryLock::shared(file)?;
        let reader = lock.try_clone_file()?;
        self.track(name, lock);

        debug!(entry = name, "acquired shared lock");
        Ok(Some(reader))
    }

    /// Atomically create the entry `name` and take its exclusive lock.
    ///
    /// Returns `Ok(None)` when the file already exists; the caller then
    /// retries the read path. On success the file is empty, the exclusive
    /// lock is held, and the returned descriptor is open for writing.
    pub fn create_and_lock(&self, name: &str) -> CacheResult<Option<File>> {
        let path = self.entry_path(name);
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // The file is brand new, so nothing else can hold a lock on it
        // yet; this does not block.
        let lock = EntryLock::exclusive(file)?;
        let writer = lock.try_clone_file()?;
        self.track(name, lock);

        debug!(entry = name, "created entry under exclusive lock");
        Ok(Some(writer))
    }

    /// Downgrade the exclusive lock held on `name` to a shared lock.
    ///
    /// The conversion happens in place; no other writer can slip in
    /// between the exclusive and shared states.
    pub fn exclusive_to_shared_lock(&self, name: &str) -> CacheResult<()> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        let held = locks
            .get_mut(name)
            .and_then(|v| v.last_mut())
            .ok_or_else(|| CacheError::NotLocked(name.to_string()))?;
        held.downgrade()?;
        Ok(())
    }

    /// Release the most recent lock this handle holds on `name`.
    ///
    /// A `name` with no tracked lock is a no-op, so the call is idempotent
    /// per (process, name) pair and safe on every error path.
    pub fn unlock_and_close(&self, name: &str) -> CacheResult<()> {
        let released = {
            let mut locks = self.locks.lock().expect("lock table poisoned");
            match locks.get_mut(name) {
                Some(held) => {
                    let lock = held.pop();
                    if held.is_empty() {
                        locks.remove(name);
                    }
                    lock
                }
                None => None,
            }
        };

        if let Some(lock) = released {
            lock.unlock()?;
            debug!(entry = name, "released lock");
        }
        Ok(())
    }

    /// Add the size of entry `name` to the accounting record.
    ///
    /// Runs under the exclusive lock of the record. A record that fails to
    /// parse is rebuilt by rescanning the directory (the rescan already
    /// includes the new entry). Returns the new total.
    pub fn update_cache_info(&self, name: &str) -> CacheResult<u64> {
        let mut lock = self.lock_info_exclusive()?;

        let total = match CacheInfo::load(lock.file_mut())? {
            Some(info) => info.size_bytes + fs::metadata(self.entry_path(name))?.len(),
            None => {
                warn!("cache accounting record is corrupt; rebuilding from directory scan");
                purge::scan_total(&self.dir, &self.prefix, &self.info_name())?
            }
        };

        CacheInfo { size_bytes: total }.store(lock.file_mut())?;
        lock.unlock()?;
        Ok(total)
    }

    /// Whether `total_bytes` exceeds the configured high-water mark.
    pub fn cache_too_big(&self, total_bytes: u64) -> bool {
        self.max_bytes > 0 && total_bytes > self.max_bytes
    }

    /// Purge least-recently-used entries down to the low-water target.
    ///
    /// Runs under the exclusive lock of the accounting record. `exempt`
    /// names the entry the caller just wrote, which is never a victim.
    /// Entries locked by any process are skipped. The accounting record is
    /// rewritten with the post-purge total.
    pub fn update_and_purge(&self, exempt: &str) -> CacheResult<PurgeResult> {
        let mut lock = self.lock_info_exclusive()?;

        let target = (self.max_bytes as f64 * PURGE_RETAIN_FRACTION) as u64;
        let exempt_path = self.entry_path(exempt);
        let (result, total) = purge::purge_lru(
            &self.dir,
            &self.prefix,
            &self.info_name(),
            Some(&exempt_path),
            target,
        )?;

        CacheInfo { size_bytes: total }.store(lock.file_mut())?;
        lock.unlock()?;

        debug!(
            deleted = result.deleted,
            skipped = result.skipped,
            bytes_reclaimed = result.bytes_reclaimed,
            total_after = total,
            "cache purge complete"
        );
        Ok(result)
    }

    /// Best-effort unlink of the entry `name`, for cleanup after a failed
    /// write. Errors are logged and swallowed.
    pub fn purge_file(&self, name: &str) {
        let path = self.entry_path(name);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove cache file");
            }
        }
    }

    fn lock_info_exclusive(&self) -> CacheResult<EntryLock> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.entry_path(&self.info_name()))?;
        Ok(EntryLock::exclusive(file)?)
    }

    fn track(&self, name: &str, lock: EntryLock) {
        self.locks
            .lock()
            .expect("lock table poisoned")
            .entry(name.to_string())
            .or_default()
            .push(lock);
    }
}
