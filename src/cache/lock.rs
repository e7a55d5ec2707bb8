//! Advisory file locking for cache entries
//!
//! Every cache entry is a single file; coordination between the processes
//! sharing a cache directory rides on advisory `flock(2)` locks taken on
//! those files. Three states are observable per entry: unlocked, shared
//! (any number of holders), exclusive (one holder). An exclusive lock can
//! be downgraded to shared without an unlocked window in between, which is
//! what lets a writer publish a finished entry to readers while still
//! protecting it from the purger.
//!
//! Locks die with their holder: if a process exits (or crashes) while a
//! lock is held, the OS releases it. [`EntryLock`] releases on drop as a
//! backstop, but callers on error paths release explicitly.

use std::fs::File;
use std::io;

use thiserror::Error;

/// Lock result type
pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock is held by another process")]
    WouldBlock,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Which lock an [`EntryLock`] currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[cfg(unix)]
fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Non-Unix builds get no cross-process exclusion; the locks degrade to
/// in-process no-ops. The cache is only safe to share between processes on
/// platforms with `flock(2)` semantics.
#[cfg(not(unix))]
fn flock(_file: &File, _operation: i32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
use libc::{LOCK_EX, LOCK_NB, LOCK_SH, LOCK_UN};

#[cfg(not(unix))]
const LOCK_SH: i32 = 1;
#[cfg(not(unix))]
const LOCK_EX: i32 = 2;
#[cfg(not(unix))]
const LOCK_NB: i32 = 4;
#[cfg(not(unix))]
const LOCK_UN: i32 = 8;

/// An advisory lock held on one cache entry file.
///
/// Owns the locked descriptor. The lock is released when the struct is
/// dropped; [`EntryLock::unlock`] releases it eagerly.
#[derive(Debug)]
pub struct EntryLock {
    file: File,
    mode: LockMode,
}

impl EntryLock {
    /// Take a shared lock on `file`, blocking until it is granted.
    pub fn shared(file: File) -> LockResult<Self> {
        flock(&file, LOCK_SH)?;
        Ok(Self {
            file,
            mode: LockMode::Shared,
        })
    }

    /// Take an exclusive lock on `file`, blocking until it is granted.
    pub fn exclusive(file: File) -> LockResult<Self> {
        flock(&file, LOCK_EX)?;
        Ok(Self {
            file,
            mode: LockMode::Exclusive,
        })
    }

    /// Try to take an exclusive lock without blocking.
    ///
    /// Fails with [`LockError::WouldBlock`] if any process holds a lock
    /// on the file. The purger uses this to probe whether an entry is in
    /// use.
    pub fn try_exclusive(file: File) -> LockResult<Self> {
        match flock(&file, LOCK_EX | LOCK_NB) {
            Ok(()) => Ok(Self {
                file,
                mode: LockMode::Exclusive,
            }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(LockError::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// Downgrade an exclusive lock to shared.
    ///
    /// `flock` converts the existing lock in place, so there is no window
    /// in which another writer could take the exclusive lock first.
    pub fn downgrade(&mut self) -> LockResult<()> {
        if self.mode == LockMode::Exclusive {
            flock(&self.file, LOCK_SH)?;
            self.mode = LockMode::Shared;
        }
        Ok(())
    }

    /// The mode currently held.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Borrow the locked descriptor.
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Mutably borrow the locked descriptor (for writing through it).
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Clone the descriptor for independent reads.
    ///
    /// The clone shares the open file description, so the lock stays in
    /// force for as long as either handle is held.
    pub fn try_clone_file(&self) -> io::Result<File> {
        self.file.try_clone()
    }

    /// Release the lock and close the descriptor.
    pub fn unlock(self) -> LockResult<()> {
        flock(&self.file, LOCK_UN)?;
        Ok(())
        // file closes on drop
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        let _ = flock(&self.file, LOCK_UN);
    }
}
