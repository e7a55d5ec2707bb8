//! Cache size accounting record
//!
//! A single sidecar file per cache directory records the cumulative byte
//! size of all entries, so the high-water check does not have to walk the
//! directory on every write. The record is only ever read or rewritten
//! under an exclusive lock on the record file itself.
//!
//! A record that fails to parse is treated as absent; the caller recovers
//! by rescanning the directory and rewriting it.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};

/// The accounting record: cumulative size of all cache entries in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    /// Sum of entry file sizes, maintained incrementally
    pub size_bytes: u64,
}

impl CacheInfo {
    /// Read the record from an open (and locked) file.
    ///
    /// Returns `None` when the contents do not parse; an empty file reads
    /// as a fresh record of size 0.
    pub fn load(file: &mut File) -> io::Result<Option<Self>> {
        let mut contents = String::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_string(&mut contents)?;

        if contents.trim().is_empty() {
            return Ok(Some(Self::default()));
        }

        Ok(serde_json::from_str(&contents).ok())
    }

    /// Rewrite the record in place.
    pub fn store(&self, file: &mut File) -> io::Result<()> {
        let json = serde_json::to_string(self).expect("in-memory serialize");
        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(json.as_bytes())?;
        file.flush()
    }
}
