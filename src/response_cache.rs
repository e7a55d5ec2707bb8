//! Function response cache orchestrator
//!
//! The externally-visible face of the cache. `get_or_cache` turns a
//! (dataset, function constraint) pair into a result dataset, either by
//! decoding a previously cached entry or by evaluating the function and
//! writing the result through the codec for the next caller.
//!
//! Probe/write flow: the resource id hashes to a base filename; suffixed
//! candidates are probed under shared locks with header verification.
//! A miss leaves the first free candidate as the slot to create. The
//! writer creates that slot atomically under an exclusive lock, writes
//! header + descriptor + delimiter + payload, downgrades the lock to
//! shared, updates the accounting record, and purges if the cache grew
//! past its high-water mark. Losing the creation race falls back to a
//! second probe, which blocks on the winner's lock and reads its entry.
//!
//! Every exit path, including evaluator failures, disk-full, and corrupt
//! entries, releases the locks it holds, and a partially-written entry
//! is unlinked before the error propagates.

use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheError, FileLockingCache};
use crate::codec::{self, CodecError, Marshaller, Unmarshaller, DATA_MARK};
use crate::config::{CacheSettings, KeyStore};
use crate::dataset::{ConstraintEvaluator, Dataset, EvaluatorError};
use crate::key::{self, MAX_COLLISIONS};

/// Response cache result type
pub type ResponseCacheResult<T> = Result<T, ResponseCacheError>;

/// Errors surfaced by the orchestrator
#[derive(Debug, Error)]
pub enum ResponseCacheError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("{probed} hash collisions probed for resource '{resource_id}'")]
    TooManyCollisions { resource_id: String, probed: u64 },

    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// What a single candidate probe found.
enum Probe {
    /// Candidate file does not exist; its name is the slot to create
    Miss,
    /// Candidate belongs to a different resource; try the next suffix
    HeaderMismatch,
    /// Candidate matched and decoded
    Hit(Dataset),
    /// Candidate matched but was stale or corrupt; it has been unlinked
    /// and its name is the slot to create
    Discarded,
}

/// The function response cache.
///
/// Construction never fails: a missing cache directory or a size of 0
/// yields an unavailable cache, and `get_or_cache` then evaluates
/// directly. The handle is shared by reference between request threads.
#[derive(Debug)]
pub struct FunctionResponseCache {
    cache: Option<FileLockingCache>,
}

impl FunctionResponseCache {
    /// Build a cache from resolved settings.
    pub fn new(settings: CacheSettings) -> Self {
        if settings.size_mb == 0 {
            debug!("function response cache disabled: size is 0");
            return Self { cache: None };
        }

        let cache = match FileLockingCache::open(&settings.path, &settings.prefix, settings.size_mb)
        {
            Ok(cache) => Some(cache),
            Err(CacheError::MissingDirectory(path)) => {
                debug!(path = %path.display(), "function response cache disabled: directory missing");
                None
            }
            Err(e) => {
                warn!(error = %e, "function response cache disabled: cannot open");
                None
            }
        };

        Self { cache }
    }

    /// Build a cache from the host's key/value configuration.
    pub fn from_keys(keys: &KeyStore) -> Self {
        Self::new(CacheSettings::from_keys(keys))
    }

    /// Whether the cache is configured and usable.
    pub fn is_available(&self) -> bool {
        self.cache.is_some()
    }

    /// Return the function result for `(dataset, constraint)`, from the
    /// cache when possible.
    ///
    /// The returned dataset carries the original dataset's filename and
    /// fully materialized, send-marked variables, whether it was decoded
    /// from an entry or freshly evaluated.
    pub fn get_or_cache(
        &self,
        dataset: &Dataset,
        constraint: &str,
        evaluator: &mut dyn ConstraintEvaluator,
    ) -> ResponseCacheResult<Dataset> {
        let Some(cache) = &self.cache else {
            return evaluate(dataset, constraint, evaluator);
        };

        let resource_id = key::resource_id(dataset, constraint);
        if !key::is_cacheable(&resource_id) {
            debug!(
                len = resource_id.len(),
                "resource id too long to cache; evaluating directly"
            );
            return evaluate(dataset, constraint, evaluator);
        }

        let base = key::base_name(cache.prefix(), &resource_id);

        match self.try_cached(cache, dataset, constraint, evaluator, &resource_id, &base) {
            Ok(Some(result)) => Ok(result),
            Ok(None) => {
                debug!("probe and write both missed; evaluating directly");
                evaluate(dataset, constraint, evaluator)
            }
            // The cache directory disappeared underneath us. The cache
            // becomes a bypass, not a failure.
            Err(e) if directory_vanished(&e) => {
                debug!(error = %e, "cache directory vanished; evaluating directly");
                evaluate(dataset, constraint, evaluator)
            }
            Err(e) => Err(e),
        }
    }

    /// One full probe → write → re-probe pass against the substrate.
    fn try_cached(
        &self,
        cache: &FileLockingCache,
        dataset: &Dataset,
        constraint: &str,
        evaluator: &mut dyn ConstraintEvaluator,
        resource_id: &str,
        base: &str,
    ) -> ResponseCacheResult<Option<Dataset>> {
        let mut slot = String::new();
        if let Some(hit) = self.load_from_cache(cache, dataset, resource_id, base, &mut slot)? {
            debug!(entry = %slot, "cache hit");
            return Ok(Some(hit));
        }

        if let Some(built) =
            self.write_dataset_to_cache(cache, dataset, constraint, evaluator, resource_id, &slot)?
        {
            debug!(entry = %slot, "cached new function result");
            return Ok(Some(built));
        }

        // Lost the creation race. The winner holds the exclusive lock
        // until its entry is complete, so a blocking re-probe reads the
        // published entry.
        if let Some(hit) = self.load_from_cache(cache, dataset, resource_id, base, &mut slot)? {
            debug!(entry = %slot, "cache hit after losing creation race");
            return Ok(Some(hit));
        }

        Ok(None)
    }

    /// Probe suffixed candidates for `resource_id`.
    ///
    /// Returns the decoded dataset on a hit. On a miss, `slot` names the
    /// candidate the caller should create.
    fn load_from_cache(
        &self,
        cache: &FileLockingCache,
        dataset: &Dataset,
        resource_id: &str,
        base: &str,
        slot: &mut String,
    ) -> ResponseCacheResult<Option<Dataset>> {
        for suffix in 0.. {
            if suffix > MAX_COLLISIONS {
                return Err(ResponseCacheError::TooManyCollisions {
                    resource_id: resource_id.to_string(),
                    probed: suffix,
                });
            }

            let name = key::candidate_name(base, suffix);
            match self.probe_entry(cache, dataset, &name, resource_id)? {
                Probe::Hit(mut hit) => {
                    hit.set_filename(dataset.filename());
                    return Ok(Some(hit));
                }
                Probe::Miss | Probe::Discarded => {
                    *slot = name;
                    return Ok(None);
                }
                Probe::HeaderMismatch => continue,
            }
        }
        unreachable!("suffix probe loop always returns");
    }

    /// Probe one candidate under a shared lock.
    ///
    /// The lock is released before this returns, on success and failure
    /// alike. Stale and corrupt entries are unlinked while still locked.
    fn probe_entry(
        &self,
        cache: &FileLockingCache,
        dataset: &Dataset,
        name: &str,
        resource_id: &str,
    ) -> ResponseCacheResult<Probe> {
        let Some(file) = cache.get_read_lock(name)? else {
            return Ok(Probe::Miss);
        };

        let outcome = read_locked_entry(cache, dataset, file, name, resource_id);

        if matches!(outcome, Ok(Probe::Discarded)) {
            cache.purge_file(name);
        }
        let released = cache.unlock_and_close(name);

        let outcome = outcome?;
        released?;
        Ok(outcome)
    }

    /// Evaluate the function and publish the result as a new entry.
    ///
    /// Returns `None` when another process created `slot` first. On any
    /// failure between creation and downgrade the partial entry is
    /// unlinked, the lock released, and the error re-raised.
    fn write_dataset_to_cache(
        &self,
        cache: &FileLockingCache,
        dataset: &Dataset,
        constraint: &str,
        evaluator: &mut dyn ConstraintEvaluator,
        resource_id: &str,
        slot: &str,
    ) -> ResponseCacheResult<Option<Dataset>> {
        let Some(file) = cache.create_and_lock(slot)? else {
            return Ok(None);
        };

        let published = (|| -> ResponseCacheResult<Dataset> {
            let fdds = build_entry(file, dataset, constraint, evaluator, resource_id)?;

            // Publish: readers may now share the entry, the purger may
            // not touch it while we finish accounting.
            cache.exclusive_to_shared_lock(slot)?;

            let total = cache.update_cache_info(slot)?;
            if cache.cache_too_big(total) {
                cache.update_and_purge(slot)?;
            }
            Ok(fdds)
        })();

        match published {
            Ok(fdds) => {
                cache.unlock_and_close(slot)?;
                Ok(Some(fdds))
            }
            Err(e) => {
                cache.purge_file(slot);
                let _ = cache.unlock_and_close(slot);
                Err(e)
            }
        }
    }
}

/// Read a locked candidate: verify its header, check validity, decode.
///
/// Does not release the lock; the caller owns cleanup.
fn read_locked_entry(
    cache: &FileLockingCache,
    dataset: &Dataset,
    file: fs::File,
    name: &str,
    resource_id: &str,
) -> ResponseCacheResult<Probe> {
    let mut reader = BufReader::new(file);

    let mut header = String::new();
    if reader.read_line(&mut header)? == 0 {
        // Empty file: an aborted writer died before the header made it
        // out. Not ours to claim by header, so skip it.
        return Ok(Probe::HeaderMismatch);
    }

    if header.trim_end_matches(['\r', '\n']) != resource_id {
        return Ok(Probe::HeaderMismatch);
    }

    if !entry_is_valid(cache, name, dataset) {
        debug!(entry = name, "cache entry is stale; discarding");
        return Ok(Probe::Discarded);
    }

    match read_cached_data(&mut reader) {
        Ok(hit) => Ok(Probe::Hit(hit)),
        Err(e) => {
            warn!(entry = name, error = %e, "cache entry is corrupt; discarding");
            Ok(Probe::Discarded)
        }
    }
}

/// Decode descriptor and payload into a fresh dataset.
///
/// All top-level variables come back marked read and to-send, and
/// sequence row cursors are rewound so a later serialize pass starts at
/// row 0.
fn read_cached_data<R: BufRead>(input: &mut R) -> Result<Dataset, CodecError> {
    let mut fdds = codec::read_descriptor(input)?;

    let mut unmarshaller = Unmarshaller::new(input);
    for var in fdds.variables_mut() {
        unmarshaller.get_variable(var)?;
    }

    for var in fdds.variables_mut() {
        var.set_read_p(true);
        var.set_send_p(true);
        if var.is_sequence() {
            var.reset_row_number(true);
        }
    }

    Ok(fdds)
}

/// Is the entry named `name` still a valid answer for `dataset`?
///
/// A zero-byte entry is never valid (even an empty result has a
/// descriptor). An entry older than the dataset's last modification is
/// stale. When the dataset path cannot be stat'ed the entry is trusted;
/// not every dataset filename is a plain file.
fn entry_is_valid(cache: &FileLockingCache, name: &str, dataset: &Dataset) -> bool {
    let Ok(meta) = fs::metadata(cache.entry_path(name)) else {
        return false;
    };
    if meta.len() == 0 {
        return false;
    }

    let entry_time = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let dataset_time = fs::metadata(dataset.filename())
        .and_then(|m| m.modified())
        .unwrap_or(entry_time);

    dataset_time <= entry_time
}

/// Evaluate the function and stream the result into the locked, empty
/// entry file: header line, descriptor, delimiter, payload.
fn build_entry(
    file: fs::File,
    dataset: &Dataset,
    constraint: &str,
    evaluator: &mut dyn ConstraintEvaluator,
    resource_id: &str,
) -> ResponseCacheResult<Dataset> {
    let mut out = BufWriter::new(file);

    writeln!(out, "{resource_id}")?;

    evaluator.parse_constraint(constraint, dataset)?;
    let mut fdds = evaluator.eval_function_clauses(dataset)?;
    fdds.set_filename(dataset.filename());

    codec::write_descriptor(&mut out, &fdds, true)?;
    writeln!(out)?;
    writeln!(out, "{DATA_MARK}")?;

    let mut marshaller = Marshaller::new(&mut out);
    for var in fdds.variables() {
        if var.send_p() {
            marshaller.put_variable(var)?;
        }
    }

    out.flush()?;
    Ok(fdds)
}

/// Whether an error means the cache directory itself is gone.
fn directory_vanished(e: &ResponseCacheError) -> bool {
    match e {
        ResponseCacheError::Cache(CacheError::Io(io)) | ResponseCacheError::Io(io) => {
            io.kind() == io::ErrorKind::NotFound
        }
        _ => false,
    }
}

/// Direct evaluation, used whenever the cache cannot serve.
fn evaluate(
    dataset: &Dataset,
    constraint: &str,
    evaluator: &mut dyn ConstraintEvaluator,
) -> ResponseCacheResult<Dataset> {
    evaluator.parse_constraint(constraint, dataset)?;
    let mut fdds = evaluator.eval_function_clauses(dataset)?;
    fdds.set_filename(dataset.filename());
    Ok(fdds)
}
