//! DAP Function Response Cache
//!
//! A filesystem-backed, size-bounded, multi-process cache of serialized
//! dataset responses, keyed by (dataset path, function constraint). The
//! back-end server evaluates server-side constraint-expression functions
//! over scientific datasets; this crate caches those results so repeated
//! requests skip the evaluation.
//!
//! The cache is a flat directory of entry files coordinated purely by
//! advisory file locks, safe to share between any number of server
//! processes and threads. Each entry stores the resource identifier on
//! its first line, an XML structural descriptor, a `--DATA:` delimiter,
//! and a canonical binary payload. When the directory outgrows its
//! configured size, least-recently-used entries are purged.

pub mod cache;
pub mod codec;
pub mod config;
pub mod dataset;
pub mod key;
pub mod response_cache;

pub use cache::{
    CacheError, CacheInfo, CacheResult, EntryLock, FileLockingCache, LockError, LockMode,
    LockResult, PurgeResult, PURGE_RETAIN_FRACTION,
};
pub use codec::{
    parse_descriptor, read_descriptor, write_descriptor, CodecError, CodecResult, Marshaller,
    Unmarshaller, DATA_MARK,
};
pub use config::{
    BuiltinDefaults, CacheSettings, ConfigError, ConfigResult, KeyStore, PATH_KEY, PREFIX_KEY,
    SIZE_KEY,
};
pub use dataset::{
    ConstraintEvaluator, DataType, Dataset, EvaluatorError, ScalarValue, Sequence, Variable,
    VariableValue,
};
pub use key::{
    base_name, candidate_name, hash_resource_id, is_cacheable, resource_id, MAX_CACHEABLE_ID_LEN,
    MAX_COLLISIONS,
};
pub use response_cache::{FunctionResponseCache, ResponseCacheError, ResponseCacheResult};
