//! Cache entry serialization codec
//!
//! A cache entry is framed as: resource-identifier header line, XML
//! descriptor, the `--DATA:` delimiter line, then the binary payload. The
//! codec owns the descriptor and payload halves; the orchestrator writes
//! the header line itself.
//!
//! The payload is a canonical marshalled form, symmetric between writer
//! and reader: big-endian fixed-size primitives, length-prefixed strings,
//! flat row-major arrays framed only by the descriptor's shape,
//! structures as the concatenation of their members, and sequences as
//! marker-prefixed rows with a terminal end-of-rows marker. The reader
//! pulls bytes in the declaration order the descriptor establishes, so
//! the two phases are strictly sequential: parse the descriptor, then
//! decode the payload.
//!
//! Any framing violation (short read, bad row marker, descriptor parse
//! failure) means the entry is corrupt and the whole load aborts.

mod descriptor;
mod marshaller;
mod unmarshaller;

use std::io;

use thiserror::Error;

pub use descriptor::{parse_descriptor, read_descriptor, write_descriptor};
pub use marshaller::Marshaller;
pub use unmarshaller::Unmarshaller;

/// Delimiter line between the XML descriptor and the binary payload.
pub const DATA_MARK: &str = "--DATA:";

/// Marker byte preceding each serialized sequence row.
pub(crate) const ROW_MARK: u8 = 0x5A;

/// Marker byte closing a serialized sequence.
pub(crate) const END_OF_ROWS: u8 = 0xA5;

/// Guard against absurd length prefixes in a damaged payload.
pub(crate) const MAX_STRING_BYTES: u32 = 1 << 30;

/// Codec result type
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors from encoding or decoding a cache entry
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cache entry is corrupt: {0}")]
    Corrupt(String),

    #[error("descriptor error: {0}")]
    Descriptor(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A short read while decoding means the entry was truncated, which is a
/// corruption of the entry rather than an environment failure.
pub(crate) fn read_err(e: io::Error) -> CodecError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CodecError::Corrupt("short read in payload".to_string())
    } else {
        CodecError::Io(e)
    }
}
