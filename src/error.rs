//! Error types for building and querying the index.

use std::error;
use std::path::PathBuf;

use thiserror::Error;

/// Variants of [`Error`].
///
/// Each variant corresponds to one class of failure: structural problems in
/// the ELF container, structural problems in the DWARF data, use of a
/// feature outside the supported subset, truncation, LEB128 overflow,
/// exhaustion of the index, I/O, and lookup misses.
#[non_exhaustive]
#[derive(Clone, Debug, Error)]
pub enum ErrorKind {
    /// The ELF container is structurally invalid.
    #[error("malformed ELF object: {0}")]
    ElfFormat(String),

    /// The DWARF data is structurally invalid, or a required debug section
    /// is missing.
    #[error("malformed DWARF data: {0}")]
    DwarfFormat(String),

    /// The file uses a feature outside of the supported subset.
    #[error("{0} is not supported")]
    Unsupported(String),

    /// A structure was truncated before its end.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// A LEB128-encoded value did not fit into 64 bits.
    #[error("LEB128 value overflowed a 64-bit integer")]
    Overflow,

    /// The DIE hash table has no free slot left.
    #[error("DIE index capacity exceeded")]
    CapacityExceeded,

    /// Opening or mapping an object file failed.
    #[error("failed to read object file {}", .0.display())]
    Io(PathBuf),

    /// [`find`](crate::DwarfIndex::find) did not match any indexed DIE.
    #[error("no indexed DIE named {0:?}")]
    NotFound(String),
}

/// An error encountered while building or querying a
/// [`DwarfIndex`](crate::DwarfIndex).
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
    #[source]
    source: Option<Box<dyn error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Creates an error from a known kind of error as well as an arbitrary
    /// error payload.
    pub(crate) fn new<E>(kind: ErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<scroll::Error> for Error {
    fn from(e: scroll::Error) -> Self {
        Self::new(ErrorKind::UnexpectedEof, e)
    }
}
