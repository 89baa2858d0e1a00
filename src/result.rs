use std::{
    error::Error as StdError,
    fmt::{self, Display},
    io,
};

use crate::{BlockNo, MetaType};

/// The top-level result type for dealing with the buffer cache.
pub type Result<T> = std::result::Result<T, Error>;

/// An Error type encapsulating the failure modes of the
/// buffer cache and write-back engine.
#[derive(Debug)]
pub enum Error {
    /// A write was attempted on a read-only filesystem.
    ReadOnly,
    /// The filesystem has been shut down after a fault, and every
    /// operation now fails fast without touching storage.
    Shutdown,
    /// A read or write error has happened when interacting with the
    /// underlying device, or a buffer came back from I/O in a stale
    /// state.
    Io(io::Error),
    /// The on-disk metadata header of a block did not carry the type
    /// tag this call site expected.
    TypeMismatch {
        /// The block whose header was checked.
        block: BlockNo,
        /// The tag the call site expected.
        expected: MetaType,
        /// The raw tag found on disk.
        found: u32,
    },
    /// A programming invariant has been violated. This is always fatal
    /// and has already escalated to a filesystem-wide shutdown by the
    /// time the caller sees it.
    Invariant(String),
}

impl Clone for Error {
    fn clone(&self) -> Self {
        use self::Error::*;

        match self {
            ReadOnly => ReadOnly,
            Shutdown => Shutdown,
            Io(ioe) => Io(io::Error::new(ioe.kind(), format!("{:?}", ioe))),
            TypeMismatch { block, expected, found } => TypeMismatch {
                block: *block,
                expected: *expected,
                found: *found,
            },
            Invariant(why) => Invariant(why.clone()),
        }
    }
}

impl Eq for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        use self::Error::*;

        match *self {
            ReadOnly => matches!(*other, ReadOnly),
            Shutdown => matches!(*other, Shutdown),
            TypeMismatch { block: l, expected: le, found: lf } => {
                if let TypeMismatch { block: r, expected: re, found: rf } =
                    *other
                {
                    l == r && le == re && lf == rf
                } else {
                    false
                }
            }
            Invariant(ref l) => {
                if let Invariant(ref r) = *other { l == r } else { false }
            }
            Io(_) => false,
        }
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        Error::Io(io_error)
    }
}

impl StdError for Error {}

impl Display for Error {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> std::result::Result<(), fmt::Error> {
        use self::Error::*;

        match *self {
            ReadOnly => {
                write!(f, "write attempted on a read-only filesystem")
            }
            Shutdown => {
                write!(f, "filesystem has been shut down after a fault")
            }
            Io(ref e) => write!(f, "IO error: {}", e),
            TypeMismatch { block, expected, found } => write!(
                f,
                "block {} carries metadata type {} where {:?} was expected",
                block, found, expected
            ),
            Invariant(ref why) => {
                write!(f, "fatal invariant violation: {}", why)
            }
        }
    }
}

/// Build the `Error::Io` used for buffers that came back from I/O
/// stale or inconsistent.
pub(crate) fn io_fault(block: BlockNo, why: &str) -> Error {
    Error::Io(io::Error::other(format!("block {}: {}", block, why)))
}
