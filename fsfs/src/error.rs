//! Structured errors for the revision filesystem.
//!
//! Every fallible operation in this crate returns [`CResult`]. Errors carry
//! a `kind` implicitly via the enum variant, a human-readable message, and
//! (where the error wraps another failure) a boxed cause so the chain can
//! be inspected without downcasting.

use std::fmt;
use std::io;

/// The result type used throughout the crate.
pub type CResult<T> = Result<T, Error>;

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the revision filesystem core, one variant per error
/// kind recognized by callers.
#[derive(Debug)]
pub enum Error {
    /// On-disk format is newer than this implementation understands, or is
    /// on the blacklist of known-bad format numbers.
    UnsupportedFormat { found: u32, message: String },

    /// A requested revision is below zero or beyond youngest.
    NoSuchRevision(u64),

    /// Parsing failure, invariant violation, or integrity-check failure.
    Corrupt { message: String, cause: Option<Cause> },

    /// A commit was rejected because of a concurrent, overlapping change.
    Conflict { path: String, message: String },

    /// Write-lock contention exhausted a caller-provided bound.
    Locked(String),

    /// Add of a path that already exists in the transaction under
    /// construction.
    AlreadyExists(String),

    /// Reference to a path absent in the relevant revision.
    NotFound(String),

    /// A caller-provided cancellation predicate returned true.
    Canceled,

    /// The underlying storage medium failed.
    Io { message: String, cause: io::Error },

    /// Catch-all for invariant violations not covered above (bad
    /// transaction state, malformed configuration, etc).
    Internal(String),
}

impl Error {
    pub fn corrupt(message: impl Into<String>) -> Self {
        Error::Corrupt { message: message.into(), cause: None }
    }

    pub fn corrupt_with_cause(message: impl Into<String>, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Corrupt { message: message.into(), cause: Some(Box::new(cause)) }
    }

    /// Returns true for the three conditions `spec.md` §7 says the core
    /// recovers from silently: a missing `format` file, a missing cache
    /// entry, or a missing lock file. Callers performing those specific
    /// recoveries check this to decide whether to log-and-continue instead
    /// of propagating.
    pub fn is_missing_file(&self) -> bool {
        matches!(self, Error::Io { cause, .. } if cause.kind() == io::ErrorKind::NotFound)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedFormat { found, message } => {
                write!(f, "unsupported format {found}: {message}")
            }
            Error::NoSuchRevision(rev) => write!(f, "no such revision {rev}"),
            Error::Corrupt { message, .. } => write!(f, "corrupt repository: {message}"),
            Error::Conflict { path, message } => write!(f, "conflict at '{path}': {message}"),
            Error::Locked(message) => write!(f, "repository locked: {message}"),
            Error::AlreadyExists(path) => write!(f, "'{path}' already exists"),
            Error::NotFound(path) => write!(f, "'{path}' not found"),
            Error::Canceled => write!(f, "operation canceled"),
            Error::Io { message, cause } => write!(f, "I/O error: {message}: {cause}"),
            Error::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Corrupt { cause, .. } => cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static)),
            Error::Io { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(cause: io::Error) -> Self {
        Error::Io { message: "underlying I/O operation failed".to_string(), cause }
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(cause: std::num::ParseIntError) -> Self {
        Error::corrupt_with_cause("failed to parse integer field", cause)
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(cause: std::string::FromUtf8Error) -> Self {
        Error::corrupt_with_cause("record is not valid UTF-8", cause)
    }
}
